use crate::error::{ClassifierError, Result};
use std::collections::HashMap;

/// Dense class-index → label table, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parses a class-index document of the form
    /// `{"0": ["n01440764", "tench"], "1": [...], ...}`.
    ///
    /// Keys must cover `0..N` without gaps; the second element of each entry
    /// is the label.
    pub fn from_json_str(document: &str) -> Result<Self> {
        let classes: HashMap<String, Vec<String>> = serde_json::from_str(document)
            .map_err(|e| ClassifierError::LabelTableUnavailable(format!("invalid JSON: {}", e)))?;

        let labels = (0..classes.len())
            .map(|index| {
                let entry = classes.get(&index.to_string()).ok_or_else(|| {
                    ClassifierError::LabelTableUnavailable(format!(
                        "missing class index {} in a table of {} entries",
                        index,
                        classes.len()
                    ))
                })?;
                entry.get(1).cloned().ok_or_else(|| {
                    ClassifierError::LabelTableUnavailable(format!(
                        "class index {} has no label",
                        index
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(labels))
    }

    /// Loads the document from an `http(s)://` URL or a local path.
    pub async fn load(source: &str, client: &reqwest::Client) -> Result<Self> {
        let document = if source.starts_with("http://") || source.starts_with("https://") {
            client
                .get(source)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| ClassifierError::LabelTableUnavailable(e.to_string()))?
                .text()
                .await
                .map_err(|e| ClassifierError::LabelTableUnavailable(e.to_string()))?
        } else {
            tokio::fs::read_to_string(source).await.map_err(|e| {
                ClassifierError::LabelTableUnavailable(format!("{}: {}", source, e))
            })?
        };

        let table = Self::from_json_str(&document)?;
        tracing::info!("Loaded {} class labels from {}", table.len(), source);
        Ok(table)
    }

    pub fn resolve(&self, index: usize) -> Result<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or(ClassifierError::IndexOutOfRange {
                index,
                len: self.labels.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get_labels(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CAT_DOG: &str = r#"{"0": ["n01", "cat"], "1": ["n02", "dog"]}"#;

    #[test]
    fn test_resolve() {
        let table = LabelTable::from_json_str(CAT_DOG).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(0).unwrap(), "cat");
        assert_eq!(table.resolve(1).unwrap(), "dog");
        assert!(matches!(
            table.resolve(2),
            Err(ClassifierError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_keys_are_ordered_numerically() {
        let document = r#"{"10": ["a", "ten"], "2": ["b", "two"], "0": ["c", "zero"],
            "1": ["d", "one"], "3": ["e", "three"], "4": ["f", "four"], "5": ["g", "five"],
            "6": ["h", "six"], "7": ["i", "seven"], "8": ["j", "eight"], "9": ["k", "nine"]}"#;
        let table = LabelTable::from_json_str(document).unwrap();

        assert_eq!(table.resolve(2).unwrap(), "two");
        assert_eq!(table.resolve(10).unwrap(), "ten");
    }

    #[test]
    fn test_missing_index_is_rejected() {
        let document = r#"{"0": ["n01", "cat"], "2": ["n03", "bird"]}"#;
        assert!(matches!(
            LabelTable::from_json_str(document),
            Err(ClassifierError::LabelTableUnavailable(_))
        ));
    }

    #[test]
    fn test_entry_without_label_is_rejected() {
        let document = r#"{"0": ["n01"]}"#;
        assert!(matches!(
            LabelTable::from_json_str(document),
            Err(ClassifierError::LabelTableUnavailable(_))
        ));
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        assert!(matches!(
            LabelTable::from_json_str("[\"cat\", \"dog\"]"),
            Err(ClassifierError::LabelTableUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CAT_DOG.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let table = LabelTable::load(&path, &reqwest::Client::new())
            .await
            .unwrap();

        assert_eq!(table.get_labels(), &["cat".to_string(), "dog".to_string()]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = LabelTable::load("/nonexistent/classes.json", &reqwest::Client::new()).await;
        assert!(matches!(
            result,
            Err(ClassifierError::LabelTableUnavailable(_))
        ));
    }
}
