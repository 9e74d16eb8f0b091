use crate::error::{ClassifierError, Result};
use ndarray::{ArrayD, ArrayView4};
use std::{collections::HashMap, sync::Arc};

/// Opaque forward pass over a loaded model.
pub trait InferenceEngine: Send + Sync + 'static {
    fn run(
        &self,
        input_name: &str,
        input: ArrayView4<f32>,
        output_name: &str,
    ) -> Result<ArrayD<f32>>;
}

/// A loaded model together with the tensor names it declares.
pub struct ModelHandle {
    engine: Box<dyn InferenceEngine>,
    input_name: String,
    output_name: String,
}

impl ModelHandle {
    pub fn new(
        engine: impl InferenceEngine,
        input_name: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            engine: Box::new(engine),
            input_name: input_name.into(),
            output_name: output_name.into(),
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn run(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        self.engine.run(&self.input_name, input, &self.output_name)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish_non_exhaustive()
    }
}

/// Models by name. Immutable once the server starts.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelHandle>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, handle: ModelHandle) {
        self.models.insert(name.into(), Arc::new(handle));
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelHandle>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| ClassifierError::ModelNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
