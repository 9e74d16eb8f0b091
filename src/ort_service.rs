use crate::{
    error::{ClassifierError, Result},
    model_service::{InferenceEngine, ModelHandle, ModelRegistry},
};
use ndarray::{ArrayD, ArrayView4};
use ort::{
    execution_providers::ExecutionProviderDispatch,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

const MODEL_EXTENSION: &str = "onnx";

/// Registers the execution providers enabled at build time.
pub fn init_runtime() -> Result<()> {
    #[allow(unused_mut)]
    let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();
    #[cfg(feature = "tensorrt")]
    providers.push(
        ort::execution_providers::TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build(),
    );
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());

    ort::init()
        .with_name("onnx_classifier")
        .with_execution_providers(providers)
        .commit()
        .map_err(|e| ClassifierError::ModelLoadFailed {
            path: PathBuf::new(),
            reason: format!("failed to initialize onnxruntime: {}", e),
        })?;
    Ok(())
}

/// Round-robin pool of sessions over the same model file. A session needs
/// exclusive access while running.
pub struct OrtSessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl OrtSessionPool {
    pub fn from_file(model_path: &Path, num_instances: usize) -> ort::Result<Self> {
        let sessions = (0..num_instances.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_path)?;
                Ok(Mutex::new(session))
            })
            .collect::<ort::Result<Vec<_>>>()?;

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    /// First declared input and output names.
    fn io_names(&self) -> Option<(String, String)> {
        let session = self.sessions.first()?.lock();
        let input = session.inputs.first()?.name.clone();
        let output = session.outputs.first()?.name.clone();
        Some((input, output))
    }
}

impl InferenceEngine for OrtSessionPool {
    fn run(
        &self,
        input_name: &str,
        input: ArrayView4<f32>,
        output_name: &str,
    ) -> Result<ArrayD<f32>> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!("Handling request with session {}", index);

        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view).map_err(|e| {
            ClassifierError::InferenceFailed(format!("failed to build tensor: {}", e))
        })?;

        let outputs = session
            .run(ort::inputs![input_name => tensor_ref])
            .map_err(|e| ClassifierError::InferenceFailed(e.to_string()))?;

        let (shape, data) = outputs[output_name]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                ClassifierError::InferenceFailed(format!("failed to extract tensor: {}", e))
            })?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec()).map_err(|e| {
            ClassifierError::InferenceFailed(format!("invalid tensor shape: {}", e))
        })
    }
}

/// Finds the single `.onnx` artifact in `model_dir`.
pub fn find_model_artifact(model_dir: &Path) -> Result<PathBuf> {
    let load_failed = |reason: String| ClassifierError::ModelLoadFailed {
        path: model_dir.to_path_buf(),
        reason,
    };

    let mut candidates = std::fs::read_dir(model_dir)
        .map_err(|e| load_failed(e.to_string()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
        })
        .collect::<Vec<_>>();
    candidates.sort();

    match candidates.len() {
        0 => Err(load_failed("no .onnx model artifact found".to_string())),
        1 => Ok(candidates.remove(0)),
        n => Err(load_failed(format!(
            "expected exactly one .onnx model artifact, found {}: {:?}",
            n, candidates
        ))),
    }
}

pub fn load_model(model_dir: &Path, num_instances: usize) -> Result<ModelHandle> {
    let model_path = find_model_artifact(model_dir)?;
    let load_failed = |reason: String| ClassifierError::ModelLoadFailed {
        path: model_path.clone(),
        reason,
    };

    let pool = OrtSessionPool::from_file(&model_path, num_instances)
        .map_err(|e| load_failed(e.to_string()))?;
    let (input_name, output_name) = pool
        .io_names()
        .ok_or_else(|| load_failed("model declares no inputs or outputs".to_string()))?;

    tracing::info!(
        "Loaded {:?} with {} sessions (input: {}, output: {})",
        model_path,
        num_instances,
        input_name,
        output_name
    );

    Ok(ModelHandle::new(pool, input_name, output_name))
}

/// Loads one model per immediate subdirectory of `models_dir`, keyed by the
/// subdirectory name.
pub fn load_models(models_dir: &Path, num_instances: usize) -> Result<ModelRegistry> {
    let mut model_dirs = std::fs::read_dir(models_dir)
        .map_err(|e| ClassifierError::ModelLoadFailed {
            path: models_dir.to_path_buf(),
            reason: e.to_string(),
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    model_dirs.sort();

    if model_dirs.is_empty() {
        return Err(ClassifierError::ModelLoadFailed {
            path: models_dir.to_path_buf(),
            reason: "no model directories found".to_string(),
        });
    }

    let mut registry = ModelRegistry::new();
    for model_dir in model_dirs {
        let Some(name) = model_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let handle = load_model(&model_dir, num_instances)?;
        registry.insert(name, handle);
    }

    tracing::info!("Loaded {} models: {:?}", registry.len(), registry.names());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_single_artifact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("resnet50.onnx"), b"").unwrap();
        fs::write(dir.path().join("README.md"), b"").unwrap();

        let artifact = find_model_artifact(dir.path()).unwrap();

        assert_eq!(artifact, dir.path().join("resnet50.onnx"));
    }

    #[test]
    fn test_find_artifact_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            find_model_artifact(dir.path()),
            Err(ClassifierError::ModelLoadFailed { .. })
        ));
    }

    #[test]
    fn test_find_artifact_rejects_several() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.onnx"), b"").unwrap();
        fs::write(dir.path().join("b.ONNX"), b"").unwrap();

        let err = find_model_artifact(dir.path()).unwrap_err();

        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_find_artifact_missing_dir() {
        assert!(matches!(
            find_model_artifact(Path::new("/nonexistent/models/resnet50")),
            Err(ClassifierError::ModelLoadFailed { .. })
        ));
    }

    #[test]
    fn test_load_models_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stray.onnx"), b"").unwrap();

        assert!(matches!(
            load_models(dir.path(), 1),
            Err(ClassifierError::ModelLoadFailed { .. })
        ));
    }

    #[test]
    fn test_load_model_with_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.onnx"), b"not a protobuf").unwrap();

        assert!(matches!(
            load_model(dir.path(), 1),
            Err(ClassifierError::ModelLoadFailed { .. })
        ));
    }
}
