use crate::{
    config::Config,
    error::{ClassifierError, Result},
    image_fetcher::ImageSource,
    model_service::ModelRegistry,
    postprocessing::decode_prediction,
    preprocessing::{normalize, resize, ChannelOrder, Interpolation, RawImage},
    state::LabelTable,
};
use ndarray::Array4;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinError, time::timeout};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub resize_height: Option<u32>,
    pub interpolation: Interpolation,
    pub channel_order: ChannelOrder,
    pub fetch_timeout: Duration,
    pub inference_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resize_height: config.classifier.image_resize,
            interpolation: config.classifier.interpolation,
            channel_order: config.classifier.channel_order,
            fetch_timeout: config.model.fetch_timeout(),
            inference_timeout: config.model.inference_timeout(),
        }
    }
}

/// Resizes to the configured height and normalizes into a model input.
pub fn preprocess(image: RawImage, options: &PipelineOptions) -> Result<Array4<f32>> {
    let resized = resize(image, None, options.resize_height, options.interpolation)?;
    normalize(&resized, options.channel_order)
}

/// Runs fetch → preprocess → inference → decode for one request.
#[derive(Clone)]
pub struct Handler {
    image_source: Arc<dyn ImageSource>,
    models: Arc<ModelRegistry>,
    labels: Arc<LabelTable>,
    options: PipelineOptions,
}

impl Handler {
    pub fn new(
        image_source: Arc<dyn ImageSource>,
        models: Arc<ModelRegistry>,
        labels: Arc<LabelTable>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            image_source,
            models,
            labels,
            options,
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub async fn handle(&self, model_name: &str, url: &str) -> Result<Classification> {
        let model = self.models.get(model_name)?;

        let image = timeout(self.options.fetch_timeout, self.image_source.fetch(url))
            .await
            .map_err(|_| ClassifierError::FetchFailed {
                url: url.to_string(),
                reason: format!("timed out after {:?}", self.options.fetch_timeout),
            })??;
        tracing::debug!("Fetched {}x{} image", image.width(), image.height());

        let options = self.options.clone();
        let tensor = tokio::task::spawn_blocking(move || preprocess(image, &options))
            .await
            .map_err(|e| {
                ClassifierError::PreprocessFailed(Box::new(ClassifierError::InvalidImage(
                    format!("preprocessing task failed: {}", e),
                )))
            })?
            .map_err(|e| ClassifierError::PreprocessFailed(Box::new(e)))?;
        tracing::debug!("Input tensor shape {:?}", tensor.shape());

        // An expired inference keeps running on the blocking pool; only the
        // response is abandoned.
        let inference = tokio::task::spawn_blocking(move || model.run(tensor.view()));
        let logits = timeout(self.options.inference_timeout, inference)
            .await
            .map_err(|_| {
                ClassifierError::InferenceFailed(format!(
                    "timed out after {:?}",
                    self.options.inference_timeout
                ))
            })?
            .map_err(join_failed)?
            .map_err(|e| match e {
                ClassifierError::InferenceFailed(_) => e,
                other => ClassifierError::InferenceFailed(other.to_string()),
            })?;

        let prediction = decode_prediction(&logits)?;
        let label = self.labels.resolve(prediction.index)?.to_string();
        tracing::debug!(
            "Predicted class {} ({}) with confidence {:.3}",
            prediction.index,
            label,
            prediction.confidence
        );

        Ok(Classification {
            label,
            confidence: prediction.confidence,
        })
    }
}

fn join_failed(err: JoinError) -> ClassifierError {
    ClassifierError::InferenceFailed(format!("worker task failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_service::{InferenceEngine, ModelHandle};
    use async_trait::async_trait;
    use image::Rgb;
    use ndarray::{ArrayD, ArrayView4, IxDyn};
    use parking_lot::Mutex;

    struct MockImageSource {
        image: Option<RawImage>,
        delay: Duration,
    }

    #[async_trait]
    impl ImageSource for MockImageSource {
        async fn fetch(&self, url: &str) -> Result<RawImage> {
            tokio::time::sleep(self.delay).await;
            self.image.clone().ok_or_else(|| ClassifierError::FetchFailed {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
        }
    }

    struct MockEngine {
        logits: Vec<f32>,
        delay: Duration,
        fail: bool,
        seen_shape: Arc<Mutex<Option<Vec<usize>>>>,
    }

    impl MockEngine {
        fn returning(logits: Vec<f32>) -> Self {
            Self {
                logits,
                delay: Duration::ZERO,
                fail: false,
                seen_shape: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl InferenceEngine for MockEngine {
        fn run(
            &self,
            input_name: &str,
            input: ArrayView4<f32>,
            output_name: &str,
        ) -> Result<ArrayD<f32>> {
            assert_eq!(input_name, "data");
            assert_eq!(output_name, "prob");
            std::thread::sleep(self.delay);
            *self.seen_shape.lock() = Some(input.shape().to_vec());
            if self.fail {
                return Err(ClassifierError::InvalidImage("bad input".to_string()));
            }
            let shape = IxDyn(&[1, self.logits.len()]);
            Ok(ArrayD::from_shape_vec(shape, self.logits.clone()).unwrap())
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            resize_height: Some(224),
            interpolation: Interpolation::Area,
            channel_order: ChannelOrder::Rgb,
            fetch_timeout: Duration::from_secs(5),
            inference_timeout: Duration::from_secs(5),
        }
    }

    fn labels() -> Arc<LabelTable> {
        Arc::new(
            LabelTable::from_json_str(
                r#"{"0": ["n01", "cat"], "1": ["n02", "dog"], "2": ["n03", "bird"]}"#,
            )
            .unwrap(),
        )
    }

    fn handler_with(
        source: MockImageSource,
        engine: MockEngine,
        options: PipelineOptions,
    ) -> Handler {
        let mut registry = ModelRegistry::new();
        registry.insert("resnet50", ModelHandle::new(engine, "data", "prob"));
        Handler::new(Arc::new(source), Arc::new(registry), labels(), options)
    }

    fn image_source(width: u32, height: u32) -> MockImageSource {
        MockImageSource {
            image: Some(RawImage::from_pixel(width, height, Rgb([120, 60, 30]))),
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_640x480() {
        let engine = MockEngine::returning(vec![0.5, 2.5, -1.0]);
        let seen_shape = engine.seen_shape.clone();
        let handler = handler_with(image_source(640, 480), engine, options());

        let result = handler
            .handle("resnet50", "https://example.com/dog.jpg")
            .await
            .unwrap();

        assert_eq!(result.label, "dog");
        assert!(labels().get_labels().contains(&result.label));
        assert!(result.confidence > 0.5 && result.confidence < 1.0);
        assert_eq!(seen_shape.lock().clone(), Some(vec![1, 3, 224, 298]));
    }

    #[test]
    fn test_preprocess_shape() {
        let image = RawImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let tensor = preprocess(image, &options()).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 224, 298]);
    }

    #[test]
    fn test_preprocess_without_resize_keeps_size() {
        let image = RawImage::from_pixel(31, 17, Rgb([0, 0, 0]));
        let options = PipelineOptions {
            resize_height: None,
            ..options()
        };

        assert_eq!(preprocess(image, &options).unwrap().shape(), &[1, 3, 17, 31]);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let engine = MockEngine::returning(vec![1.0]);
        let handler = handler_with(image_source(8, 8), engine, options());

        let result = handler.handle("vgg16", "https://example.com/cat.jpg").await;

        assert!(matches!(result, Err(ClassifierError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let source = MockImageSource {
            image: None,
            delay: Duration::ZERO,
        };
        let handler = handler_with(source, MockEngine::returning(vec![1.0]), options());

        let result = handler.handle("resnet50", "https://example.com/missing.jpg").await;

        assert!(matches!(result, Err(ClassifierError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let source = MockImageSource {
            delay: Duration::from_secs(2),
            ..image_source(8, 8)
        };
        let options = PipelineOptions {
            fetch_timeout: Duration::from_millis(20),
            ..options()
        };
        let handler = handler_with(source, MockEngine::returning(vec![1.0]), options);

        let result = handler.handle("resnet50", "https://example.com/slow.jpg").await;

        assert!(matches!(result, Err(ClassifierError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_zero_area_image() {
        let source = MockImageSource {
            image: Some(RawImage::new(0, 0)),
            delay: Duration::ZERO,
        };
        let handler = handler_with(source, MockEngine::returning(vec![1.0]), options());

        let result = handler.handle("resnet50", "https://example.com/empty.png").await;

        match result {
            Err(ClassifierError::PreprocessFailed(inner)) => {
                assert!(matches!(*inner, ClassifierError::InvalidImage(_)))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_failure() {
        let engine = MockEngine {
            fail: true,
            ..MockEngine::returning(vec![1.0])
        };
        let handler = handler_with(image_source(8, 8), engine, options());

        let result = handler.handle("resnet50", "https://example.com/cat.jpg").await;

        assert!(matches!(result, Err(ClassifierError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_inference_timeout() {
        let engine = MockEngine {
            delay: Duration::from_millis(500),
            ..MockEngine::returning(vec![1.0])
        };
        let options = PipelineOptions {
            inference_timeout: Duration::from_millis(20),
            ..options()
        };
        let handler = handler_with(image_source(8, 8), engine, options);

        let result = handler.handle("resnet50", "https://example.com/cat.jpg").await;

        assert!(matches!(result, Err(ClassifierError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_empty_output() {
        let engine = MockEngine::returning(vec![]);
        let handler = handler_with(image_source(8, 8), engine, options());

        let result = handler.handle("resnet50", "https://example.com/cat.jpg").await;

        assert!(matches!(result, Err(ClassifierError::EmptyOutput)));
    }

    #[tokio::test]
    async fn test_class_index_beyond_labels() {
        let engine = MockEngine::returning(vec![0.0, 0.0, 0.0, 9.0]);
        let handler = handler_with(image_source(8, 8), engine, options());

        let result = handler.handle("resnet50", "https://example.com/cat.jpg").await;

        assert!(matches!(
            result,
            Err(ClassifierError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }
}
