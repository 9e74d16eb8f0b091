use crate::{error::ClassifierError, handler::Classification, server::SharedState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

/// Metric label for requests naming a model that is not loaded.
const UNKNOWN_MODEL: &str = "unknown";

#[derive(Debug, Deserialize, Serialize)]
pub struct PredictRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub models: Vec<String>,
}

/// Everything a predict route can answer with besides a classification.
#[derive(Debug)]
pub enum ApiError {
    /// The request never reached the pipeline: bad body, missing query.
    InvalidRequest { status: StatusCode, message: String },
    Classifier(ClassifierError),
}

impl From<ClassifierError> for ApiError {
    fn from(err: ClassifierError) -> Self {
        ApiError::Classifier(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidRequest { status, message } => {
                let body = ErrorBody {
                    error: "InvalidRequest".to_string(),
                    message,
                };
                (status, Json(body)).into_response()
            }
            ApiError::Classifier(err) => err.into_response(),
        }
    }
}

impl IntoResponse for ClassifierError {
    fn into_response(self) -> Response {
        let status = match self {
            ClassifierError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ClassifierError::FetchFailed { .. } => StatusCode::BAD_REQUEST,
            ClassifierError::InvalidImage(_) | ClassifierError::PreprocessFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ClassifierError::ModelLoadFailed { .. }
            | ClassifierError::InferenceFailed(_)
            | ClassifierError::EmptyOutput
            | ClassifierError::IndexOutOfRange { .. }
            | ClassifierError::LabelTableUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[instrument(skip(state, request))]
pub async fn predict_by_path(
    State(state): State<SharedState>,
    Path(model): Path<String>,
    request: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Classification>, ApiError> {
    let Json(request) = request?;
    Ok(classify(&state, &model, &request.url).await?)
}

#[instrument(skip(state, request))]
pub async fn predict_by_query(
    State(state): State<SharedState>,
    query: Result<Query<ModelQuery>, QueryRejection>,
    request: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Classification>, ApiError> {
    let Query(query) = query?;
    let Json(request) = request?;
    Ok(classify(&state, &query.model, &request.url).await?)
}

pub async fn list_models(State(state): State<SharedState>) -> Json<ModelList> {
    Json(ModelList {
        models: state.handler.models().names(),
    })
}

async fn classify(
    state: &SharedState,
    model: &str,
    url: &str,
) -> Result<Json<Classification>, ClassifierError> {
    let started = Instant::now();
    let result = state.handler.handle(model, url).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(classification) => {
            state.metrics.record_request(model, "success");
            state.metrics.record_prediction_duration(elapsed_ms, model);
            tracing::info!(
                "Classified {} with {} as {} in {} ms",
                url,
                model,
                classification.label,
                elapsed_ms
            );
            Ok(Json(classification))
        }
        Err(err) => {
            let metric_model = match err {
                ClassifierError::ModelNotFound(_) => UNKNOWN_MODEL,
                _ => model,
            };
            state.metrics.record_request(metric_model, err.kind());
            tracing::error!("Classification of {} with {} failed: {}", url, model, err);
            Err(err)
        }
    }
}
