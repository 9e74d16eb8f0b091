mod routes;
mod server;
mod telemetry;

pub mod config;
pub mod error;
pub mod handler;
pub mod image_fetcher;
pub mod model_service;
pub mod ort_service;
pub mod postprocessing;
pub mod preprocessing;
pub mod state;

pub use error::{ClassifierError, Result};
pub use server::start_server;
