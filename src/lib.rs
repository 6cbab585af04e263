pub mod boosting;
pub mod calibration;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod fixtures;
pub mod logistic;
pub mod model;
pub mod prediction;
pub mod registry;
pub mod sqlite_store;
pub mod store;
pub mod synthetic;
pub mod training;

pub use error::EngineError;
