//! Deal-sourcing pipeline for wholesale real-estate acquisitions.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;

pub use error::AppError;
