//! Multi-strategy pre-alignment of 3D facial scans for a multi-view
//! landmark predictor, with per-scan strategy selection by predictor error
//! and a corpus-wide batch orchestrator.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod predictor;
pub mod strategies;
pub mod visualization;

pub use analysis::*;
pub use data::*;
pub use error::{AlignError, ReasonCode};
pub use pipeline::*;

pub type Result<T> = anyhow::Result<T>;
