//! KDL pipeline definition loading for Pipewright.
//!
//! This crate handles:
//! - Pipeline definition files (pipewright.kdl)
//! - Variable interpolation
//! - Driving the core synthesizer from a parsed definition

pub mod error;
pub mod pipeline;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{PipelineFile, load_file, parse_definition};
pub use variables::{VariableContext, VariableContextBuilder};
