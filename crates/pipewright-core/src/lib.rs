//! Pipeline synthesis engine for Pipewright continuous delivery.
//!
//! This crate contains:
//! - Credential references and the resolver seam
//! - Build spec composition
//! - Webhook filter evaluation
//! - Source bindings and standalone build projects
//! - Stages and the self-mutating pipeline assembler
//! - The synthesizer producing a complete cloud assembly

pub mod buildspec;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod secret;
pub mod source;
pub mod stage;
pub mod synth;
pub mod webhook;

pub use context::SynthContext;
pub use error::{Error, Result};
pub use synth::{CloudAssembly, Synthesizer};
