//! Synthesis context passed explicitly through every constructor.

use serde::{Deserialize, Serialize};

/// Deployment environment the pipeline is synthesized for.
///
/// Values are opaque to the engine. They are carried into the assembly and handed to
/// stage content providers, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthContext {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl SynthContext {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// A context with neither account nor region pinned.
    pub fn agnostic() -> Self {
        Self::default()
    }
}
