//! Deployment stages and the deployable units they wrap.

use serde::Serialize;
use std::collections::HashSet;

use crate::context::SynthContext;
use crate::{Error, Result};

/// A deployable unit (stack) supplied by a content provider.
///
/// `properties` is carried through to the assembly untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployableUnit {
    pub name: String,
    pub properties: serde_json::Value,
}

impl DeployableUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Supplies the deployable units of a stage.
pub trait StageContent {
    fn units(&self, context: &SynthContext) -> Vec<DeployableUnit>;
}

impl StageContent for Vec<DeployableUnit> {
    fn units(&self, _context: &SynthContext) -> Vec<DeployableUnit> {
        self.clone()
    }
}

/// An ordered group of deployable units deployed as one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    name: String,
    units: Vec<DeployableUnit>,
}

impl Stage {
    pub fn new(name: impl Into<String>, units: Vec<DeployableUnit>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Assembly("stage name must not be empty".to_string()));
        }
        if units.is_empty() {
            return Err(Error::Assembly(format!(
                "stage '{}' has no deployable units",
                name
            )));
        }
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.name.as_str()) {
                return Err(Error::Assembly(format!(
                    "stage '{}' contains unit '{}' more than once",
                    name, unit.name
                )));
            }
        }
        Ok(Self { name, units })
    }

    /// Build a stage from a content provider, handing it the synthesis context.
    pub fn from_content(
        name: impl Into<String>,
        content: &dyn StageContent,
        context: &SynthContext,
    ) -> Result<Self> {
        Self::new(name, content.units(context))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &[DeployableUnit] {
        &self.units
    }
}
