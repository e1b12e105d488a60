//! Build specification composition.
//!
//! A build spec is an ordered mapping from phase name to shell commands. Commands are
//! opaque strings here: nothing is reordered, deduplicated or validated.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::{Error, Result};

/// Schema version written into every build spec.
pub const BUILD_SPEC_VERSION: &str = "0.2";

/// A named phase and its commands, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub commands: Vec<String>,
}

/// A versioned, phased command specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    phases: Vec<Phase>,
}

impl BuildSpec {
    /// Compose a build spec from ordered `(phase, commands)` pairs.
    ///
    /// Fails with [`Error::DuplicateKey`] if a phase name appears twice.
    pub fn compose<I, P, C, S>(phases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = BuildSpecBuilder::new();
        for (name, commands) in phases {
            builder = builder.phase(name, commands);
        }
        builder.build()
    }

    pub fn builder() -> BuildSpecBuilder {
        BuildSpecBuilder::new()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Append commands to a phase, creating it at the end if it does not exist yet.
    pub fn append_commands<S: Into<String>>(
        mut self,
        phase: &str,
        commands: impl IntoIterator<Item = S>,
    ) -> Self {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        if commands.is_empty() {
            return self;
        }
        match self.phases.iter_mut().find(|p| p.name == phase) {
            Some(existing) => existing.commands.extend(commands),
            None => self.phases.push(Phase {
                name: phase.to_string(),
                commands,
            }),
        }
        self
    }

    /// Merge `other` into a copy of this spec. Commands of shared phases are appended
    /// after ours; phases only present in `other` follow ours in their original order.
    pub fn merge(&self, other: &BuildSpec) -> BuildSpec {
        other
            .phases
            .iter()
            .fold(self.clone(), |spec, phase| {
                spec.append_commands(&phase.name, phase.commands.iter().cloned())
            })
    }
}

impl Serialize for BuildSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Phases<'a>(&'a [Phase]);
        struct Commands<'a>(&'a [String]);

        impl Serialize for Commands<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut state = serializer.serialize_struct("Phase", 1)?;
                state.serialize_field("commands", self.0)?;
                state.end()
            }
        }

        impl Serialize for Phases<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for phase in self.0 {
                    map.serialize_entry(&phase.name, &Commands(&phase.commands))?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("BuildSpec", 2)?;
        state.serialize_field("version", BUILD_SPEC_VERSION)?;
        state.serialize_field("phases", &Phases(&self.phases))?;
        state.end()
    }
}

/// Incremental builder for [`BuildSpec`].
///
/// Duplicate phase names are recorded and reported by [`BuildSpecBuilder::build`].
#[derive(Debug, Default)]
pub struct BuildSpecBuilder {
    phases: Vec<Phase>,
    duplicate: Option<String>,
}

impl BuildSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        commands: impl IntoIterator<Item = S>,
    ) -> Self {
        let name = name.into();
        if self.phases.iter().any(|p| p.name == name) {
            self.duplicate.get_or_insert(name);
            return self;
        }
        self.phases.push(Phase {
            name,
            commands: commands.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn build(self) -> Result<BuildSpec> {
        if let Some(name) = self.duplicate {
            return Err(Error::DuplicateKey(format!("phase '{}'", name)));
        }
        Ok(BuildSpec {
            phases: self.phases,
        })
    }
}
