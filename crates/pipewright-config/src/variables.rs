//! Variable interpolation for pipeline definitions.
//!
//! Supports variables like:
//! - `${context.account}` - Target account
//! - `${context.region}` - Target region
//! - `${env.VAR_NAME}` - Environment variable
//! - `${name}` - Variable declared with a `var` node
//!
//! Unknown variables are left in place verbatim.

use pipewright_core::SynthContext;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Account and region
    pub context: SynthContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by `var` nodes
    pub custom: HashMap<String, String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["context", "account"] => self.context.account.clone(),
            ["context", "region"] => self.context.region.clone(),
            ["env", name] => self.env.get(*name).cloned(),
            [name] => self.custom.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a list of strings.
    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Variable names referenced in `input` that have no value.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.ctx.context.account = Some(account.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.ctx.context.region = Some(region.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
