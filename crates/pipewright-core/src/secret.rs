//! Credential references and secret resolution.
//!
//! Synthesis only ever deals in references. A [`CredentialRef`] names a secret (store id
//! plus JSON field) and a [`CredentialResolver`] turns it into a [`SecretHandle`], a
//! deferred token the build executor materializes at execution time through a
//! [`SecretStore`]. Nothing in this module performs I/O during synthesis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// A reference to one field of a secret held in an external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    /// Identifier of the secret in the store (e.g. an ARN or secret name).
    pub store_id: String,
    /// JSON field inside the secret that holds the token.
    pub field: String,
}

impl CredentialRef {
    pub fn new(store_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            field: field.into(),
        }
    }

    /// Reject references with an empty store id or field.
    pub fn validate(&self) -> Result<()> {
        if self.store_id.trim().is_empty() {
            return Err(Error::CredentialResolution(
                "credential reference is missing a store id".to_string(),
            ));
        }
        if self.field.trim().is_empty() {
            return Err(Error::CredentialResolution(format!(
                "credential reference '{}' is missing a field name",
                self.store_id
            )));
        }
        Ok(())
    }
}

/// Deferred handle to a secret value.
///
/// The handle holds the reference only. It renders as a dynamic reference string that
/// the provisioning layer resolves when the build runs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretHandle {
    reference: CredentialRef,
}

impl SecretHandle {
    pub fn new(reference: CredentialRef) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &CredentialRef {
        &self.reference
    }

    /// Render as `{{resolve:secretsmanager:<store>:SecretString:<field>::}}`.
    pub fn to_dynamic_reference(&self) -> String {
        format!(
            "{{{{resolve:secretsmanager:{}:SecretString:{}::}}}}",
            self.reference.store_id, self.reference.field
        )
    }

    /// Fetch the token from a secret store. Only the build executor calls this.
    pub async fn materialize(&self, store: &dyn SecretStore) -> Result<String> {
        let value = store.get(&self.reference.store_id).await?;
        value.get(&self.reference.field).ok_or_else(|| {
            Error::SecretNotFound(format!(
                "field '{}' in secret '{}'",
                self.reference.field, self.reference.store_id
            ))
        })
    }
}

impl fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretHandle")
            .field(&self.to_dynamic_reference())
            .finish()
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dynamic_reference())
    }
}

impl Serialize for SecretHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_dynamic_reference())
    }
}

/// Turns credential references into deferred handles.
///
/// Implementations must be pure: the same reference always yields an equal handle and
/// no secret store is contacted.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, reference: &CredentialRef) -> Result<SecretHandle>;
}

/// Resolver producing secrets-manager dynamic references.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicReferenceResolver;

impl CredentialResolver for DynamicReferenceResolver {
    fn resolve(&self, reference: &CredentialRef) -> Result<SecretHandle> {
        reference.validate()?;
        tracing::debug!(
            store = %reference.store_id,
            field = %reference.field,
            "Resolved credential reference"
        );
        Ok(SecretHandle::new(reference.clone()))
    }
}

/// A secret value (can be a single string or key-value pairs).
#[derive(Clone, Serialize, Deserialize)]
pub enum SecretValue {
    /// A single secret string, usually a JSON document.
    String(String),
    /// A map of key-value pairs.
    Map(HashMap<String, String>),
}

impl SecretValue {
    /// Get a field from the secret. String secrets are read as JSON objects.
    pub fn get(&self, field: &str) -> Option<String> {
        match self {
            SecretValue::Map(m) => m.get(field).cloned(),
            SecretValue::String(s) => serde_json::from_str::<serde_json::Value>(s)
                .ok()?
                .get(field)?
                .as_str()
                .map(str::to_string),
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::String(_) => f.write_str("SecretValue::String(***)"),
            SecretValue::Map(m) => write!(f, "SecretValue::Map({} keys)", m.len()),
        }
    }
}

/// Secret storage backend consulted by the build executor at execution time.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a secret by store id.
    async fn get(&self, store_id: &str) -> Result<SecretValue>;
}

/// Secret store backed by a map. Intended for tests and local dry runs.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: HashMap<String, SecretValue>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, store_id: impl Into<String>, value: SecretValue) -> Self {
        self.secrets.insert(store_id.into(), value);
        self
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, store_id: &str) -> Result<SecretValue> {
        self.secrets
            .get(store_id)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound(store_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:GitHubToken-abc";

    #[test]
    fn test_resolve_is_idempotent() {
        let reference = CredentialRef::new(ARN, "access-token");
        let a = DynamicReferenceResolver.resolve(&reference).unwrap();
        let b = DynamicReferenceResolver.resolve(&reference).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dynamic_reference_format() {
        let handle = DynamicReferenceResolver
            .resolve(&CredentialRef::new("token", "access-token"))
            .unwrap();
        assert_eq!(
            handle.to_dynamic_reference(),
            "{{resolve:secretsmanager:token:SecretString:access-token::}}"
        );
        assert_eq!(
            serde_json::to_value(&handle).unwrap(),
            serde_json::json!("{{resolve:secretsmanager:token:SecretString:access-token::}}")
        );
    }

    #[test]
    fn test_missing_store_id() {
        let result = DynamicReferenceResolver.resolve(&CredentialRef::new("  ", "access-token"));
        assert!(matches!(result, Err(Error::CredentialResolution(_))));
    }

    #[test]
    fn test_missing_field() {
        let result = DynamicReferenceResolver.resolve(&CredentialRef::new(ARN, ""));
        assert!(matches!(result, Err(Error::CredentialResolution(_))));
    }

    #[test]
    fn test_secret_value_debug_is_masked() {
        let value = SecretValue::String(r#"{"access-token":"ghp_live"}"#.to_string());
        assert!(!format!("{:?}", value).contains("ghp_live"));
    }

    #[tokio::test]
    async fn test_materialize_json_string_secret() {
        let store = InMemorySecretStore::new().with_secret(
            ARN,
            SecretValue::String(r#"{"access-token":"ghp_123"}"#.to_string()),
        );
        let handle = DynamicReferenceResolver
            .resolve(&CredentialRef::new(ARN, "access-token"))
            .unwrap();
        assert_eq!(handle.materialize(&store).await.unwrap(), "ghp_123");
    }

    #[tokio::test]
    async fn test_materialize_missing_field() {
        let store = InMemorySecretStore::new().with_secret(
            ARN,
            SecretValue::Map(HashMap::from([("other".to_string(), "x".to_string())])),
        );
        let handle = DynamicReferenceResolver
            .resolve(&CredentialRef::new(ARN, "access-token"))
            .unwrap();
        assert!(matches!(
            handle.materialize(&store).await,
            Err(Error::SecretNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_materialize_unknown_secret() {
        let handle = DynamicReferenceResolver
            .resolve(&CredentialRef::new(ARN, "access-token"))
            .unwrap();
        let result = handle.materialize(&InMemorySecretStore::new()).await;
        assert!(matches!(result, Err(Error::SecretNotFound(_))));
    }
}
