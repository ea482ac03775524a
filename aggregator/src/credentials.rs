//! Per-provider credential routing.
//!
//! Consumers send one bundle holding an opaque credential per provider id,
//! e.g. `{"svc-a": "token", "svc-b": {"user": "x", "password": "y"}}`. Each
//! outbound call receives only the entry for its own provider. Plain string
//! entries travel as `X-Token`, anything else is re-serialized to JSON and
//! travels as `X-Credentials`.

use http::HeaderName;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub const X_TOKEN: HeaderName = HeaderName::from_static("x-token");
pub const X_CREDENTIALS: HeaderName = HeaderName::from_static("x-credentials");

/// One provider's credential. `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    Structured(String),
}

impl Credential {
    pub fn header_name(&self) -> HeaderName {
        match self {
            Credential::Token(_) => X_TOKEN,
            Credential::Structured(_) => X_CREDENTIALS,
        }
    }

    pub fn expose(&self) -> &str {
        match self {
            Credential::Token(value) | Credential::Structured(value) => value,
        }
    }

    /// Log-safe rendering: the kind and length, never the content.
    pub fn redacted(&self) -> String {
        let kind = match self {
            Credential::Token(_) => "token",
            Credential::Structured(_) => "structured",
        };
        format!("{kind}(<redacted>, {} bytes)", self.expose().len())
    }

    fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Credential::Token(s)),
            Value::Bool(_) | Value::Number(_) => Some(Credential::Token(value.to_string())),
            structured @ (Value::Object(_) | Value::Array(_)) => {
                Some(Credential::Structured(structured.to_string()))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Credentials keyed by provider id.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    entries: HashMap<String, Credential>,
}

impl CredentialBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses the raw bundle a consumer sent. A missing or blank bundle is
    /// empty. A bundle that is not a JSON object is logged once and treated
    /// as empty, so one malformed header never breaks every provider call.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::empty();
        };

        match serde_json::from_str::<HashMap<String, Value>>(raw) {
            Ok(map) => Self {
                entries: map
                    .into_iter()
                    .filter_map(|(id, value)| Credential::from_json(value).map(|c| (id, c)))
                    .collect(),
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Malformed credential bundle, calling providers without credentials"
                );
                Self::empty()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.entries.keys().collect();
        providers.sort();
        f.debug_struct("CredentialBundle")
            .field("providers", &providers)
            .finish()
    }
}

/// Picks the credential a specific provider call needs out of a bundle.
/// Holds no state.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialRouter;

impl CredentialRouter {
    pub fn new() -> Self {
        CredentialRouter
    }

    /// The entry for `provider_id`, or `None` for an anonymous call.
    pub fn route<'a>(
        &self,
        bundle: &'a CredentialBundle,
        provider_id: &str,
    ) -> Option<&'a Credential> {
        bundle.entries.get(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_present_and_absent() {
        let bundle = CredentialBundle::parse(Some(r#"{"svc-a":"CRED_A"}"#));
        let router = CredentialRouter::new();

        assert_eq!(
            router.route(&bundle, "svc-a"),
            Some(&Credential::Token("CRED_A".into()))
        );
        assert_eq!(router.route(&bundle, "svc-b"), None);
    }

    #[test]
    fn test_structured_credentials() {
        let bundle = CredentialBundle::parse(Some(
            r#"{"svc-a": {"username": "u", "password": "p"}, "svc-b": null, "svc-c": 42}"#,
        ));
        let router = CredentialRouter::new();

        let a = router.route(&bundle, "svc-a").unwrap();
        assert_eq!(a.header_name(), X_CREDENTIALS);
        let parsed: Value = serde_json::from_str(a.expose()).unwrap();
        assert_eq!(parsed["username"], "u");

        assert_eq!(router.route(&bundle, "svc-b"), None);
        assert_eq!(
            router.route(&bundle, "svc-c"),
            Some(&Credential::Token("42".into()))
        );
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_malformed_bundle_degrades_to_empty() {
        for raw in [
            Some("not json"),
            Some("[\"a\", \"b\"]"),
            Some("\"just a string\""),
            Some("   "),
            None,
        ] {
            let bundle = CredentialBundle::parse(raw);
            assert!(bundle.is_empty(), "expected empty bundle for {raw:?}");
            assert_eq!(CredentialRouter::new().route(&bundle, "svc-a"), None);
        }
    }

    #[test]
    fn test_debug_is_redacted() {
        let bundle = CredentialBundle::parse(Some(r#"{"svc-a":"SECRET_TOKEN"}"#));
        let credential = CredentialRouter::new().route(&bundle, "svc-a").unwrap();

        assert!(!format!("{credential:?}").contains("SECRET_TOKEN"));
        assert!(!format!("{credential}").contains("SECRET_TOKEN"));
        assert!(!format!("{bundle:?}").contains("SECRET_TOKEN"));
        assert_eq!(credential.redacted(), "token(<redacted>, 12 bytes)");
        assert!(format!("{bundle:?}").contains("svc-a"));
    }
}
