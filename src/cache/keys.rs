//! Cache key derivation.
//!
//! A [`KeyGenerator`] turns whatever identifies a computation (its arguments, its
//! call site, the request that triggered it) into a stable string. The engine then
//! folds the request [`Environment`] into every key so identical arguments in a
//! different site, language or authorization context never share an entry.

use std::any::type_name;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::panic::Location;

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use url::{Url, form_urlencoded};

/// Strategy for deriving the primary component of a cache key.
pub trait KeyGenerator {
    fn make_cache_key(&self) -> String;
}

pub(crate) fn sha256_hex(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// Argument based keys
// ============================================================================

/// Key derived from a nested argument structure.
///
/// Object keys are sorted recursively before hashing; arrays keep their order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayKey {
    args: Value,
    query: Option<Value>,
}

impl ArrayKey {
    pub fn new(args: Value) -> Self {
        Self { args, query: None }
    }

    pub fn from_args<T: Serialize>(args: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(args)?))
    }

    /// Attach a reserved query fragment.
    ///
    /// The fragment is hashed in its own namespace and cannot collide with an
    /// argument that happens to be called `query`.
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }
}

impl KeyGenerator for ArrayKey {
    fn make_cache_key(&self) -> String {
        let mut material = String::from("args:");
        write_canonical(&self.args, &mut material);
        material.push_str("|query:");
        match &self.query {
            Some(query) => write_canonical(query, &mut material),
            None => material.push('-'),
        }
        sha256_hex(&material)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, nested)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, nested) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(nested, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Display on `Value` renders compact JSON with proper string escaping.
    let _ = write!(out, "{value}");
}

// ============================================================================
// Callable based keys
// ============================================================================

/// Key derived from the identity of the producing function.
///
/// Only unique when each producer is invoked from exactly one call site; prefer
/// [`ArrayKey`] whenever the computation has arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableKey {
    identity: String,
}

impl CallableKey {
    /// Identify `producer` by its type and the location of this call.
    #[track_caller]
    pub fn of<F>(_producer: &F) -> Self {
        let location = Location::caller();
        Self {
            identity: format!(
                "{}@{}:{}:{}",
                type_name::<F>(),
                location.file(),
                location.line(),
                location.column()
            ),
        }
    }

    pub fn named(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl KeyGenerator for CallableKey {
    fn make_cache_key(&self) -> String {
        sha256_hex(&format!("callable:{}", self.identity))
    }
}

// ============================================================================
// Request based keys
// ============================================================================

/// Key derived from an incoming request (method, path, query parameters).
///
/// Query parameters are sorted, so `?a=1&b=2` and `?b=2&a=1` share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    method: String,
    path: String,
    params: Vec<(String, String)>,
}

impl RequestKey {
    pub fn new(method: &str, path: &str, query: Option<&str>) -> Self {
        let params = query
            .map(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            method: method.to_ascii_uppercase(),
            path: normalize_path(path),
            params,
        }
    }

    pub fn from_url(method: &str, url: &Url) -> Self {
        Self::new(method, url.path(), url.query())
    }

    /// Drop parameters that do not influence the response (tracking ids, hashes).
    pub fn without_params(mut self, names: &[&str]) -> Self {
        self.params.retain(|(name, _)| !names.contains(&name.as_str()));
        self
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl KeyGenerator for RequestKey {
    fn make_cache_key(&self) -> String {
        let mut params = self.params.clone();
        params.sort();
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        sha256_hex(&format!("request:{} {}?{}", self.method, self.path, query))
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Authorization state a response was computed for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Anonymous,
    /// Logged-in visitor; the group set decides what content is visible.
    Authenticated { groups: BTreeSet<String> },
    /// Editor or preview access that may see hidden content.
    Privileged,
}

impl AuthState {
    pub fn authenticated<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Authenticated {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ambient request context folded into every cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    site: Option<String>,
    language: Option<String>,
    auth: AuthState,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthState) -> Self {
        self.auth = auth;
        self
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }
}

impl KeyGenerator for Environment {
    /// Components are serialized as JSON so separators inside a site or
    /// language name cannot make two environments collide.
    fn make_cache_key(&self) -> String {
        let auth = match &self.auth {
            AuthState::Anonymous => json!("anonymous"),
            AuthState::Authenticated { groups } => json!({ "groups": groups }),
            AuthState::Privileged => json!("privileged"),
        };
        json!({
            "site": self.site,
            "language": self.language,
            "auth": auth,
        })
        .to_string()
    }
}
