//! Options for [`CacheEngine::remember`](super::CacheEngine::remember).

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A value given up front or derived from the computed result.
pub enum Resolvable<V, T> {
    Literal(V),
    Computed(Box<dyn Fn(&T) -> V>),
}

impl<V: Clone, T> Resolvable<V, T> {
    pub fn resolve(&self, result: &T) -> V {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Computed(compute) => compute(result),
        }
    }
}

impl<V: fmt::Debug, T> fmt::Debug for Resolvable<V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

pub(crate) type FreezeFn<T> = Box<dyn Fn(&T) -> Result<Value, serde_json::Error>>;
pub(crate) type WarmupFn<T> = Box<dyn Fn(Value) -> Result<T, serde_json::Error>>;

/// Per-call caching options.
///
/// `freeze` turns a result into storable content and `warmup` restores it after a
/// hit. [`RememberOptions::new`] uses serde for both; [`RememberOptions::with_codec`]
/// accepts custom conversions for results that are not directly serializable.
pub struct RememberOptions<T> {
    pub(crate) ttl: Resolvable<Option<u64>, T>,
    pub(crate) enabled: Resolvable<bool, T>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) label: Option<String>,
    pub(crate) freeze: FreezeFn<T>,
    pub(crate) warmup: WarmupFn<T>,
}

impl<T> RememberOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    pub fn new() -> Self {
        Self::with_codec(|value: &T| serde_json::to_value(value), serde_json::from_value::<T>)
    }
}

impl<T> Default for RememberOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RememberOptions<T> {
    pub fn with_codec<F, W>(freeze: F, warmup: W) -> Self
    where
        F: Fn(&T) -> Result<Value, serde_json::Error> + 'static,
        W: Fn(Value) -> Result<T, serde_json::Error> + 'static,
    {
        Self {
            ttl: Resolvable::Literal(None),
            enabled: Resolvable::Literal(true),
            tags: BTreeSet::new(),
            label: None,
            freeze: Box::new(freeze),
            warmup: Box::new(warmup),
        }
    }

    /// Lifetime in seconds.
    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = Resolvable::Literal(Some(seconds));
        self
    }

    pub fn ttl_with(mut self, compute: impl Fn(&T) -> Option<u64> + 'static) -> Self {
        self.ttl = Resolvable::Computed(Box::new(compute));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Resolvable::Literal(enabled);
        self
    }

    pub fn enabled_with(mut self, compute: impl Fn(&T) -> bool + 'static) -> Self {
        self.enabled = Resolvable::Computed(Box::new(compute));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Name reported to metrics and logs; defaults to the producer's type name.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<T> fmt::Debug for RememberOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RememberOptions")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .field("tags", &self.tags)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
