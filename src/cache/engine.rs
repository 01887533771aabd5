//! The memoization engine.
//!
//! [`CacheEngine::remember`] looks a computation up in the store and, on a miss,
//! runs it inside a fresh [`Scope`](super::Scope). Whatever the computation and
//! its nested `remember` calls announce ends up on the persisted entry and is
//! propagated to every enclosing computation.

use std::any::type_name;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::debug;

use super::config::CacheConfig;
use super::context::RequestContext;
use super::error::CacheError;
use super::keys::{KeyGenerator, sha256_hex};
use super::metrics::{MetricsTracker, ScopeOutcome};
use super::options::RememberOptions;
use super::scope::Scoped;
use super::store::{CacheEntry, CacheStore};

pub struct CacheEngine<S> {
    store: Arc<S>,
    config: CacheConfig,
    metrics: Option<Arc<dyn MetricsTracker>>,
}

impl<S: CacheStore> CacheEngine<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsTracker>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store key for `key` in the environment of `ctx`.
    pub fn cache_key(&self, ctx: &RequestContext, key: &dyn KeyGenerator) -> String {
        let material = json!([key.make_cache_key(), ctx.environment().make_cache_key()]).to_string();
        format!("{}{}", self.config.key_prefix, sha256_hex(&material))
    }

    /// Return the cached result for `key`, or compute, persist and return it.
    ///
    /// `produce` is not invoked on a hit; the tags stored with the entry are
    /// announced to the enclosing scope instead. Errors from `produce` are
    /// returned unchanged and leave nothing in the store. Store and conversion
    /// failures surface as `E::from(CacheError)`.
    pub fn remember<T, E, F>(
        &self,
        ctx: &RequestContext,
        key: &dyn KeyGenerator,
        options: RememberOptions<T>,
        produce: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CacheError>,
    {
        let cache_key = self.cache_key(ctx, key);
        let label = options
            .label
            .clone()
            .unwrap_or_else(|| type_name::<F>().to_string());

        if self.config.enabled && !ctx.force_update() {
            if let Some(result) = self.lookup(ctx, &cache_key, &label, &options)? {
                return Ok(result);
            }
            if let Some(metrics) = &self.metrics {
                metrics.trigger_miss(&label, &cache_key);
            }
        }

        debug!(
            cache = "engine",
            outcome = if ctx.force_update() { "forced" } else { "miss" },
            label = %label,
            key = %cache_key,
            depth = ctx.scopes().depth(),
            "computing entry"
        );

        let scopes = ctx.scopes();
        let started_at = Instant::now();
        let outcome = scopes.run_in_scope(|| {
            scopes.announce_tags(&options.tags);
            let result = produce()?;
            if let Some(ttl) = options.ttl.resolve(&result) {
                scopes.announce_ttl(ttl);
            }
            scopes.announce_enabled(options.enabled.resolve(&result));
            Ok(result)
        });
        let elapsed = started_at.elapsed();

        let Scoped { scope, result } = match outcome {
            Ok(scoped) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_scope(&label, &cache_key, elapsed, ScopeOutcome::Completed(&scoped.scope));
                }
                scoped
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_scope(&label, &cache_key, elapsed, ScopeOutcome::Failed);
                }
                debug!(cache = "engine", label = %label, key = %cache_key, "producer failed, nothing persisted");
                return Err(err);
            }
        };

        if !self.config.enabled || !scope.is_enabled() {
            debug!(
                cache = "engine",
                label = %label,
                key = %cache_key,
                tags = scope.tags().len(),
                "entry not cacheable, skipping write"
            );
            return Ok(result);
        }

        let content =
            (options.freeze)(&result).map_err(|source| CacheError::freeze(&cache_key, source))?;
        let ttl = scope.ttl();
        self.store
            .set(CacheEntry {
                key: cache_key.clone(),
                content,
                tags: scope.tags().clone(),
                ttl,
            })
            .map_err(CacheError::from)?;

        if let Some(metrics) = &self.metrics {
            metrics.trigger_write(&label, &cache_key, ttl);
        }
        debug!(
            cache = "engine",
            label = %label,
            key = %cache_key,
            tags = ?scope.tags(),
            ttl = ?ttl,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "entry persisted"
        );

        Ok(result)
    }

    fn lookup<T>(
        &self,
        ctx: &RequestContext,
        cache_key: &str,
        label: &str,
        options: &RememberOptions<T>,
    ) -> Result<Option<T>, CacheError> {
        let Some(entry) = self.store.get(cache_key)? else {
            return Ok(None);
        };

        let result =
            (options.warmup)(entry.content).map_err(|source| CacheError::warmup(cache_key, source))?;
        ctx.scopes().announce_tags(&entry.tags);

        if let Some(metrics) = &self.metrics {
            metrics.trigger_hit(label, cache_key, &entry.tags);
        }
        debug!(
            cache = "engine",
            outcome = "hit",
            label,
            key = cache_key,
            tags = entry.tags.len(),
            "serving cached entry"
        );

        Ok(Some(result))
    }

    /// Remove every entry carrying any of `tags`.
    pub fn flush_by_tags<I, T>(&self, tags: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        self.store.flush_by_tags(&tags)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        self.store.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::cache::error::StoreError;
    use crate::cache::keys::{ArrayKey, AuthState, CallableKey, Environment};
    use crate::cache::metrics::{ScopeLog, ScopeRecord};
    use crate::cache::store::MemoryStore;

    fn engine() -> CacheEngine<MemoryStore> {
        let config = CacheConfig::default();
        CacheEngine::new(Arc::new(MemoryStore::new(&config)), config)
    }

    fn tag_set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|tag| tag.to_string()).collect()
    }

    #[test]
    fn hit_skips_producer() {
        let engine = engine();
        let ctx = RequestContext::default();
        let key = ArrayKey::new(json!({"uid": 1}));
        let calls = Cell::new(0);

        for _ in 0..3 {
            let value: u32 = engine
                .remember(&ctx, &key, RememberOptions::new(), || {
                    calls.set(calls.get() + 1);
                    Ok::<_, CacheError>(7)
                })
                .expect("remember");
            assert_eq!(value, 7);
        }

        assert_eq!(calls.get(), 1);
        assert!(ctx.finish().is_ok());
    }

    #[test]
    fn hit_announces_stored_tags_not_live_ones() {
        let engine = engine();
        let key = ArrayKey::new(json!({"menu": "main"}));

        let ctx = RequestContext::default();
        let _: String = engine
            .remember(&ctx, &key, RememberOptions::new().tag("pages_1"), || {
                Ok::<_, CacheError>("menu".to_string())
            })
            .expect("first run");

        let outer = ctx
            .scopes()
            .run_in_scope(|| {
                engine.remember(&ctx, &key, RememberOptions::new().tag("pages_2"), || {
                    Ok::<_, CacheError>("fresh".to_string())
                })
            })
            .expect("outer scope");

        assert_eq!(outer.result, "menu");
        assert_eq!(outer.scope.tags(), &tag_set(&["pages_1"]));
    }

    #[test]
    fn force_update_recomputes_and_overwrites() {
        let engine = engine();
        let key = ArrayKey::new(json!({"uid": 3}));

        let ctx = RequestContext::default();
        let _: u32 = engine
            .remember(&ctx, &key, RememberOptions::new(), || Ok::<_, CacheError>(1))
            .expect("first");

        let forced = RequestContext::default().with_force_update(true);
        let value: u32 = engine
            .remember(&forced, &key, RememberOptions::new(), || Ok::<_, CacheError>(2))
            .expect("forced");
        assert_eq!(value, 2);

        let value: u32 = engine
            .remember(&ctx, &key, RememberOptions::new(), || Ok::<_, CacheError>(3))
            .expect("after force");
        assert_eq!(value, 2);
    }

    #[test]
    fn disabled_entry_is_not_persisted_but_propagates() {
        let engine = engine();
        let ctx = RequestContext::default();
        let key = ArrayKey::new(json!({"form": "contact"}));

        let outer = ctx
            .scopes()
            .run_in_scope(|| {
                engine.remember(
                    &ctx,
                    &key,
                    RememberOptions::new().tag("tt_content_4").ttl(10).enabled(false),
                    || Ok::<_, CacheError>(1u8),
                )
            })
            .expect("outer");

        assert_eq!(outer.scope.tags(), &tag_set(&["tt_content_4"]));
        assert_eq!(outer.scope.ttl(), Some(10));
        assert!(!outer.scope.is_enabled());
        assert!(engine.store().is_empty());
    }

    #[test]
    fn computed_options_use_the_result() {
        let engine = engine();
        let ctx = RequestContext::default();

        let options = || {
            RememberOptions::<Vec<u32>>::new()
                .ttl_with(|items| Some(items.len() as u64 * 10))
                .enabled_with(|items| !items.is_empty())
        };

        let empty_key = ArrayKey::new(json!({"list": "empty"}));
        let _ = engine
            .remember(&ctx, &empty_key, options(), || Ok::<_, CacheError>(vec![]))
            .expect("empty");
        assert!(engine.store().is_empty());

        let full_key = ArrayKey::new(json!({"list": "full"}));
        let _ = engine
            .remember(&ctx, &full_key, options(), || Ok::<_, CacheError>(vec![1, 2]))
            .expect("full");
        let stored = engine
            .store()
            .get(&engine.cache_key(&ctx, &full_key))
            .expect("get")
            .expect("persisted");
        assert_eq!(stored.ttl, Some(20));
        assert_eq!(stored.content, json!([1, 2]));
    }

    #[derive(Debug, thiserror::Error)]
    enum RenderError {
        #[error(transparent)]
        Cache(#[from] CacheError),
        #[error("record {0} not found")]
        NotFound(u32),
    }

    #[test]
    fn failing_producer_persists_nothing_but_nested_success_commits() {
        let engine = engine();
        let ctx = RequestContext::default();
        let outer_key = ArrayKey::new(json!({"level": "outer"}));
        let inner_key = ArrayKey::new(json!({"level": "inner"}));

        let err = engine
            .remember(&ctx, &outer_key, RememberOptions::<u32>::new(), || {
                let inner: u32 = engine.remember(
                    &ctx,
                    &inner_key,
                    RememberOptions::new().tag("tt_content_9"),
                    || Ok::<_, RenderError>(5),
                )?;
                Err(RenderError::NotFound(inner))
            })
            .expect_err("outer fails");

        assert!(matches!(err, RenderError::NotFound(5)));
        assert!(ctx.scopes().is_empty());
        assert!(!engine.store().has(&engine.cache_key(&ctx, &outer_key)).expect("has"));
        assert!(engine.store().has(&engine.cache_key(&ctx, &inner_key)).expect("has"));
    }

    struct FailingStore;

    impl CacheStore for FailingStore {
        fn has(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        fn set(&self, _entry: CacheEntry) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        fn flush_by_tags(&self, _tags: &BTreeSet<String>) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        fn flush(&self) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[test]
    fn backend_failure_is_propagated() {
        let engine = CacheEngine::new(Arc::new(FailingStore), CacheConfig::default());
        let ctx = RequestContext::default();
        let calls = Cell::new(0);

        let err = engine
            .remember(&ctx, &CallableKey::named("menu"), RememberOptions::<u8>::new(), || {
                calls.set(calls.get() + 1);
                Ok::<_, CacheError>(1)
            })
            .expect_err("store is down");

        assert!(matches!(err, CacheError::Store(StoreError::Unavailable(_))));
        assert_eq!(calls.get(), 0);
        assert!(engine.flush().is_err());
    }

    #[test]
    fn globally_disabled_engine_still_runs_scopes() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let engine = CacheEngine::new(Arc::new(FailingStore), config);
        let ctx = RequestContext::default();

        let outer = ctx
            .scopes()
            .run_in_scope(|| {
                engine.remember(
                    &ctx,
                    &CallableKey::named("menu"),
                    RememberOptions::new().tag("pages_1"),
                    || Ok::<_, CacheError>(1u8),
                )
            })
            .expect("no store access");

        assert_eq!(outer.result, 1);
        assert_eq!(outer.scope.tags(), &tag_set(&["pages_1"]));
    }

    #[test]
    fn environment_isolates_entries() {
        let engine = engine();
        let key = ArrayKey::new(json!({"type": "news"}));
        let english = RequestContext::new(Environment::new().with_site("main").with_language("en"));
        let german = RequestContext::new(Environment::new().with_site("main").with_language("de"));
        let member = RequestContext::new(
            Environment::new()
                .with_site("main")
                .with_language("en")
                .with_auth(AuthState::authenticated(["members"])),
        );

        let en: String = engine
            .remember(&english, &key, RememberOptions::new(), || Ok::<_, CacheError>("en".into()))
            .expect("en");
        let de: String = engine
            .remember(&german, &key, RememberOptions::new(), || Ok::<_, CacheError>("de".into()))
            .expect("de");
        let members: String = engine
            .remember(&member, &key, RememberOptions::new(), || {
                Ok::<_, CacheError>("members".into())
            })
            .expect("members");

        assert_eq!((en.as_str(), de.as_str(), members.as_str()), ("en", "de", "members"));
        assert_eq!(engine.store().len(), 3);
    }

    #[test]
    fn environment_separators_keep_tenants_apart() {
        let engine = engine();
        let key = CallableKey::named("menu");
        let first = RequestContext::new(
            Environment::new().with_site("a;language=b").with_language("c"),
        );
        let second = RequestContext::new(
            Environment::new().with_site("a").with_language("b;language=c"),
        );

        assert_ne!(engine.cache_key(&first, &key), engine.cache_key(&second, &key));

        let _: String = engine
            .remember(&first, &key, RememberOptions::new(), || Ok::<_, CacheError>("a".into()))
            .expect("first");
        let other: String = engine
            .remember(&second, &key, RememberOptions::new(), || Ok::<_, CacheError>("b".into()))
            .expect("second");
        assert_eq!(other, "b");
    }

    #[test]
    fn custom_codec_freezes_and_warms_up() {
        #[derive(Debug, PartialEq)]
        struct Slug(String);

        let engine = engine();
        let ctx = RequestContext::default();
        let key = CallableKey::named("slug");
        let options = || {
            RememberOptions::with_codec(
                |slug: &Slug| Ok(json!({"slug": slug.0})),
                |value| {
                    let slug = value["slug"].as_str().unwrap_or_default().to_string();
                    Ok(Slug(slug))
                },
            )
        };

        let first = engine
            .remember(&ctx, &key, options(), || Ok::<_, CacheError>(Slug("about-us".into())))
            .expect("first");
        let second = engine
            .remember(&ctx, &key, options(), || Ok::<_, CacheError>(Slug("other".into())))
            .expect("second");

        assert_eq!(first, second);
    }

    #[test]
    fn undecodable_entry_is_reported() {
        let engine = engine();
        let ctx = RequestContext::default();
        let key = CallableKey::named("count");

        let _: String = engine
            .remember(&ctx, &key, RememberOptions::new(), || {
                Ok::<_, CacheError>("not a number".into())
            })
            .expect("stored string");

        let err = engine
            .remember(&ctx, &key, RememberOptions::<u32>::new(), || Ok::<_, CacheError>(1))
            .expect_err("type changed");
        assert!(matches!(err, CacheError::Codec { .. }));
    }

    #[test]
    fn metrics_tracker_observes_without_changing_results() {
        let log = Arc::new(ScopeLog::new());
        let config = CacheConfig::default();
        let engine = CacheEngine::new(Arc::new(MemoryStore::new(&config)), config)
            .with_metrics(log.clone());
        let ctx = RequestContext::default();
        let key = CallableKey::named("menu");

        for _ in 0..2 {
            let _: u8 = engine
                .remember(&ctx, &key, RememberOptions::new().label("menu").tag("pages_1"), || {
                    Ok::<_, CacheError>(1)
                })
                .expect("remember");
        }

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], ScopeRecord::Scope { label, enabled: true, .. } if label == "menu"));
        assert!(matches!(&records[1], ScopeRecord::Hit { tags, .. } if tags == &tag_set(&["pages_1"])));
    }

    #[test]
    fn scope_is_recorded_after_producer_finishes() {
        let log = Arc::new(ScopeLog::new());
        let config = CacheConfig::default();
        let engine = CacheEngine::new(Arc::new(MemoryStore::new(&config)), config)
            .with_metrics(log.clone());
        let ctx = RequestContext::default();
        let seen_during_run = Cell::new(usize::MAX);

        let _: u8 = engine
            .remember(&ctx, &CallableKey::named("menu"), RememberOptions::new(), || {
                seen_during_run.set(log.records().len());
                Ok::<_, CacheError>(1)
            })
            .expect("remember");

        assert_eq!(seen_during_run.get(), 0);
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], ScopeRecord::Scope { .. }));
    }

    #[test]
    fn flush_by_tags_invalidates_entries() {
        let engine = engine();
        let ctx = RequestContext::default();
        let key = ArrayKey::new(json!({"uid": 9}));

        let _: u8 = engine
            .remember(&ctx, &key, RememberOptions::new().tag("tt_content_9"), || {
                Ok::<_, CacheError>(1)
            })
            .expect("first");
        engine.flush_by_tags(["tt_content_9"]).expect("flush");

        let value: u8 = engine
            .remember(&ctx, &key, RememberOptions::new(), || Ok::<_, CacheError>(2))
            .expect("recomputed");
        assert_eq!(value, 2);
    }
}
