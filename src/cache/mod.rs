//! Lazily loaded, atomically published object caches
//!
//! A [Cache] wraps a loader function and the last [Generation] it produced. The first access
//! triggers a load; afterwards the same generation is served until the cache is invalidated
//! or explicitly reloaded. New generations are built off to the side and published with a
//! single pointer swap, so concurrent readers always observe either the old generation or the
//! new one.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::datamodel::LoadError;
use crate::Id;

mod generation;

pub use generation::*;

/// An object that can be stored in a [Cache]
pub trait CacheObject: Send + Sync + 'static {
    fn id(&self) -> Id;
    fn name(&self) -> &str;
    fn uuid(&self) -> Option<Uuid>;
}

#[derive(Debug, Error)]
#[error("failed to reload {cache} cache: {source}")]
/// Loading a new generation failed
///
/// The cache keeps the previously published generation, if any.
pub struct ReloadError {
    cache: &'static str,
    #[source]
    source: LoadError,
}

impl ReloadError {
    pub fn cache(&self) -> &'static str {
        self.cache
    }

    pub fn into_inner(self) -> LoadError {
        self.source
    }
}

type Loader<T> = Box<dyn Fn() -> Result<Vec<Arc<T>>, LoadError> + Send + Sync>;

pub struct Cache<T> {
    label: &'static str,
    loader: Loader<T>,
    current: ArcSwapOption<Generation<T>>,
    /// Bumped on every invalidation
    epoch: AtomicU64,
    /// Epoch observed when the current generation started loading
    loaded: AtomicU64,
    reload_lock: Mutex<()>,
}

impl<T> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("label", &self.label)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("loaded", &self.current.load().is_some())
            .finish()
    }
}

impl<T: CacheObject> Cache<T> {
    pub fn new<F>(label: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<T>>, LoadError> + Send + Sync + 'static,
    {
        Self {
            label,
            loader: Box::new(loader),
            current: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
            loaded: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Return the current generation, loading it first if the cache is empty or stale
    pub fn snapshot(&self) -> Result<Arc<Generation<T>>, ReloadError> {
        if let Some(current) = self.fresh() {
            return Ok(current);
        }

        let _guard = self.reload_lock.lock();
        // the generation may have been loaded while waiting for the lock
        if let Some(current) = self.fresh() {
            return Ok(current);
        }
        self.load_locked()
    }

    /// Return the last published generation without triggering a load
    pub fn current(&self) -> Option<Arc<Generation<T>>> {
        self.current.load_full()
    }

    pub fn get(&self, id: Id) -> Result<Option<Arc<T>>, ReloadError> {
        Ok(self.snapshot()?.get(id).cloned())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Arc<T>>, ReloadError> {
        Ok(self.snapshot()?.get_by_name(name).cloned())
    }

    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Arc<T>>, ReloadError> {
        Ok(self.snapshot()?.get_by_uuid(uuid).cloned())
    }

    /// Load and publish a new generation
    ///
    /// Concurrent reloads are serialized. On failure the previous generation stays published.
    pub fn reload(&self) -> Result<Arc<Generation<T>>, ReloadError> {
        let _guard = self.reload_lock.lock();
        self.load_locked()
    }

    /// Mark the current generation as stale
    ///
    /// The next access reloads the cache. Readers holding a previous snapshot are not
    /// affected.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(cache = self.label, "invalidated");
    }

    /// Return true if a generation has been published and is not stale
    pub fn is_loaded(&self) -> bool {
        self.fresh().is_some()
    }

    fn fresh(&self) -> Option<Arc<Generation<T>>> {
        // `loaded` is stored after `current`, reading it first guarantees that a matching
        // epoch is never paired with an older generation
        let loaded = self.loaded.load(Ordering::Acquire);
        if loaded != self.epoch.load(Ordering::Acquire) {
            return None;
        }
        self.current.load_full()
    }

    #[instrument(name = "reload", level = "debug", skip_all, fields(cache = self.label), err)]
    fn load_locked(&self) -> Result<Arc<Generation<T>>, ReloadError> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let objects = (self.loader)().map_err(|source| ReloadError {
            cache: self.label,
            source,
        })?;
        let generation = Generation::new(objects).map_err(|e| ReloadError {
            cache: self.label,
            source: e.into(),
        })?;

        let generation = Arc::new(generation);
        self.current.store(Some(generation.clone()));
        self.loaded.store(epoch, Ordering::Release);
        debug!(cache = self.label, objects = generation.len(), "published");

        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{prelude::*, EnvFilter};

    fn init() {
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
            )
            .try_init()
            .unwrap_or(());
    }

    #[derive(Debug)]
    struct Group {
        id: Id,
        name: String,
    }

    impl CacheObject for Group {
        fn id(&self) -> Id {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn uuid(&self) -> Option<Uuid> {
            None
        }
    }

    struct Source {
        loads: AtomicUsize,
        fail: AtomicBool,
    }

    fn cache() -> (Arc<Source>, Cache<Group>) {
        let source = Arc::new(Source {
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let src = source.clone();
        let cache = Cache::new("group", move || {
            if src.fail.load(Ordering::SeqCst) {
                return Err(LoadError::Store(StoreError::NoMainTable(
                    "Admin_User_Group".to_string(),
                )));
            }
            let n = src.loads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((1..=n as Id)
                .map(|id| {
                    Arc::new(Group {
                        id,
                        name: format!("group{id}"),
                    })
                })
                .collect())
        });
        (source, cache)
    }

    #[test]
    fn it_loads_lazily_on_first_access() {
        init();
        let (source, cache) = cache();
        assert!(!cache.is_loaded());
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);

        let group = cache.get(1).unwrap().unwrap();
        assert_eq!(group.name, "group1");
        assert!(cache.is_loaded());

        // further reads use the same generation
        cache.get_by_name("group1").unwrap().unwrap();
        assert!(cache.get(2).unwrap().is_none());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn it_reloads_after_invalidation() {
        init();
        let (source, cache) = cache();
        let first = cache.snapshot().unwrap();
        assert_eq!(first.len(), 1);

        cache.invalidate();
        assert!(!cache.is_loaded());

        let second = cache.snapshot().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        // a snapshot taken before the reload is unaffected
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn it_keeps_the_previous_generation_if_reload_fails() {
        init();
        let (source, cache) = cache();
        cache.snapshot().unwrap();

        source.fail.store(true, Ordering::SeqCst);
        let err = cache.reload().unwrap_err();
        assert_eq!(err.cache(), "group");
        assert!(matches!(err.into_inner(), LoadError::Store(_)));

        let current = cache.current().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(cache.get(1).unwrap().unwrap().name, "group1");
    }

    #[test]
    fn it_reports_errors_on_stale_reads() {
        init();
        let (source, cache) = cache();
        cache.snapshot().unwrap();

        source.fail.store(true, Ordering::SeqCst);
        cache.invalidate();
        assert!(cache.get(1).is_err());

        // the cache recovers once the source does
        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn it_serves_concurrent_readers_a_single_load() {
        init();
        let (source, cache) = cache();
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get(1).unwrap().is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }
}
