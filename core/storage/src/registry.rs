//! Accessor registry: one lazily built, cached accessor per scheme.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::accessor::Accessor;
use crate::settings::{BundleUpdate, CredentialBundle, Settings};
use unipath_common::{Error, Result, Scheme};

/// Factory function type for creating accessors.
pub type AccessorFactory =
    Box<dyn Fn(&CredentialBundle) -> Result<Arc<dyn Accessor>> + Send + Sync>;

/// Box a closure as an [`AccessorFactory`].
pub fn accessor_factory<F>(f: F) -> AccessorFactory
where
    F: Fn(&CredentialBundle) -> Result<Arc<dyn Accessor>> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Cache slot for one scheme.
#[derive(Default)]
struct Slot {
    accessor: Option<Arc<dyn Accessor>>,
    generation: u64,
}

/// Registry of accessor factories and the accessors they built.
///
/// At most one accessor per scheme is alive at a time. Construction happens
/// under the scheme's slot lock, so concurrent first uses build exactly once,
/// and invalidation waits for an in-flight construction to finish.
pub struct AccessorRegistry {
    factories: HashMap<Scheme, AccessorFactory>,
    settings: RwLock<Settings>,
    slots: HashMap<Scheme, Mutex<Slot>>,
    settings_error: Option<String>,
}

static GLOBAL: OnceCell<Arc<AccessorRegistry>> = OnceCell::new();

impl AccessorRegistry {
    /// Create a new empty registry.
    pub fn new(settings: Settings) -> Self {
        Self {
            factories: HashMap::new(),
            settings: RwLock::new(settings),
            slots: Scheme::ALL
                .iter()
                .map(|scheme| (*scheme, Mutex::new(Slot::default())))
                .collect(),
            settings_error: None,
        }
    }

    /// Create a registry with the local, memory and S3-family factories.
    pub fn with_default_factories(settings: Settings) -> Self {
        let mut registry = Self::new(settings);
        registry.factories.insert(
            Scheme::Local,
            accessor_factory(|_| Ok(Arc::new(crate::local::LocalAccessor::new()))),
        );
        registry.factories.insert(
            Scheme::Memory,
            accessor_factory(|_| Ok(Arc::new(crate::memory::MemoryAccessor::new()))),
        );
        for scheme in Scheme::S3_FAMILY {
            registry.factories.insert(
                scheme,
                accessor_factory(move |bundle| crate::s3::create_s3_accessor(scheme, bundle)),
            );
        }
        registry
    }

    /// Process-wide registry, built from the environment on first use.
    ///
    /// Invalid environment settings do not fail here; every accessor lookup
    /// on the registry reports them instead.
    pub fn global() -> Arc<AccessorRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::from_resolved(Settings::from_env())))
            .clone()
    }

    fn from_resolved(settings: Result<Settings>) -> Self {
        match settings {
            Ok(settings) => Self::with_default_factories(settings),
            Err(e) => {
                error!(error = %e, "Invalid environment settings");
                let mut registry = Self::with_default_factories(Settings::default());
                registry.settings_error = Some(e.to_string());
                registry
            }
        }
    }

    /// Error met while resolving the registry's settings, if any.
    pub fn settings_error(&self) -> Option<&str> {
        self.settings_error.as_deref()
    }

    /// Register an accessor factory.
    ///
    /// # Preconditions
    /// - `scheme` must not already have a factory
    ///
    /// # Errors
    /// - Returns error if the scheme is already registered
    pub fn register(&mut self, scheme: Scheme, factory: AccessorFactory) -> Result<()> {
        if self.factories.contains_key(&scheme) {
            return Err(Error::AlreadyExists(format!(
                "Accessor for '{}' is already registered",
                scheme
            )));
        }
        self.factories.insert(scheme, factory);
        Ok(())
    }

    /// Get the accessor for `scheme`, building it on first use.
    ///
    /// # Errors
    /// - `NotFound` if no factory is registered for `scheme`
    /// - `BackendUnavailable` if the factory fails
    /// - `Config` if the registry's settings failed to resolve
    pub fn get_or_create(&self, scheme: Scheme) -> Result<Arc<dyn Accessor>> {
        if let Some(reason) = &self.settings_error {
            return Err(Error::Config(reason.clone()));
        }
        let factory = self.factories.get(&scheme).ok_or_else(|| {
            Error::NotFound(format!("Accessor for '{}' is not registered", scheme))
        })?;

        let mut slot = self.lock_slot(scheme)?;
        if let Some(accessor) = &slot.accessor {
            return Ok(Arc::clone(accessor));
        }

        let bundle = self.read_settings()?.bundle(scheme);
        let accessor = factory(&bundle).map_err(|e| match e {
            Error::BackendUnavailable { .. } => e,
            other => Error::backend(scheme, other),
        })?;
        slot.generation += 1;
        slot.accessor = Some(Arc::clone(&accessor));
        info!(%scheme, generation = slot.generation, "Accessor constructed");
        Ok(accessor)
    }

    /// Drop the cached accessor for `scheme` so the next use rebuilds it.
    ///
    /// Returns whether an accessor was cached.
    pub fn invalidate(&self, scheme: Scheme) -> Result<bool> {
        let mut slot = self.lock_slot(scheme)?;
        Ok(Self::discard(scheme, &mut slot))
    }

    fn discard(scheme: Scheme, slot: &mut Slot) -> bool {
        match slot.accessor.take() {
            Some(accessor) => {
                if let Err(e) = accessor.close() {
                    warn!(%scheme, error = %e, "Failed to close accessor");
                }
                info!(%scheme, "Accessor invalidated");
                true
            }
            None => false,
        }
    }

    /// Replace the credential bundle of `scheme`.
    ///
    /// The cached accessor is invalidated only when the bundle actually
    /// changes. Returns whether it changed.
    pub fn reconfigure(&self, scheme: Scheme, bundle: CredentialBundle) -> Result<bool> {
        self.replace_bundle(scheme, |_| bundle)
    }

    /// Apply a partial update to the bundle of `scheme`.
    ///
    /// The current bundle is read and replaced under one lock, so concurrent
    /// updates to the same scheme all land.
    pub fn update(&self, scheme: Scheme, update: &BundleUpdate) -> Result<bool> {
        self.replace_bundle(scheme, |current| update.apply(current))
    }

    fn replace_bundle<F>(&self, scheme: Scheme, build: F) -> Result<bool>
    where
        F: FnOnce(&CredentialBundle) -> CredentialBundle,
    {
        let mut slot = self.lock_slot(scheme)?;
        {
            let mut settings = self
                .settings
                .write()
                .map_err(|_| Error::Internal("settings lock poisoned".into()))?;
            let current = settings.bundle(scheme);
            let bundle = build(&current);
            if current == bundle {
                debug!(%scheme, "Bundle unchanged");
                return Ok(false);
            }
            settings.set_bundle(scheme, bundle);
        }
        Self::discard(scheme, &mut slot);
        Ok(true)
    }

    /// Apply several updates; returns the schemes whose bundle changed.
    pub fn update_many<'a>(
        &self,
        updates: impl IntoIterator<Item = (Scheme, &'a BundleUpdate)>,
    ) -> Result<Vec<Scheme>> {
        let mut changed = Vec::new();
        for (scheme, update) in updates {
            if self.update(scheme, update)? {
                changed.push(scheme);
            }
        }
        Ok(changed)
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Result<Settings> {
        Ok(self.read_settings()?.clone())
    }

    /// Number of accessors built so far for `scheme`.
    pub fn generation(&self, scheme: Scheme) -> u64 {
        self.lock_slot(scheme).map(|s| s.generation).unwrap_or(0)
    }

    /// Schemes with a live cached accessor.
    pub fn cached_schemes(&self) -> Vec<Scheme> {
        Scheme::ALL
            .into_iter()
            .filter(|s| self.lock_slot(*s).is_ok_and(|slot| slot.accessor.is_some()))
            .collect()
    }

    /// Get list of schemes with a registered factory.
    pub fn schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.factories.keys().copied().collect();
        schemes.sort();
        schemes
    }

    /// Check if a scheme has a registered factory.
    pub fn has_factory(&self, scheme: Scheme) -> bool {
        self.factories.contains_key(&scheme)
    }

    fn lock_slot(&self, scheme: Scheme) -> Result<MutexGuard<'_, Slot>> {
        self.slots
            .get(&scheme)
            .ok_or_else(|| Error::Internal(format!("no slot for scheme '{}'", scheme)))?
            .lock()
            .map_err(|_| Error::Internal(format!("slot lock for '{}' poisoned", scheme)))
    }

    fn read_settings(&self) -> Result<std::sync::RwLockReadGuard<'_, Settings>> {
        self.settings
            .read()
            .map_err(|_| Error::Internal("settings lock poisoned".into()))
    }
}

impl Default for AccessorRegistry {
    fn default() -> Self {
        Self::with_default_factories(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccessor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn counting_factory(counter: Arc<AtomicUsize>) -> AccessorFactory {
        accessor_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(MemoryAccessor::new()))
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = AccessorRegistry::new(Settings::default());
        registry
            .register(Scheme::Memory, accessor_factory(|_| Ok(Arc::new(MemoryAccessor::new()))))
            .unwrap();

        let accessor = registry.get_or_create(Scheme::Memory).unwrap();
        assert_eq!(accessor.scheme(), Scheme::Memory);
        assert!(registry.has_factory(Scheme::Memory));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = AccessorRegistry::new(Settings::default());
        registry
            .register(Scheme::Memory, accessor_factory(|_| Ok(Arc::new(MemoryAccessor::new()))))
            .unwrap();

        let result = registry.register(Scheme::Memory, accessor_factory(|_| Ok(Arc::new(MemoryAccessor::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = AccessorRegistry::new(Settings::default());
        assert!(matches!(registry.get_or_create(Scheme::R2), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_accessor_is_singleton() {
        let registry = AccessorRegistry::default();
        let a = registry.get_or_create(Scheme::Memory).unwrap();
        let b = registry.get_or_create(Scheme::Memory).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.generation(Scheme::Memory), 1);
        assert_eq!(registry.cached_schemes(), vec![Scheme::Memory]);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = AccessorRegistry::new(Settings::default());
        registry.register(Scheme::Memory, counting_factory(counter.clone())).unwrap();
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(Scheme::Memory).unwrap()
                })
            })
            .collect();
        let accessors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(accessors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_reconfigure_rebuilds_with_new_bundle() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AccessorRegistry::new(Settings::default());
        let recorder = seen.clone();
        registry
            .register(
                Scheme::Minio,
                accessor_factory(move |bundle| {
                    recorder.lock().unwrap().push(bundle.endpoint.clone());
                    Ok(Arc::new(MemoryAccessor::new()))
                }),
            )
            .unwrap();

        let first = registry.get_or_create(Scheme::Minio).unwrap();
        let update = BundleUpdate::new().endpoint("http://minio.local:9000");
        assert!(registry.update(Scheme::Minio, &update).unwrap());
        assert!(registry.cached_schemes().is_empty());

        let second = registry.get_or_create(Scheme::Minio).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.generation(Scheme::Minio), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("http://minio.local:9000".to_string())]
        );
    }

    #[test]
    fn test_unchanged_bundle_keeps_accessor() {
        let registry = AccessorRegistry::default();
        let first = registry.get_or_create(Scheme::Memory).unwrap();
        assert!(!registry.update(Scheme::Memory, &BundleUpdate::new()).unwrap());
        let second = registry.get_or_create(Scheme::Memory).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_update_many_invalidates_only_changed() {
        let registry = AccessorRegistry::default();
        registry.get_or_create(Scheme::Memory).unwrap();
        registry.get_or_create(Scheme::Local).unwrap();

        let change = BundleUpdate::new().region("eu-west-1");
        let noop = BundleUpdate::new();
        let changed = registry
            .update_many([(Scheme::Memory, &change), (Scheme::Local, &noop)])
            .unwrap();

        assert_eq!(changed, vec![Scheme::Memory]);
        assert_eq!(registry.cached_schemes(), vec![Scheme::Local]);
    }

    #[test]
    fn test_factory_failure_is_backend_unavailable() {
        let mut registry = AccessorRegistry::new(Settings::default());
        registry
            .register(Scheme::R2, accessor_factory(|_| Err(Error::Config("missing account".into()))))
            .unwrap();
        let err = registry.get_or_create(Scheme::R2).err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable { ref scheme, .. } if scheme == "r2"));
        assert_eq!(registry.generation(Scheme::R2), 0);
    }

    #[test]
    fn test_invalid_settings_fail_every_lookup() {
        let registry = AccessorRegistry::from_resolved(Err(Error::Config(
            "UNIPATH_NUM_WORKERS must be a number, got 'many'".into(),
        )));
        assert!(registry.settings_error().is_some_and(|e| e.contains("UNIPATH_NUM_WORKERS")));
        for scheme in [Scheme::Local, Scheme::Memory, Scheme::S3] {
            let err = registry.get_or_create(scheme).err().unwrap();
            assert!(matches!(err, Error::Config(ref reason) if reason.contains("many")));
        }
        assert!(registry.cached_schemes().is_empty());
    }

    #[test]
    fn test_resolved_settings_have_no_error() {
        let registry = AccessorRegistry::from_resolved(Ok(Settings::default()));
        assert!(registry.settings_error().is_none());
        assert!(registry.get_or_create(Scheme::Memory).is_ok());
    }

    #[test]
    fn test_concurrent_updates_all_land() {
        let registry = Arc::new(AccessorRegistry::default());
        let barrier = Arc::new(Barrier::new(2));
        let updates = [
            BundleUpdate::new().endpoint("http://minio.local:9000"),
            BundleUpdate::new().region("eu-west-1"),
        ];

        for _ in 0..50 {
            registry.reconfigure(Scheme::Minio, CredentialBundle::default()).unwrap();
            let handles: Vec<_> = updates
                .iter()
                .cloned()
                .map(|update| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        registry.update(Scheme::Minio, &update).unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap());
            }

            let bundle = registry.settings().unwrap().bundle(Scheme::Minio);
            assert_eq!(bundle.endpoint.as_deref(), Some("http://minio.local:9000"));
            assert_eq!(bundle.region.as_deref(), Some("eu-west-1"));
        }
    }

    #[test]
    fn test_invalidate_reports_whether_cached() {
        let registry = AccessorRegistry::default();
        assert!(!registry.invalidate(Scheme::Memory).unwrap());
        registry.get_or_create(Scheme::Memory).unwrap();
        assert!(registry.invalidate(Scheme::Memory).unwrap());
    }
}
