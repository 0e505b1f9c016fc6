//! Resolver: the owning facade over registry, scopes and properties

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::definition::DefinitionId;
use crate::error::{DiError, DiResult};
use crate::key::ScopeTag;
use crate::module::Module;
use crate::parameter::Parameters;
use crate::registry::{DefinitionRegistry, UnloadSummary};
use crate::scope::{Scope, ScopeState, ROOT_SCOPE_ID};

/// Typed property store shared by every scope of a resolver.
#[derive(Default)]
pub(crate) struct PropertyStore {
    values: RwLock<FxHashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl PropertyStore {
    pub(crate) fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.values.write().insert(key.into(), Arc::new(value));
    }

    pub(crate) fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.values
            .read()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub(crate) fn clear(&self) {
        self.values.write().clear();
    }
}

/// Shared internals of one resolver; scope handles keep it alive.
pub(crate) struct ResolverCore {
    pub(crate) registry: DefinitionRegistry,
    pub(crate) root: Arc<ScopeState>,
    pub(crate) scopes: RwLock<FxHashMap<String, Arc<ScopeState>>>,
    pub(crate) properties: PropertyStore,
}

impl ResolverCore {
    fn new() -> Self {
        Self {
            registry: DefinitionRegistry::default(),
            root: Arc::new(ScopeState::root()),
            scopes: RwLock::new(FxHashMap::default()),
            properties: PropertyStore::default(),
        }
    }

    /// Remove a closing scope from the live map; id reuse is legal, so
    /// the entry is only dropped when it still is this very instance.
    pub(crate) fn detach_scope(&self, state: &ScopeState) {
        let mut scopes = self.scopes.write();
        if let Some(current) = scopes.get(&state.id) {
            if current.uid == state.uid {
                scopes.remove(&state.id);
            }
        }
    }
}

/// Entry point of the runtime: loads and unloads modules, resolves
/// root-level definitions and manages scopes.
///
/// Cloning is cheap and shares the same underlying state, so a resolver
/// can be handed to other threads freely.
#[derive(Clone)]
pub struct Resolver {
    core: Arc<ResolverCore>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Fresh resolver with an empty registry and an open root scope.
    pub fn new() -> Self {
        Self {
            core: Arc::new(ResolverCore::new()),
        }
    }

    pub(crate) fn from_core(core: Arc<ResolverCore>) -> Self {
        Self { core }
    }

    /// Load modules, each as an atomic unit, then construct their eager
    /// singles in declaration order.
    ///
    /// A definition conflict rejects the whole conflicting module and
    /// leaves previously loaded modules in place. An eager constructor
    /// failure surfaces after the definitions are already loaded.
    pub fn modules<'a>(&self, modules: impl IntoIterator<Item = &'a Module>) -> DiResult<()> {
        let mut eager = Vec::new();
        for module in modules {
            let outcome = self.core.registry.load(module.definitions())?;
            let displaced: Vec<_> = outcome.displaced.iter().map(|d| d.id).collect();
            self.evict(&displaced);
            eager.extend(outcome.eager);
        }

        let root = self.root_scope();
        for definition in &eager {
            // A later module in the batch may have overridden it already.
            if self.core.registry.is_live(definition) {
                root.warm(definition)?;
            }
        }
        Ok(())
    }

    /// Unload modules. A definition's key is removed only when that very
    /// definition still stands at it; keys taken over by an override stay
    /// and are reported in the summary. Cached instances of the unloaded
    /// definitions are dropped from the root and from every open scope.
    pub fn unload_modules<'a>(
        &self,
        modules: impl IntoIterator<Item = &'a Module>,
    ) -> UnloadSummary {
        let mut summary = UnloadSummary::default();
        for module in modules {
            let part = self.core.registry.unload(module.definitions());
            let ids: Vec<_> = module.definitions().iter().map(|d| d.id).collect();
            self.evict(&ids);
            summary.merge(part);
        }
        debug!(
            "Unloaded modules: {} removed, {} kept",
            summary.removed.len(),
            summary.kept.len()
        );
        summary
    }

    fn evict(&self, ids: &[DefinitionId]) {
        if ids.is_empty() {
            return;
        }
        self.core.root.cache.evict(ids);
        for state in self.core.scopes.read().values() {
            state.cache.evict(ids);
        }
    }

    /// Resolve the unqualified root-level definition for `T`.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.root_scope().get::<T>()
    }

    /// Resolve the root-level definition for `T` named `name`.
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> DiResult<Arc<T>> {
        self.root_scope().get_named::<T>(name)
    }

    /// Resolve the unqualified root-level definition for `T` with
    /// parameters.
    pub fn get_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        parameters: Parameters,
    ) -> DiResult<Arc<T>> {
        self.root_scope().get_with::<T>(parameters)
    }

    /// Resolve the root-level definition for `T` named `name` with
    /// parameters.
    pub fn get_named_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        parameters: Parameters,
    ) -> DiResult<Arc<T>> {
        self.root_scope().get_named_with::<T>(name, parameters)
    }

    /// Resolve one instance per root-level definition serving `T`.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
        self.root_scope().get_all::<T>()
    }

    /// The resolver's implicit root scope.
    pub fn root_scope(&self) -> Scope {
        Scope {
            core: self.core.clone(),
            state: self.core.root.clone(),
        }
    }

    /// Create a scope instance of `tag` under a caller-chosen id. The id
    /// must not collide with a live scope or the root id; it frees up
    /// again when the scope closes.
    pub fn create_scope(
        &self,
        id: impl Into<String>,
        tag: impl Into<ScopeTag>,
    ) -> DiResult<Scope> {
        let id = id.into();
        if id == ROOT_SCOPE_ID {
            return Err(DiError::DuplicateScopeId { id });
        }
        let mut scopes = self.core.scopes.write();
        if scopes.contains_key(&id) {
            return Err(DiError::DuplicateScopeId { id });
        }
        let tag = tag.into();
        debug!("Created scope '{}' (tag '{}')", id, tag);
        let state = Arc::new(ScopeState::new(id.clone(), Some(tag)));
        scopes.insert(id, state.clone());
        Ok(Scope {
            core: self.core.clone(),
            state,
        })
    }

    /// Look up a live scope by id; the root id answers the root scope.
    pub fn scope(&self, id: &str) -> DiResult<Scope> {
        if id == ROOT_SCOPE_ID {
            return Ok(self.root_scope());
        }
        let state = self
            .core
            .scopes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DiError::ScopeNotFound { id: id.to_string() })?;
        Ok(Scope {
            core: self.core.clone(),
            state,
        })
    }

    /// Existing scope under `id`, or a new one of `tag`. An existing
    /// scope wins whatever tag it was created under.
    pub fn get_or_create_scope(&self, id: impl Into<String>, tag: impl Into<ScopeTag>) -> Scope {
        let id = id.into();
        if id == ROOT_SCOPE_ID {
            return self.root_scope();
        }
        let mut scopes = self.core.scopes.write();
        if let Some(state) = scopes.get(&id) {
            return Scope {
                core: self.core.clone(),
                state: state.clone(),
            };
        }
        let tag = tag.into();
        debug!("Created scope '{}' (tag '{}')", id, tag);
        let state = Arc::new(ScopeState::new(id.clone(), Some(tag)));
        scopes.insert(id, state.clone());
        Scope {
            core: self.core.clone(),
            state,
        }
    }

    /// Number of primary definitions currently loaded.
    pub fn definitions_count(&self) -> usize {
        self.core.registry.count()
    }

    /// Store a typed property.
    pub fn set_property<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.core.properties.set(key, value);
    }

    /// Bulk-store string properties, as produced by an external source
    /// such as a file or environment parser.
    pub fn save_properties(&self, properties: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in properties {
            self.core.properties.set(key, value);
        }
    }

    /// Typed property lookup.
    pub fn property<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.core.properties.get(key)
    }

    /// Property lookup with a fallback.
    pub fn property_or<T: Clone + Send + Sync + 'static>(&self, key: &str, default: T) -> T {
        self.core.properties.get(key).unwrap_or(default)
    }

    /// Close every open scope and drop all cached instances, definitions
    /// and properties. Idempotent; outstanding scope handles observe
    /// their scope as closed.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut scopes = self.core.scopes.write();
            scopes.drain().map(|(_, state)| state).collect()
        };
        for state in drained {
            state.closed.store(true, Ordering::SeqCst);
            state.cache.clear();
        }
        self.core.root.closed.store(true, Ordering::SeqCst);
        self.core.root.cache.clear();
        self.core.registry.clear();
        self.core.properties.clear();
        debug!("Resolver closed");
    }
}
