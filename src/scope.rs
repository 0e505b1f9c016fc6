//! Scopes: resolution sites owning per-scope instance caches

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::definition::{Definition, Lifetime};
use crate::error::{DiError, DiResult};
use crate::instance::{Instance, InstanceCache, ResolutionFrame};
use crate::key::{request_label, CapabilityId, Qualifier, ScopeTag};
use crate::parameter::Parameters;
use crate::registry::Selection;
use crate::resolver::{Resolver, ResolverCore};

/// Id of the implicit root scope of every resolver.
pub const ROOT_SCOPE_ID: &str = "root";

static NEXT_SCOPE_UID: AtomicU64 = AtomicU64::new(1);

/// State of one scope instance; shared by every handle to it.
pub(crate) struct ScopeState {
    /// Distinguishes scope instances even across id reuse
    pub(crate) uid: u64,
    pub(crate) id: String,
    pub(crate) tag: Option<ScopeTag>,
    pub(crate) cache: InstanceCache,
    pub(crate) closed: AtomicBool,
}

impl ScopeState {
    pub(crate) fn new(id: String, tag: Option<ScopeTag>) -> Self {
        Self {
            uid: NEXT_SCOPE_UID.fetch_add(1, Ordering::Relaxed),
            id,
            tag,
            cache: InstanceCache::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(ROOT_SCOPE_ID.to_string(), None)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Resolution site: the root scope of a resolver or a user-created scope.
///
/// Handles are cheap to clone and safe to share across threads; closing
/// any handle closes the scope for all of them. Lookups try the scope's
/// own tag first and fall back to root-level definitions, so a scope sees
/// everything the root sees plus its own.
#[derive(Clone)]
pub struct Scope {
    pub(crate) core: Arc<ResolverCore>,
    pub(crate) state: Arc<ScopeState>,
}

impl Scope {
    /// Resolve the unqualified definition for `T`.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.resolve::<T>(&Qualifier::None, &Parameters::none())
    }

    /// Resolve the definition for `T` named `name`.
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> DiResult<Arc<T>> {
        self.resolve::<T>(&Qualifier::named(name), &Parameters::none())
    }

    /// Resolve the unqualified definition for `T`, handing `parameters`
    /// to the constructor if one runs.
    pub fn get_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        parameters: Parameters,
    ) -> DiResult<Arc<T>> {
        self.resolve::<T>(&Qualifier::None, &parameters)
    }

    /// Resolve the definition for `T` named `name` with parameters.
    pub fn get_named_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        parameters: Parameters,
    ) -> DiResult<Arc<T>> {
        self.resolve::<T>(&Qualifier::named(name), &parameters)
    }

    /// Resolve one instance per reachable definition serving `T`, over
    /// every qualifier: the scope's own definitions plus root-level ones.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
        self.ensure_open()?;
        let capability = CapabilityId::of::<T>();
        let definitions = self
            .core
            .registry
            .find_reachable(capability, self.state.tag.as_ref());

        let mut out = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let instance = self.resolve_definition(definition, &Parameters::none())?;
            out.push(materialize::<T>(definition, &instance, capability)?);
        }
        Ok(out)
    }

    /// Scope id, unique among the live scopes of one resolver.
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Tag this scope was created under; `None` for the root scope.
    pub fn tag(&self) -> Option<&ScopeTag> {
        self.state.tag.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.state.tag.is_none() && self.state.id == ROOT_SCOPE_ID
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Handle to the owning resolver.
    pub fn resolver(&self) -> Resolver {
        Resolver::from_core(self.core.clone())
    }

    /// Typed property lookup, cloned out of the resolver's store.
    pub fn property<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.core.properties.get(key)
    }

    /// Property lookup with a fallback.
    pub fn property_or<T: Clone + Send + Sync + 'static>(&self, key: &str, default: T) -> T {
        self.core.properties.get(key).unwrap_or(default)
    }

    /// Close this scope: drop its cached instances and detach it from the
    /// resolver, freeing the id for reuse. Lookups through any handle fail
    /// afterwards. Closing again is a no-op, as is closing the root scope,
    /// which lives as long as its resolver.
    pub fn close(&self) {
        if self.is_root() {
            return;
        }
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.detach_scope(&self.state);
        self.state.cache.clear();
        debug!("Closed scope '{}'", self.state.id);
    }

    /// Construct a definition's instance ahead of first use.
    pub(crate) fn warm(&self, definition: &Arc<Definition>) -> DiResult<()> {
        self.resolve_definition(definition, &Parameters::none())
            .map(|_| ())
    }

    fn ensure_open(&self) -> DiResult<()> {
        if self.state.is_closed() {
            return Err(DiError::ScopeClosed {
                id: self.state.id.clone(),
            });
        }
        Ok(())
    }

    fn resolve<T: ?Sized + Send + Sync + 'static>(
        &self,
        qualifier: &Qualifier,
        parameters: &Parameters,
    ) -> DiResult<Arc<T>> {
        self.ensure_open()?;
        let capability = CapabilityId::of::<T>();

        // Own tag first, then the root-level slice.
        let selection = match self.state.tag.as_ref() {
            Some(tag) => match self.core.registry.select(capability, qualifier, Some(tag)) {
                Selection::None => self.core.registry.select(capability, qualifier, None),
                found => found,
            },
            None => self.core.registry.select(capability, qualifier, None),
        };

        match selection {
            Selection::Unique(definition) => {
                let instance = self.resolve_definition(&definition, parameters)?;
                materialize::<T>(&definition, &instance, capability)
            }
            Selection::Ambiguous(definitions) => {
                let candidates = definitions
                    .iter()
                    .map(|d| d.capability.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DiError::AmbiguousDefinition {
                    request: request_label(capability, qualifier),
                    candidates,
                })
            }
            Selection::None => Err(DiError::DefinitionNotFound {
                request: request_label(capability, qualifier),
            }),
        }
    }

    fn resolve_definition(
        &self,
        definition: &Arc<Definition>,
        parameters: &Parameters,
    ) -> DiResult<Instance> {
        match definition.lifetime {
            Lifetime::Factory => {
                let _frame = ResolutionFrame::enter(
                    definition.id,
                    self.state.uid,
                    definition.capability.name(),
                )?;
                self.construct(definition, parameters)
            }
            // Singles cache at the root and construct against the root
            // scope, whichever scope asked.
            Lifetime::Single => self.root_handle().construct_cached(definition, parameters),
            Lifetime::Scoped => self.construct_cached(definition, parameters),
        }
    }

    fn construct_cached(
        &self,
        definition: &Arc<Definition>,
        parameters: &Parameters,
    ) -> DiResult<Instance> {
        // The frame goes in before the slot lock so a same-thread cycle
        // fails fast instead of self-deadlocking.
        let _frame = ResolutionFrame::enter(
            definition.id,
            self.state.uid,
            definition.capability.name(),
        )?;
        let slot = self.state.cache.slot(definition.id);
        let mut cell = slot.cell.lock();
        if let Some(existing) = cell.as_ref() {
            trace!("Cache hit for '{}'", definition.capability.name());
            return Ok(existing.clone());
        }
        let instance = self.construct(definition, parameters)?;
        // The scope may have closed while the constructor ran; a closed
        // cache holds nothing, so hand the instance out without storing it.
        if self.state.is_closed() {
            return Ok(instance);
        }
        *cell = Some(instance.clone());
        Ok(instance)
    }

    fn construct(
        &self,
        definition: &Arc<Definition>,
        parameters: &Parameters,
    ) -> DiResult<Instance> {
        trace!("Constructing '{}'", definition.capability.name());
        match (definition.constructor)(self, parameters) {
            Ok(instance) => Ok(instance),
            Err(err @ DiError::CyclicDependency { .. }) => Err(err),
            Err(err @ DiError::ConstructorFailed { .. }) => Err(err),
            Err(DiError::Failure { source }) => Err(DiError::ConstructorFailed {
                capability: definition.capability.name().to_string(),
                source,
            }),
            Err(other) => Err(DiError::ConstructorFailed {
                capability: definition.capability.name().to_string(),
                source: Box::new(other),
            }),
        }
    }

    fn root_handle(&self) -> Scope {
        Scope {
            core: self.core.clone(),
            state: self.core.root.clone(),
        }
    }
}

/// Hand the instance out as `T`: directly for the primary capability, or
/// through the matching binding's cast for a secondary one.
fn materialize<T: ?Sized + Send + Sync + 'static>(
    definition: &Definition,
    instance: &Instance,
    capability: CapabilityId,
) -> DiResult<Arc<T>> {
    let mismatch = || DiError::TypeMismatch {
        expected: capability.name().to_string(),
        actual: definition.capability.name().to_string(),
    };
    if definition.capability == capability {
        return instance.downcast::<T>().ok_or_else(mismatch);
    }
    let binding = definition
        .bindings
        .iter()
        .find(|binding| binding.capability == capability)
        .ok_or_else(mismatch)?;
    let cast = (binding.cast)(instance).ok_or_else(mismatch)?;
    cast.downcast::<T>().ok_or_else(mismatch)
}
