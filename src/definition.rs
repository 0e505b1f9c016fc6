//! Definitions: recipes for one capability, and the builders that author them

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DiResult;
use crate::instance::Instance;
use crate::key::{CapabilityId, DefinitionKey, Qualifier, ScopeTag};
use crate::parameter::Parameters;
use crate::scope::Scope;

/// Lifecycle policy of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// A new instance on every resolution
    Factory,
    /// One instance per resolver, cached at the root
    Single,
    /// One instance per scope instance of the definition's tag
    Scoped,
}

/// Process-unique definition identity; stable across unload and reload of
/// the same module value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DefinitionId(u64);

static NEXT_DEFINITION_ID: AtomicU64 = AtomicU64::new(1);

impl DefinitionId {
    pub(crate) fn next() -> Self {
        DefinitionId(NEXT_DEFINITION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type Constructor = dyn Fn(&Scope, &Parameters) -> DiResult<Instance> + Send + Sync;
pub(crate) type Caster = dyn Fn(&Instance) -> Option<Instance> + Send + Sync;

/// Secondary capability served by a definition's primary instance.
pub(crate) struct Binding {
    pub(crate) capability: CapabilityId,
    pub(crate) cast: Arc<Caster>,
}

/// A recipe for one capability: constructor, lifecycle policy and the key
/// it is registered under.
pub(crate) struct Definition {
    pub(crate) id: DefinitionId,
    pub(crate) capability: CapabilityId,
    pub(crate) qualifier: Qualifier,
    pub(crate) lifetime: Lifetime,
    pub(crate) scope_tag: Option<ScopeTag>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) eager: bool,
    pub(crate) overriding: bool,
    pub(crate) constructor: Arc<Constructor>,
}

impl Definition {
    pub(crate) fn key(&self) -> DefinitionKey {
        DefinitionKey {
            capability: self.capability,
            qualifier: self.qualifier.clone(),
            scope: self.scope_tag.clone(),
        }
    }
}

/// Author a root-level definition constructed once per resolver.
pub fn single<T, F>(constructor: F) -> DefinitionBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&Scope, &Parameters) -> DiResult<Arc<T>> + Send + Sync + 'static,
{
    DefinitionBuilder::new(Lifetime::Single, constructor)
}

/// Author a root-level definition constructed on every resolution.
pub fn factory<T, F>(constructor: F) -> DefinitionBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&Scope, &Parameters) -> DiResult<Arc<T>> + Send + Sync + 'static,
{
    DefinitionBuilder::new(Lifetime::Factory, constructor)
}

/// Author a definition owned by a scope section, constructed once per
/// scope instance of the section's tag.
pub fn scoped<T, F>(constructor: F) -> ScopedBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&Scope, &Parameters) -> DiResult<Arc<T>> + Send + Sync + 'static,
{
    ScopedBuilder {
        inner: DefinitionBuilder::new(Lifetime::Scoped, constructor),
    }
}

/// Builder for root-level definitions, produced by [`single`] and
/// [`factory`] and consumed by [`Module::declare`](crate::Module::declare).
pub struct DefinitionBuilder<T: ?Sized> {
    lifetime: Lifetime,
    qualifier: Qualifier,
    eager: bool,
    overriding: bool,
    bindings: Vec<Binding>,
    constructor: Arc<Constructor>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: ?Sized + Send + Sync + 'static> DefinitionBuilder<T> {
    fn new<F>(lifetime: Lifetime, constructor: F) -> Self
    where
        F: Fn(&Scope, &Parameters) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        let erased: Arc<Constructor> =
            Arc::new(move |scope, params| constructor(scope, params).map(Instance::of));
        Self {
            lifetime,
            qualifier: Qualifier::None,
            eager: false,
            overriding: false,
            bindings: Vec::new(),
            constructor: erased,
            _marker: PhantomData,
        }
    }

    /// Attach a name, letting several definitions of one capability
    /// coexist.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.qualifier = Qualifier::named(name);
        self
    }

    /// Construct at module load instead of first use. Singles only; the
    /// flag has no effect on factories.
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Replace an existing definition under the same key at load time.
    pub fn overriding(mut self) -> Self {
        self.overriding = true;
        self
    }

    /// Serve capability `B` from the same instance. The cast maps the
    /// primary `Arc`; for trait objects `|c| c` coerces.
    pub fn bind<B>(mut self, cast: fn(Arc<T>) -> Arc<B>) -> Self
    where
        B: ?Sized + Send + Sync + 'static,
    {
        let caster: Arc<Caster> = Arc::new(move |instance: &Instance| {
            instance
                .downcast::<T>()
                .map(|primary| Instance::of(cast(primary)))
        });
        self.bindings.push(Binding {
            capability: CapabilityId::of::<B>(),
            cast: caster,
        });
        self
    }

    pub(crate) fn build(self, scope_tag: Option<ScopeTag>, module_overriding: bool) -> Definition {
        Definition {
            id: DefinitionId::next(),
            capability: CapabilityId::of::<T>(),
            qualifier: self.qualifier,
            lifetime: self.lifetime,
            scope_tag,
            bindings: self.bindings,
            eager: self.eager,
            overriding: self.overriding || module_overriding,
            constructor: self.constructor,
        }
    }
}

/// Builder for scoped definitions, produced by [`scoped`] and accepted
/// only inside a scope section, which attaches its tag.
pub struct ScopedBuilder<T: ?Sized> {
    inner: DefinitionBuilder<T>,
}

impl<T: ?Sized + Send + Sync + 'static> ScopedBuilder<T> {
    /// Attach a name, letting several definitions of one capability
    /// coexist.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.named(name);
        self
    }

    /// Replace an existing definition under the same key at load time.
    pub fn overriding(mut self) -> Self {
        self.inner = self.inner.overriding();
        self
    }

    /// Serve capability `B` from the same instance.
    pub fn bind<B>(mut self, cast: fn(Arc<T>) -> Arc<B>) -> Self
    where
        B: ?Sized + Send + Sync + 'static,
    {
        self.inner = self.inner.bind(cast);
        self
    }

    pub(crate) fn build(self, tag: ScopeTag, module_overriding: bool) -> Definition {
        self.inner.build(Some(tag), module_overriding)
    }
}
