//! Definition registry: keyed indexes with atomic module load and unload

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::definition::{Definition, DefinitionId, Lifetime};
use crate::error::{DiError, DiResult};
use crate::key::{CapabilityId, DefinitionKey, Qualifier, ScopeTag};

/// Outcome of loading one module's definitions.
pub(crate) struct LoadOutcome {
    /// Eager singles to construct, in declaration order
    pub(crate) eager: Vec<Arc<Definition>>,
    /// Overridden definitions left with no key at all; their cached
    /// instances must go. A displaced definition that still serves bound
    /// keys stays out of this list and keeps its instance.
    pub(crate) displaced: Vec<Arc<Definition>>,
}

/// Per-key report of an unload request.
///
/// A key is `removed` when the definition standing at it was the one
/// being unloaded. It is `kept` when an override took the key over in the
/// meantime, or the definition was never loaded; unloading leaves such
/// keys untouched.
#[derive(Debug, Clone, Default)]
pub struct UnloadSummary {
    /// Keys whose definitions were removed
    pub removed: Vec<DefinitionKey>,
    /// Keys left in place
    pub kept: Vec<DefinitionKey>,
}

impl UnloadSummary {
    /// True when every requested key was removed.
    pub fn is_complete(&self) -> bool {
        self.kept.is_empty()
    }

    pub(crate) fn merge(&mut self, other: UnloadSummary) {
        self.removed.extend(other.removed);
        self.kept.extend(other.kept);
    }
}

/// Lookup result before error mapping.
pub(crate) enum Selection {
    Unique(Arc<Definition>),
    Ambiguous(Vec<Arc<Definition>>),
    None,
}

#[derive(Default)]
struct RegistryInner {
    /// Primary capability index; one definition per key
    primary: FxHashMap<DefinitionKey, Arc<Definition>>,
    /// Secondary (bound) capability index; entries accumulate freely and
    /// ambiguity surfaces at lookup
    bound: FxHashMap<DefinitionKey, Vec<Arc<Definition>>>,
}

/// Thread-safe definition store shared by every scope of one resolver.
#[derive(Default)]
pub(crate) struct DefinitionRegistry {
    inner: RwLock<RegistryInner>,
}

impl DefinitionRegistry {
    /// Load one module's definitions as a unit. The whole batch is
    /// validated before anything is applied, so a conflict loads nothing.
    pub(crate) fn load(&self, definitions: &[Arc<Definition>]) -> DiResult<LoadOutcome> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let mut incoming: FxHashSet<DefinitionKey> = FxHashSet::default();
        for definition in definitions {
            let key = definition.key();
            let taken = inner.primary.contains_key(&key) || incoming.contains(&key);
            if taken && !definition.overriding {
                return Err(DiError::DefinitionConflict {
                    key: key.to_string(),
                });
            }
            incoming.insert(key);
        }

        let mut displaced = Vec::new();
        for definition in definitions {
            // An override takes the exact colliding key only; the prior
            // definition's bound keys stay live until its own module
            // unloads.
            if let Some(previous) = inner.primary.insert(definition.key(), definition.clone()) {
                debug!("Replaced definition for {}", previous.key());
                if previous.bindings.is_empty() {
                    displaced.push(previous);
                }
            }
            for binding in &definition.bindings {
                let key = DefinitionKey {
                    capability: binding.capability,
                    qualifier: definition.qualifier.clone(),
                    scope: definition.scope_tag.clone(),
                };
                inner.bound.entry(key).or_default().push(definition.clone());
            }
        }

        let eager = definitions
            .iter()
            .filter(|d| d.eager && d.lifetime == Lifetime::Single)
            .filter(|d| is_current(inner, d))
            .cloned()
            .collect();

        debug!("Loaded {} definition(s)", definitions.len());
        Ok(LoadOutcome { eager, displaced })
    }

    /// Unload one module's definitions. A primary key is removed only
    /// when the definition standing at it is the one being unloaded;
    /// bound entries are the definition's own keys and go by id either
    /// way.
    pub(crate) fn unload(&self, definitions: &[Arc<Definition>]) -> UnloadSummary {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let mut summary = UnloadSummary::default();
        for definition in definitions {
            let key = definition.key();
            remove_bound(&mut inner.bound, definition);
            if is_current(inner, definition) {
                inner.primary.remove(&key);
                summary.removed.push(key);
            } else {
                summary.kept.push(key);
            }
        }

        if !summary.kept.is_empty() {
            warn!(
                "Unload left {} key(s) in place (overridden or never loaded)",
                summary.kept.len()
            );
        }
        debug!("Unloaded {} definition(s)", summary.removed.len());
        summary
    }

    /// Select the definition answering (capability, qualifier, scope
    /// tag). A primary hit wins; otherwise a sole bound definition is
    /// unique and several are ambiguous.
    pub(crate) fn select(
        &self,
        capability: CapabilityId,
        qualifier: &Qualifier,
        scope: Option<&ScopeTag>,
    ) -> Selection {
        let key = DefinitionKey {
            capability,
            qualifier: qualifier.clone(),
            scope: scope.cloned(),
        };
        let inner = self.inner.read();
        if let Some(definition) = inner.primary.get(&key) {
            return Selection::Unique(definition.clone());
        }
        match inner.bound.get(&key) {
            Some(entries) if entries.len() == 1 => Selection::Unique(entries[0].clone()),
            Some(entries) if !entries.is_empty() => Selection::Ambiguous(entries.clone()),
            _ => Selection::None,
        }
    }

    /// Every definition serving `capability` that is visible from a
    /// resolution site with the given tag: root-level definitions plus
    /// the tag's own.
    pub(crate) fn find_reachable(
        &self,
        capability: CapabilityId,
        tag: Option<&ScopeTag>,
    ) -> Vec<Arc<Definition>> {
        let inner = self.inner.read();
        let visible =
            |key: &DefinitionKey| key.scope.as_ref().map_or(true, |scope| Some(scope) == tag);

        let mut seen: FxHashSet<DefinitionId> = FxHashSet::default();
        let mut out = Vec::new();
        for (key, definition) in &inner.primary {
            if key.capability == capability && visible(key) && seen.insert(definition.id) {
                out.push(definition.clone());
            }
        }
        for (key, entries) in &inner.bound {
            if key.capability == capability && visible(key) {
                for definition in entries {
                    if seen.insert(definition.id) {
                        out.push(definition.clone());
                    }
                }
            }
        }
        out
    }

    /// Whether this exact definition currently stands at its key.
    pub(crate) fn is_live(&self, definition: &Definition) -> bool {
        is_current(&self.inner.read(), definition)
    }

    /// Number of primary definitions currently loaded.
    pub(crate) fn count(&self) -> usize {
        self.inner.read().primary.len()
    }

    pub(crate) fn clear(&self) {
        let mut guard = self.inner.write();
        guard.primary.clear();
        guard.bound.clear();
    }
}

fn is_current(inner: &RegistryInner, definition: &Definition) -> bool {
    inner
        .primary
        .get(&definition.key())
        .map_or(false, |current| current.id == definition.id)
}

fn remove_bound(
    bound: &mut FxHashMap<DefinitionKey, Vec<Arc<Definition>>>,
    definition: &Definition,
) {
    for binding in &definition.bindings {
        let key = DefinitionKey {
            capability: binding.capability,
            qualifier: definition.qualifier.clone(),
            scope: definition.scope_tag.clone(),
        };
        if let Some(entries) = bound.get_mut(&key) {
            entries.retain(|d| d.id != definition.id);
            if entries.is_empty() {
                bound.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::single;

    trait Sink: Send + Sync {}

    struct FileSink;
    impl Sink for FileSink {}

    struct NetSink;
    impl Sink for NetSink {}

    fn definition_of<T: Send + Sync + 'static>(
        value: fn() -> T,
        overriding: bool,
    ) -> Arc<Definition> {
        let builder = single::<T, _>(move |_, _| Ok(Arc::new(value())));
        let builder = if overriding { builder.overriding() } else { builder };
        Arc::new(builder.build(None, false))
    }

    #[test]
    fn test_conflicting_batch_loads_nothing() {
        let registry = DefinitionRegistry::default();
        registry
            .load(&[definition_of(|| 1_u32, false)])
            .unwrap();

        // Same key again plus a fresh type. The fresh type must not leak in.
        let batch = [definition_of(|| 2_u32, false), definition_of(String::new, false)];
        match registry.load(&batch) {
            Err(DiError::DefinitionConflict { .. }) => (),
            _ => panic!("Expected DefinitionConflict error"),
        }
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_override_replaces_and_reports_the_displaced() {
        let registry = DefinitionRegistry::default();
        let first = definition_of(|| 1_u32, false);
        registry.load(std::slice::from_ref(&first)).unwrap();

        let outcome = registry.load(&[definition_of(|| 2_u32, true)]).unwrap();
        assert_eq!(outcome.displaced.len(), 1);
        assert_eq!(outcome.displaced[0].id, first.id);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_unload_keeps_overridden_keys() {
        let registry = DefinitionRegistry::default();
        let first = definition_of(|| 1_u32, false);
        registry.load(std::slice::from_ref(&first)).unwrap();
        registry.load(&[definition_of(|| 2_u32, true)]).unwrap();

        let summary = registry.unload(std::slice::from_ref(&first));
        assert!(summary.removed.is_empty());
        assert_eq!(summary.kept.len(), 1);
        assert!(!summary.is_complete());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_override_leaves_bound_keys_in_place() {
        let registry = DefinitionRegistry::default();
        let file = Arc::new(
            single::<FileSink, _>(|_, _| Ok(Arc::new(FileSink)))
                .bind::<dyn Sink>(|c| c)
                .build(None, false),
        );
        registry.load(std::slice::from_ref(&file)).unwrap();

        // The override takes the exact colliding key only.
        let outcome = registry.load(&[definition_of(|| FileSink, true)]).unwrap();
        assert!(outcome.displaced.is_empty());
        match registry.select(CapabilityId::of::<dyn Sink>(), &Qualifier::None, None) {
            Selection::Unique(found) => assert_eq!(found.id, file.id),
            _ => panic!("Expected a unique bound match"),
        }

        // Unloading the overridden module removes its bound keys even
        // though the primary key stays with the override.
        registry.unload(std::slice::from_ref(&file));
        match registry.select(CapabilityId::of::<dyn Sink>(), &Qualifier::None, None) {
            Selection::None => (),
            _ => panic!("Expected no bound match after unload"),
        }
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_bound_entries_accumulate_and_turn_ambiguous() {
        let registry = DefinitionRegistry::default();
        let file = Arc::new(
            single::<FileSink, _>(|_, _| Ok(Arc::new(FileSink)))
                .bind::<dyn Sink>(|c| c)
                .build(None, false),
        );
        let net = Arc::new(
            single::<NetSink, _>(|_, _| Ok(Arc::new(NetSink)))
                .bind::<dyn Sink>(|c| c)
                .build(None, false),
        );

        registry.load(std::slice::from_ref(&file)).unwrap();
        match registry.select(CapabilityId::of::<dyn Sink>(), &Qualifier::None, None) {
            Selection::Unique(found) => assert_eq!(found.id, file.id),
            _ => panic!("Expected a unique bound match"),
        }

        // A second bound definition loads fine; the tie shows up at lookup.
        registry.load(std::slice::from_ref(&net)).unwrap();
        match registry.select(CapabilityId::of::<dyn Sink>(), &Qualifier::None, None) {
            Selection::Ambiguous(entries) => assert_eq!(entries.len(), 2),
            _ => panic!("Expected an ambiguous match"),
        }

        let reachable = registry.find_reachable(CapabilityId::of::<dyn Sink>(), None);
        assert_eq!(reachable.len(), 2);
    }

    #[test]
    fn test_unload_removes_bound_entries() {
        let registry = DefinitionRegistry::default();
        let file = Arc::new(
            single::<FileSink, _>(|_, _| Ok(Arc::new(FileSink)))
                .bind::<dyn Sink>(|c| c)
                .build(None, false),
        );
        registry.load(std::slice::from_ref(&file)).unwrap();
        registry.unload(std::slice::from_ref(&file));

        match registry.select(CapabilityId::of::<dyn Sink>(), &Qualifier::None, None) {
            Selection::None => (),
            _ => panic!("Expected no match after unload"),
        }
    }

    #[test]
    fn test_scope_tagged_keys_are_invisible_from_root() {
        let registry = DefinitionRegistry::default();
        let tagged = Arc::new(
            crate::definition::scoped::<u32, _>(|_, _| Ok(Arc::new(1)))
                .build(ScopeTag::new("session"), false),
        );
        registry.load(std::slice::from_ref(&tagged)).unwrap();

        match registry.select(CapabilityId::of::<u32>(), &Qualifier::None, None) {
            Selection::None => (),
            _ => panic!("Expected no root-level match"),
        }
        let tag = ScopeTag::new("session");
        match registry.select(CapabilityId::of::<u32>(), &Qualifier::None, Some(&tag)) {
            Selection::Unique(_) => (),
            _ => panic!("Expected a tagged match"),
        }
    }
}
