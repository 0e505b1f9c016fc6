//! Type-erased instances, per-definition caches and the resolution stack

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::definition::DefinitionId;
use crate::error::{DiError, DiResult};

/// Type-erased, shareable instance.
///
/// The erased payload is always the `Arc<T>` a constructor produced, so
/// unsized capabilities (trait objects) round-trip the same way concrete
/// types do.
#[derive(Clone)]
pub(crate) struct Instance {
    erased: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub(crate) fn of<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            erased: Arc::new(value),
        }
    }

    pub(crate) fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.erased.downcast_ref::<Arc<T>>().cloned()
    }
}

/// One cache slot. The mutex is held across check-construct-store, which
/// makes construction at-most-once per slot.
pub(crate) struct Slot {
    pub(crate) cell: Mutex<Option<Instance>>,
}

/// Instance cache of one scope, keyed by definition id.
#[derive(Default)]
pub(crate) struct InstanceCache {
    slots: RwLock<FxHashMap<DefinitionId, Arc<Slot>>>,
}

impl InstanceCache {
    /// Slot for `id`, created empty on first request.
    pub(crate) fn slot(&self, id: DefinitionId) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&id) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Slot {
                    cell: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Drop the slots of the given definitions; the next resolution
    /// constructs afresh.
    pub(crate) fn evict(&self, ids: &[DefinitionId]) {
        let mut slots = self.slots.write();
        for id in ids {
            if slots.remove(id).is_some() {
                trace!("Evicted cached instance for definition {:?}", id);
            }
        }
    }

    /// Drop every cached instance.
    pub(crate) fn clear(&self) {
        let mut slots = self.slots.write();
        if !slots.is_empty() {
            debug!("Cleared {} cached instance slot(s)", slots.len());
        }
        slots.clear();
    }
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

struct Frame {
    definition: DefinitionId,
    cache: u64,
    type_name: &'static str,
}

/// Marks a construction in progress on the current thread. Popping is
/// tied to drop, so early error returns unwind the stack correctly.
pub(crate) struct ResolutionFrame;

impl ResolutionFrame {
    /// Push a frame for (definition, cache), failing with the dependency
    /// path when that pair is already under construction on this thread.
    pub(crate) fn enter(
        definition: DefinitionId,
        cache: u64,
        type_name: &'static str,
    ) -> DiResult<ResolutionFrame> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack
                .iter()
                .any(|frame| frame.definition == definition && frame.cache == cache)
            {
                let mut path: Vec<&str> = stack.iter().map(|frame| frame.type_name).collect();
                path.push(type_name);
                return Err(DiError::CyclicDependency {
                    path: path.join(" -> "),
                });
            }
            stack.push(Frame {
                definition,
                cache,
                type_name,
            });
            Ok(ResolutionFrame)
        })
    }
}

impl Drop for ResolutionFrame {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greet: Send + Sync {
        fn hello(&self) -> String;
    }

    struct English;

    impl Greet for English {
        fn hello(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_instance_roundtrip_concrete() {
        let instance = Instance::of(Arc::new(42_u32));
        assert_eq!(*instance.downcast::<u32>().unwrap(), 42);
        assert!(instance.downcast::<String>().is_none());
    }

    #[test]
    fn test_instance_roundtrip_trait_object() {
        let greeter: Arc<dyn Greet> = Arc::new(English);
        let instance = Instance::of(greeter);
        let back = instance.downcast::<dyn Greet>().unwrap();
        assert_eq!(back.hello(), "hello");
    }

    #[test]
    fn test_cache_returns_the_same_slot() {
        let cache = InstanceCache::default();
        let id = DefinitionId::next();
        let a = cache.slot(id);
        let b = cache.slot(id);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_eviction_resets_the_slot() {
        let cache = InstanceCache::default();
        let id = DefinitionId::next();
        *cache.slot(id).cell.lock() = Some(Instance::of(Arc::new(1_u8)));
        cache.evict(&[id]);
        assert!(cache.slot(id).cell.lock().is_none());
    }

    #[test]
    fn test_resolution_frame_detects_reentry() {
        let definition = DefinitionId::next();
        let _outer = ResolutionFrame::enter(definition, 1, "A").unwrap();

        // Same definition, same cache: a cycle.
        match ResolutionFrame::enter(definition, 1, "A") {
            Err(DiError::CyclicDependency { path }) => assert_eq!(path, "A -> A"),
            _ => panic!("Expected CyclicDependency error"),
        }

        // Same definition, different cache: allowed.
        let _other = ResolutionFrame::enter(definition, 2, "A").unwrap();
    }

    #[test]
    fn test_resolution_frame_pops_on_drop() {
        let definition = DefinitionId::next();
        {
            let _frame = ResolutionFrame::enter(definition, 1, "A").unwrap();
        }
        let _again = ResolutionFrame::enter(definition, 1, "A").unwrap();
    }
}
