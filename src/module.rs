//! Modules: ordered sets of definitions loaded and unloaded as one unit

use std::sync::Arc;

use crate::definition::{Definition, DefinitionBuilder, ScopedBuilder};
use crate::key::ScopeTag;

/// Ordered collection of definitions; the unit of loading, unloading and
/// override authoring.
///
/// Definitions are frozen as they are declared, so the same module value
/// loaded, unloaded and loaded again refers to the same definitions
/// throughout.
#[derive(Clone, Default)]
pub struct Module {
    definitions: Vec<Arc<Definition>>,
    overriding: bool,
}

impl Module {
    /// Empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty module whose definitions all override on load.
    pub fn overriding() -> Self {
        Self {
            definitions: Vec::new(),
            overriding: true,
        }
    }

    /// Add a root-level definition.
    pub fn declare<T: ?Sized + Send + Sync + 'static>(
        mut self,
        builder: DefinitionBuilder<T>,
    ) -> Self {
        let definition = builder.build(None, self.overriding);
        self.definitions.push(Arc::new(definition));
        self
    }

    /// Add a section of scoped definitions sharing one tag.
    pub fn scope<F>(mut self, tag: impl Into<ScopeTag>, section: F) -> Self
    where
        F: FnOnce(ScopeSection) -> ScopeSection,
    {
        let section = section(ScopeSection {
            tag: tag.into(),
            overriding: self.overriding,
            definitions: Vec::new(),
        });
        self.definitions.extend(section.definitions);
        self
    }

    /// Number of definitions declared in this module.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the module declares nothing.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub(crate) fn definitions(&self) -> &[Arc<Definition>] {
        &self.definitions
    }
}

/// Collector for the scoped definitions of one tag; only scoped builders
/// are accepted, so a scoped definition always carries its tag.
pub struct ScopeSection {
    tag: ScopeTag,
    overriding: bool,
    definitions: Vec<Arc<Definition>>,
}

impl ScopeSection {
    /// Add a scoped definition carrying this section's tag.
    pub fn declare<T: ?Sized + Send + Sync + 'static>(
        mut self,
        builder: ScopedBuilder<T>,
    ) -> Self {
        let definition = builder.build(self.tag.clone(), self.overriding);
        self.definitions.push(Arc::new(definition));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{factory, scoped, single, Lifetime};

    #[test]
    fn test_declarations_keep_their_order() {
        let module = Module::new()
            .declare(single(|_, _| Ok(Arc::new(1_u32))))
            .declare(factory(|_, _| Ok(Arc::new("s".to_string()))));

        assert_eq!(module.len(), 2);
        assert_eq!(module.definitions()[0].lifetime, Lifetime::Single);
        assert_eq!(module.definitions()[1].lifetime, Lifetime::Factory);
    }

    #[test]
    fn test_scope_sections_tag_their_definitions() {
        let module = Module::new()
            .declare(single(|_, _| Ok(Arc::new(1_u32))))
            .scope("session", |s| {
                s.declare(scoped(|_, _| Ok(Arc::new("state".to_string()))))
            });

        assert_eq!(module.len(), 2);
        assert!(module.definitions()[0].scope_tag.is_none());
        assert_eq!(
            module.definitions()[1].scope_tag,
            Some(ScopeTag::new("session"))
        );
    }

    #[test]
    fn test_overriding_module_marks_every_definition() {
        let module = Module::overriding()
            .declare(single(|_, _| Ok(Arc::new(1_u32))))
            .scope("session", |s| s.declare(scoped(|_, _| Ok(Arc::new(2_u64)))));

        assert!(module.definitions().iter().all(|d| d.overriding));
    }

    #[test]
    fn test_cloned_modules_share_definition_identity() {
        let module = Module::new().declare(single(|_, _| Ok(Arc::new(1_u32))));
        let cloned = module.clone();

        assert_eq!(
            module.definitions()[0].id,
            cloned.definitions()[0].id
        );
    }
}
