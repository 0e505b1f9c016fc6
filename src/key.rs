//! Identity of definitions: capability tokens, qualifiers and scope tags

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Equality-comparable token for a requested capability.
///
/// Obtained from a static call, so trait objects work as capabilities the
/// same way concrete types do. Equality and hashing use the type id only;
/// the name is carried for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityId {
    type_id: TypeId,
    type_name: &'static str,
}

impl CapabilityId {
    /// Token for the capability `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Diagnostic name of the capability type.
    pub fn name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for CapabilityId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for CapabilityId {}

impl Hash for CapabilityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

/// Distinguishes several definitions of one capability.
///
/// Two lookups match only when both sides are unqualified or both carry
/// the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Qualifier {
    /// Unqualified; matches only unqualified lookups
    #[default]
    None,
    /// Named; matches lookups carrying the same name
    Named(String),
}

impl Qualifier {
    /// Named qualifier.
    pub fn named(name: impl Into<String>) -> Self {
        Qualifier::Named(name.into())
    }
}

/// The type of a scope; several scope instances may share one tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTag(String);

impl ScopeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        ScopeTag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeTag {
    fn from(tag: &str) -> Self {
        ScopeTag::new(tag)
    }
}

impl From<String> for ScopeTag {
    fn from(tag: String) -> Self {
        ScopeTag(tag)
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key of a definition: capability plus qualifier plus the scope
/// tag it is declared under, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionKey {
    pub capability: CapabilityId,
    pub qualifier: Qualifier,
    pub scope: Option<ScopeTag>,
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type '{}'", self.capability)?;
        if let Qualifier::Named(name) = &self.qualifier {
            write!(f, " (qualifier '{}')", name)?;
        }
        if let Some(tag) = &self.scope {
            write!(f, " (scope '{}')", tag)?;
        }
        Ok(())
    }
}

/// Request description used in not-found and ambiguity errors.
pub(crate) fn request_label(capability: CapabilityId, qualifier: &Qualifier) -> String {
    match qualifier {
        Qualifier::None => format!("type '{}'", capability),
        Qualifier::Named(name) => format!("type '{}' (qualifier '{}')", capability, name),
    }
}
