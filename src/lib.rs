//! Definition-based dependency resolution with scopes and dynamic modules.
//!
//! Components are declared in [`Module`]s as factory, single or scoped
//! definitions and resolved through a [`Resolver`] or one of its
//! [`Scope`]s. Modules load and unload at runtime as atomic units, and a
//! process-wide [`context`] can hold one started resolver for code
//! without a handle of its own.
//!
//! ```
//! use armature::prelude::*;
//! use std::sync::Arc;
//!
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! # fn main() -> DiResult<()> {
//! let module = Module::new().declare(single(|_, _| {
//!     Ok(Arc::new(Greeter {
//!         greeting: "hello".to_string(),
//!     }))
//! }));
//!
//! let resolver = Resolver::new();
//! resolver.modules([&module])?;
//!
//! let greeter = resolver.get::<Greeter>()?;
//! assert_eq!(greeter.greeting, "hello");
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod definition;
pub mod error;
mod instance;
pub mod key;
pub mod module;
pub mod parameter;
mod registry;
pub mod resolver;
pub mod scope;

pub use definition::{factory, scoped, single, DefinitionBuilder, Lifetime, ScopedBuilder};
pub use error::{DiError, DiResult};
pub use key::{CapabilityId, DefinitionKey, Qualifier, ScopeTag};
pub use module::{Module, ScopeSection};
pub use parameter::Parameters;
pub use registry::UnloadSummary;
pub use resolver::Resolver;
pub use scope::{Scope, ROOT_SCOPE_ID};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::context;
    pub use crate::parameters;
    pub use crate::{
        factory, scoped, single, DiError, DiResult, Module, Parameters, Qualifier, Resolver,
        Scope, ScopeTag, UnloadSummary,
    };
}
