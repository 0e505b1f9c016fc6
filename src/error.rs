//! Error types for definition loading and instance resolution

use thiserror::Error;

/// Result type alias for resolution operations
pub type DiResult<T> = Result<T, DiError>;

/// Errors that can occur while loading modules or resolving instances
#[derive(Error, Debug)]
pub enum DiError {
    /// No definition matched the requested capability
    #[error("no definition found for {request}. Check your module declarations")]
    DefinitionNotFound { request: String },

    /// Several definitions match the requested capability
    #[error("ambiguous request for {request}: candidates are [{candidates}]")]
    AmbiguousDefinition { request: String, candidates: String },

    /// A definition is already registered under the same key
    #[error("definition already registered for {key}. Mark the replacement as overriding")]
    DefinitionConflict { key: String },

    /// The scope was closed before the call
    #[error("scope '{id}' is closed")]
    ScopeClosed { id: String },

    /// A live scope already uses this id
    #[error("scope id '{id}' is already in use")]
    DuplicateScopeId { id: String },

    /// No live scope has this id
    #[error("no scope found for id '{id}'")]
    ScopeNotFound { id: String },

    /// The global context already holds a started resolver
    #[error("global context is already started")]
    AlreadyStarted,

    /// The global context has no started resolver
    #[error("global context is not started")]
    NotStarted,

    /// No injected parameter satisfied the request
    #[error("no injected parameter for {request}")]
    ParameterNotFound { request: String },

    /// A definition depends on itself, directly or transitively.
    ///
    /// Detection is per thread: a cycle resolved entirely on one thread
    /// fails fast with the dependency path, while a cycle whose edges run
    /// on different threads blocks on the instance locks instead.
    #[error("cyclic dependency: {path}")]
    CyclicDependency { path: String },

    /// A constructor returned an error while building an instance
    #[error("failed to construct '{capability}': {source}")]
    ConstructorFailed {
        capability: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failure raised inside a user constructor; the resolution engine
    /// rewraps it with the identity of the definition under construction
    #[error("constructor failure: {source}")]
    Failure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A resolved instance did not carry the requested type
    #[error("instance for '{expected}' has unexpected type '{actual}'")]
    TypeMismatch { expected: String, actual: String },
}

impl DiError {
    /// Wrap an arbitrary error raised inside a constructor.
    pub fn failure(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        DiError::Failure { source: err.into() }
    }
}
