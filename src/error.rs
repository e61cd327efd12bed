//! Error taxonomy for the sitemap engine.
//!
//! # Design Decisions
//! - Configuration and pattern errors are fatal to a build and carry the
//!   element location so the failing line of the sitemap can be found
//! - "No match" is not an error: it is a `false` return from `process`
//! - Processing errors wrap the failing stage and its source
//! - Double-build races are prevented by the rebuild lock, never reported

use thiserror::Error;

use crate::components::Role;
use crate::sitemap::Location;

/// Boxed error produced by a pipeline component.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top level error returned by the processor.
#[derive(Error, Debug)]
pub enum SitemapError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl SitemapError {
    /// Short label used for metrics and error maps.
    pub fn kind(&self) -> &'static str {
        match self {
            SitemapError::Configuration(_) => "configuration",
            SitemapError::Pattern(_) => "pattern",
            SitemapError::ResourceNotFound { .. } => "not-found",
            SitemapError::Processing(_) => "processing",
        }
    }
}

/// Malformed matching, translation or variable expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid expression '{expression}' at position {position}: {reason}")]
pub struct PatternError {
    pub expression: String,
    pub position: usize,
    pub reason: String,
}

impl PatternError {
    pub fn new(expression: impl Into<String>, position: usize, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            position,
            reason: reason.into(),
        }
    }
}

/// Malformed or inconsistent sitemap definition.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown element '{element}' at {location}")]
    UnknownElement { element: String, location: Location },

    #[error("Element '{element}' at {location} is not allowed inside '{parent}'")]
    MisplacedElement {
        element: String,
        parent: String,
        location: Location,
    },

    #[error("Missing required attribute '{attribute}' on '{element}' at {location}")]
    MissingAttribute {
        element: String,
        attribute: String,
        location: Location,
    },

    #[error("Invalid value '{value}' for attribute '{attribute}' at {location}: {reason}")]
    InvalidAttribute {
        attribute: String,
        value: String,
        reason: String,
        location: Location,
    },

    #[error("Unresolved {kind} reference '{name}' at {location}")]
    UnresolvedReference {
        kind: String,
        name: String,
        location: Location,
    },

    #[error("Duplicate {kind} '{name}' at {location}")]
    Duplicate {
        kind: String,
        name: String,
        location: Location,
    },

    #[error("Unknown component class '{class}' for role {role} at {location}")]
    UnknownClass {
        role: Role,
        class: String,
        location: Location,
    },

    #[error("Component class '{class}' is registered as {actual}, not {expected} (at {location})")]
    RoleMismatch {
        class: String,
        expected: Role,
        actual: Role,
        location: Location,
    },

    #[error("No {role} component named '{hint}' at {location}")]
    UnknownComponent {
        role: Role,
        hint: String,
        location: Location,
    },

    #[error("Invalid expression at {location}: {source}")]
    Pattern {
        location: Location,
        #[source]
        source: PatternError,
    },

    #[error("Named node '{name}' requested before the link phase")]
    PrematureLookup { name: String },

    #[error("Cannot read sitemap '{uri}': {details}")]
    Unreadable { uri: String, details: String },

    #[error("Malformed sitemap '{source_uri}': {details}")]
    Malformed { source_uri: String, details: String },
}

impl ConfigurationError {
    pub fn pattern(location: &Location, source: PatternError) -> Self {
        ConfigurationError::Pattern {
            location: location.clone(),
            source,
        }
    }
}

/// Failure while executing a request.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("{role} stage failed for '{src}': {source}")]
    Stage {
        role: Role,
        src: String,
        #[source]
        source: BoxError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pool for component '{component}' exhausted ({max} live) after waiting {waited_ms}ms")]
    PoolExhausted {
        component: String,
        max: usize,
        waited_ms: u64,
    },

    #[error("Pipeline is incomplete: {0}")]
    IncompletePipeline(String),

    #[error("Pipeline already has a {0}")]
    StageConflict(Role),

    #[error("Variable '{expression}' cannot be resolved")]
    Unresolved { expression: String },

    #[error("Sitemap '{uri}' could not be built: {details}")]
    BuildFailed { uri: String, details: String },

    #[error("Processor for '{uri}' has been disposed")]
    Disposed { uri: String },

    #[error("Mount '{prefix}' already serves {limit} sitemaps, refusing '{uri}'")]
    MountLimit {
        prefix: String,
        uri: String,
        limit: usize,
    },

    #[error("Too many nested internal requests for '{uri}'")]
    RedirectLoop { uri: String },

    #[error("Resource '{uri}' not found")]
    SourceNotFound { uri: String },
}

impl ProcessingError {
    pub fn stage(role: Role, src: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ProcessingError::Stage {
            role,
            src: src.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = SitemapError> = std::result::Result<T, E>;
