use std::fmt;

use crate::site::Site;

pub type Result<T> = std::result::Result<T, LoweringError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level_str = match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        write!(f, "{}", level_str)
    }
}

/// The failure classes a conversion can end with. None of them are
/// retryable: lowering is deterministic, so a retry fails the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A declared shape entry is neither a non-negative integer nor a symbol name.
    MalformedInputSpec,
    /// No handler is registered for an equation's primitive.
    UnknownOperation,
    /// A registered handler failed while emitting nodes.
    HandlerFailure,
    /// A graph or function output has no recoverable shape/dtype.
    UnresolvedOutputMetadata,
    /// Two provenance sources disagree on the shape/dtype of one name.
    MetadataConflict,
    /// A node, function or initializer name was declared twice with different content.
    DuplicateDeclaration,
    /// The tracing collaborator rejected the callable or its arguments.
    TraceFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind_str = match self {
            ErrorKind::MalformedInputSpec => "malformed input spec",
            ErrorKind::UnknownOperation => "unknown operation",
            ErrorKind::HandlerFailure => "handler failure",
            ErrorKind::UnresolvedOutputMetadata => "unresolved output metadata",
            ErrorKind::MetadataConflict => "metadata conflict",
            ErrorKind::DuplicateDeclaration => "duplicate declaration",
            ErrorKind::TraceFailure => "trace failure",
        };
        write!(f, "{}", kind_str)
    }
}

pub trait GraphErrorExt {
    fn level(&self) -> Level;
    fn message(&self) -> String;
    fn issuer(&self) -> String;
    fn site(&self) -> Option<Site>;
}

impl fmt::Debug for dyn GraphErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let site_str = match self.site() {
            Some(site) => site.to_string(),
            None => "top level".to_string(),
        };
        write!(
            f,
            "LOWERGRAPH | {} | {} | {} | {}",
            self.level(),
            self.issuer(),
            site_str,
            self.message()
        )
    }
}

impl fmt::Display for dyn GraphErrorExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct LoweringError {
    level: Level,
    kind: ErrorKind,
    message: String,
    issuer: String,
    site: Option<Site>,
}

impl LoweringError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LoweringError {
            level: Level::Error,
            kind,
            message: message.into(),
            issuer: "lowergraph".to_string(),
            site: None,
        }
    }

    /// More explicit constructor when you need to set level/issuer.
    pub fn with(level: Level, kind: ErrorKind, message: String, issuer: String, site: Option<Site>) -> Self {
        LoweringError { level, kind, message, issuer, site }
    }

    pub fn malformed_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedInputSpec, message).issued_by("symbols")
    }

    pub fn unknown_operation(primitive: &str) -> Self {
        Self::new(
            ErrorKind::UnknownOperation,
            format!("no handler registered for primitive '{}'", primitive),
        )
        .issued_by("registry")
    }

    pub fn handler(primitive: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::HandlerFailure,
            format!("'{}': {}", primitive, message.into()),
        )
        .issued_by(primitive)
    }

    pub fn unresolved_output(name: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnresolvedOutputMetadata,
            format!("output '{}' has no shape/dtype record: {}", name, detail.into()),
        )
        .issued_by("graph_builder")
    }

    pub fn conflict(name: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MetadataConflict,
            format!("conflicting metadata for '{}': {}", name, detail.into()),
        )
        .issued_by("graph_builder")
    }

    pub fn duplicate(what: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateDeclaration,
            format!("{} '{}' is already declared with different content", what, name),
        )
        .issued_by("graph_builder")
    }

    pub fn trace(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TraceFailure, message).issued_by("tracer")
    }

    pub fn issued_by(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    /// Attach `site` unless a deeper frame already recorded one.
    pub fn at(mut self, site: Site) -> Self {
        if self.site.is_none() {
            self.site = Some(site);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for LoweringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(site) = &self.site {
            write!(f, "{}: {} (at {})", self.kind, self.message, site)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for LoweringError {}

impl GraphErrorExt for LoweringError {
    fn level(&self) -> Level {
        self.level
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        self.issuer.clone()
    }

    fn site(&self) -> Option<Site> {
        self.site.clone()
    }
}
