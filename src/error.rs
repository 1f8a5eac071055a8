//! Error types for Terrastack.
//!
//! This module defines the error hierarchy using `thiserror`. Every stable
//! error kind exposed to callers and tests has its own variant, carrying the
//! context needed for diagnostics (file, line, dotted path). Errors can be
//! accumulated into a single [`TerrastackError::Multiple`] so that one
//! malformed declaration does not hide the others.
//!
//! # Error Categories
//!
//! - **Parse errors**: HCL syntax failures, schema violations, bad imports
//! - **Evaluation errors**: undefined references, redefinitions, cycles
//! - **Stack errors**: invalid metadata, duplicated ids, bad watch paths
//! - **Git errors**: missing default remote, out-of-date local revision
//! - **IO errors**: file system operations with path context

use std::path::PathBuf;
use thiserror::Error;

/// A specialized Result type for Terrastack operations.
pub type Result<T> = std::result::Result<T, TerrastackError>;

/// A source position used in diagnostics.
///
/// Equality of evaluated values never considers origins; they exist purely
/// so error messages can point back at configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// The file the item was declared in.
    pub file: PathBuf,
    /// 1-based line number, or 0 when the parser cannot provide one.
    pub line: usize,
}

impl Origin {
    /// Creates an origin for an item in `file`.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self { file: file.into(), line }
    }

    /// An origin for values that have no configuration source, such as
    /// expressions built directly by tests or drivers.
    #[must_use]
    pub fn synthetic() -> Self {
        Self { file: PathBuf::from("<synthetic>"), line: 0 }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}", self.file.display(), self.line)
        } else {
            write!(f, "{}", self.file.display())
        }
    }
}

/// The main error type for Terrastack.
#[derive(Error, Debug)]
pub enum TerrastackError {
    // =========================================================================
    // I/O and File System Errors
    // =========================================================================
    /// I/O error with path context.
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// The path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No project root marker found walking upward from a directory.
    #[error("project root not found searching upward from '{start}'")]
    RootNotFound {
        /// The directory the search started at
        start: PathBuf,
    },

    /// The project requires a tool version this build does not satisfy.
    #[error("project requires version '{constraint}' but this is {version}")]
    UnsupportedVersion {
        /// The `required_version` constraint from the root configuration
        constraint: String,
        /// The running crate version
        version: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    /// Lexical or syntactic HCL failure.
    #[error("failed to parse '{file}': {message}")]
    HclSyntax {
        /// The file being parsed
        file: PathBuf,
        /// Error message from the HCL parser
        message: String,
        /// Line number (if available)
        line: Option<usize>,
        /// Column number (if available)
        column: Option<usize>,
    },

    /// Structural violation of the configuration schema.
    #[error("invalid configuration in '{file}': {message}")]
    Schema {
        /// The offending file
        file: PathBuf,
        /// Description of the structural issue
        message: String,
    },

    /// Import directive failure (missing file, cycle, forbidden block).
    #[error("import failed in '{file}': {message}")]
    Import {
        /// The importing file
        file: PathBuf,
        /// Error message
        message: String,
    },

    // =========================================================================
    // Evaluation Errors
    // =========================================================================
    /// Expression evaluation failure.
    #[error("eval error at {origin}: {message}")]
    Eval {
        /// Error message
        message: String,
        /// Where the failing expression was declared
        origin: Origin,
    },

    /// The same dotted path was bound twice in the same scope.
    #[error("'{path}' redefined at {origin} (first definition at {previous})")]
    Redefined {
        /// The dotted path that was bound twice
        path: String,
        /// The redefinition site
        origin: Origin,
        /// The first definition site
        previous: Origin,
    },

    /// A labeled block tried to extend a value that is not an object.
    #[error("cannot extend '{path}' at {origin}: value is not an object")]
    CannotExtendObject {
        /// The dotted path being extended
        path: String,
        /// The extension site
        origin: Origin,
    },

    /// A dependency cycle between globals statements.
    #[error("cycle detected evaluating '{path}' at {origin}")]
    Cycle {
        /// The dotted path stuck in the cycle
        path: String,
        /// The declaration site of the stuck statement
        origin: Origin,
    },

    // =========================================================================
    // Stack Errors
    // =========================================================================
    /// Invalid stack metadata.
    #[error("invalid stack at '{file}': {message}")]
    StackValidation {
        /// The file declaring the stack
        file: PathBuf,
        /// Description of the violation
        message: String,
    },

    /// Two stacks share an id (ids are case-insensitive unique).
    #[error("stack id '{id}' used by both '{stack}' and '{other}'")]
    StackDuplicatedId {
        /// The duplicated id
        id: String,
        /// One stack using the id
        stack: String,
        /// The other stack using the id
        other: String,
    },

    /// A stack tag violates the tag charset rules.
    #[error("invalid stack tag '{tag}' in '{file}'")]
    StackInvalidTag {
        /// The offending tag
        tag: String,
        /// The file declaring the stack
        file: PathBuf,
    },

    /// A stack watch entry is outside the project or not a regular file.
    #[error("invalid watch path '{path}' in '{file}': {message}")]
    StackInvalidWatch {
        /// The offending watch entry
        path: String,
        /// The file declaring the stack
        file: PathBuf,
        /// Description of the violation
        message: String,
    },

    // =========================================================================
    // Git / Change Detection Errors
    // =========================================================================
    /// The repository has no usable `origin`/`main` configuration.
    #[error("no default remote configuration: {message}")]
    NoDefaultRemoteConfig {
        /// Description of what is missing
        message: String,
    },

    /// The local default branch diverged from its remote counterpart.
    #[error("local default branch is out of date: {message}")]
    OutdatedLocalRev {
        /// Description of the divergence
        message: String,
    },

    /// Generic git operation error.
    #[error("git error: {message}")]
    Git {
        /// Error message
        message: String,
    },

    // =========================================================================
    // Generation / Execution Errors
    // =========================================================================
    /// Refusal to overwrite a file that is not generated, or a bad target.
    #[error("generation failed for '{path}': {message}")]
    Generate {
        /// The target path
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// One or more commands exited nonzero during a multi-stack run.
    #[error("execution failed in {failures} stack(s)")]
    Run {
        /// Number of stacks whose command failed
        failures: usize,
    },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Internal error (should not happen in normal operation).
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },

    /// Multiple errors occurred.
    #[error("multiple errors occurred ({count} total)")]
    Multiple {
        /// Number of errors
        count: usize,
        /// The individual errors
        errors: Vec<TerrastackError>,
    },
}

impl TerrastackError {
    /// Creates an `Io` error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates an `Eval` error.
    #[must_use]
    pub fn eval(message: impl Into<String>, origin: Origin) -> Self {
        Self::Eval { message: message.into(), origin }
    }

    /// Creates a `Schema` error.
    #[must_use]
    pub fn schema(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Schema { file: file.into(), message: message.into() }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The stable kind identifier for this error.
    ///
    /// These strings are part of the public contract and are matched by
    /// callers and tests.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "IO",
            Self::RootNotFound { .. } => "RootNotFound",
            Self::UnsupportedVersion { .. } => "UnsupportedVersion",
            Self::HclSyntax { .. } => "HCLSyntax",
            Self::Schema { .. } => "Schema",
            Self::Import { .. } => "Import",
            Self::Eval { .. } => "Eval",
            Self::Redefined { .. } => "Redefined",
            Self::CannotExtendObject { .. } => "CannotExtendObject",
            Self::Cycle { .. } => "Cycle",
            Self::StackValidation { .. } => "StackValidation",
            Self::StackDuplicatedId { .. } => "StackDuplicatedID",
            Self::StackInvalidTag { .. } => "StackInvalidTag",
            Self::StackInvalidWatch { .. } => "StackInvalidWatch",
            Self::NoDefaultRemoteConfig { .. } => "NoDefaultRemoteConfig",
            Self::OutdatedLocalRev { .. } => "OutdatedLocalRev",
            Self::Git { .. } => "Git",
            Self::Generate { .. } => "Generate",
            Self::Run { .. } => "Run",
            Self::Internal { .. } => "Internal",
            Self::Multiple { .. } => "Multiple",
        }
    }

    /// Determines if the error is recoverable, i.e. whether processing of
    /// sibling items should continue after collecting it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Eval { .. }
                | Self::Redefined { .. }
                | Self::CannotExtendObject { .. }
                | Self::Cycle { .. }
                | Self::StackValidation { .. }
                | Self::StackInvalidTag { .. }
                | Self::StackInvalidWatch { .. }
                | Self::StackDuplicatedId { .. }
        )
    }

    /// Consolidates multiple errors into a single `Multiple` if there is
    /// more than one. Returns the single error unwrapped, or `Ok(())` when
    /// the list is empty.
    pub fn collect(errors: Vec<Self>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.into_iter().next().unwrap())
        } else {
            Err(Self::Multiple { count: errors.len(), errors })
        }
    }
}

impl From<git2::Error> for TerrastackError {
    fn from(source: git2::Error) -> Self {
        Self::Git { message: source.message().to_string() }
    }
}

impl From<serde_json::Error> for TerrastackError {
    fn from(source: serde_json::Error) -> Self {
        Self::Internal { message: format!("JSON serialization error: {source}") }
    }
}

/// A utility for collecting multiple errors during loading or evaluation.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<TerrastackError>,
}

impl ErrorCollector {
    /// Create a new error collector.
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error to the collection.
    pub fn add(&mut self, error: TerrastackError) {
        self.errors.push(error);
    }

    /// Get the number of collected errors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.len()
    }

    /// Check if there are any errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert to a Result, returning a `Multiple` error if there are any.
    pub fn into_result(self) -> Result<()> {
        TerrastackError::collect(self.errors)
    }

    /// Take the collected errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<TerrastackError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_empty() {
        assert!(TerrastackError::collect(Vec::new()).is_ok());
    }

    #[test]
    fn test_collect_single_is_unwrapped() {
        let err = TerrastackError::internal("boom");
        let folded = TerrastackError::collect(vec![err]).unwrap_err();
        assert_eq!(folded.kind(), "Internal");
    }

    #[test]
    fn test_collect_many_preserves_all() {
        let errors = vec![
            TerrastackError::internal("a"),
            TerrastackError::internal("b"),
            TerrastackError::internal("c"),
        ];
        match TerrastackError::collect(errors).unwrap_err() {
            TerrastackError::Multiple { count, errors } => {
                assert_eq!(count, 3);
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_stable_kinds() {
        let err = TerrastackError::Cycle {
            path: "global.a".to_string(),
            origin: Origin::synthetic(),
        };
        assert_eq!(err.kind(), "Cycle");

        let err = TerrastackError::HclSyntax {
            file: "cfg.tm".into(),
            message: "bad".into(),
            line: Some(3),
            column: None,
        };
        assert_eq!(err.kind(), "HCLSyntax");
    }
}
