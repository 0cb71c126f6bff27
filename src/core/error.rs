//! Error handling for kubedeps
//!
//! This module provides the error types and user-facing error reporting for the
//! dependency orchestration engine. The error system follows two principles:
//! 1. **Strongly-typed errors** for precise handling inside the library
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Graph construction**: [`KubedepsError::CycleDetected`],
//!   [`KubedepsError::SourceResolution`], [`KubedepsError::DuplicateDependency`]
//! - **Planning**: [`KubedepsError::UnknownDependency`]
//! - **Configuration**: [`KubedepsError::ConfigNotFound`], [`KubedepsError::ConfigParse`],
//!   [`KubedepsError::UnsupportedConfigVersion`], [`KubedepsError::ProfileNotFound`]
//! - **Tooling**: [`KubedepsError::GitNotFound`], [`KubedepsError::GitCommandError`],
//!   [`KubedepsError::ToolNotFound`]
//!
//! Construction-time and planning-time errors are fatal and surface as
//! [`KubedepsError`]. Per-node failures during a run are recorded as
//! [`NodeOperationError`] inside the run result and never abort the run.
//!
//! # Examples
//!
//! ```rust,no_run
//! use kubedeps::core::{KubedepsError, ErrorContext, user_friendly_error};
//!
//! let error = KubedepsError::UnknownDependency {
//!     name: "bakend".to_string(),
//!     suggestion: Some("backend".to_string()),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::runner::Operation;

/// The main error type for kubedeps operations.
///
/// Every variant carries owned, printable context so the error can be cloned
/// into an [`ErrorContext`] for display without losing information.
#[derive(Error, Debug, Clone)]
pub enum KubedepsError {
    /// A dependency revisits one of its own ancestors.
    ///
    /// `path` lists dependency names from the root to the repeated node,
    /// with the repeated node appearing at both ends of the cycle.
    #[error("Circular dependency detected: {}", path.join(" → "))]
    CycleDetected {
        /// Names along the cycle, root first
        path: Vec<String>,
    },

    /// A declared source could not be fetched, checked out or loaded.
    #[error("Failed to resolve dependency '{name}' from {source_desc}: {reason}")]
    SourceResolution {
        /// Declared dependency name
        name: String,
        /// Human readable description of the source
        source_desc: String,
        /// Underlying cause, already formatted with its chain
        reason: String,
    },

    /// A requested target does not exist in the dependency graph.
    #[error("Unknown dependency '{name}'")]
    UnknownDependency {
        /// The requested name
        name: String,
        /// Closest known name, if any is similar enough
        suggestion: Option<String>,
    },

    /// Two declarations in the same project share a name.
    #[error("Dependency '{name}' is declared more than once in project '{project}'")]
    DuplicateDependency {
        /// Declaring project
        project: String,
        /// Duplicated dependency name
        name: String,
    },

    /// A declaration is structurally invalid.
    #[error("Invalid dependency '{name}': {reason}")]
    InvalidDependency {
        /// Declared dependency name
        name: String,
        /// Why the declaration was rejected
        reason: String,
    },

    /// No project configuration file was found.
    #[error("Project configuration not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// The project configuration could not be parsed.
    #[error("Failed to parse {file}: {reason}")]
    ConfigParse {
        /// Configuration file
        file: String,
        /// Parser message
        reason: String,
    },

    /// The configuration declares a schema version this build cannot read.
    #[error("Unsupported configuration version '{version}'")]
    UnsupportedConfigVersion {
        /// Declared version
        version: String,
    },

    /// A dependency requests a profile its project does not define.
    #[error("Profile '{profile}' is not defined in project '{project}'")]
    ProfileNotFound {
        /// Requested profile
        profile: String,
        /// Project that was loaded
        project: String,
    },

    /// Git executable not found in PATH.
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// Git command returned a non-zero exit status.
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed (e.g. "clone", "fetch", "checkout")
        operation: String,
        /// The error output from the git command
        stderr: String,
    },

    /// A deployment tool (kubectl, helm) is missing.
    #[error("Required tool '{tool}' is not installed or not found in PATH")]
    ToolNotFound {
        /// Tool binary name
        tool: String,
    },

    /// The persisted state cache is unreadable or could not be written.
    #[error("State cache error at {path}: {reason}")]
    StateCacheError {
        /// State file path
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// File system operation failed.
    #[error("I/O error during {operation} on {path}: {reason}")]
    Io {
        /// What was being attempted
        operation: String,
        /// Path involved
        path: String,
        /// OS error message
        reason: String,
    },

    /// Catch-all for errors without a dedicated variant.
    #[error("{message}")]
    Other {
        /// Full message
        message: String,
    },
}

/// Failure of a single node's lifecycle operation during a run.
///
/// These are recorded per node in the run result. They are never fatal to
/// the run; dependents of the failed node are skipped instead.
#[derive(Error, Debug)]
pub enum NodeOperationError {
    /// The executor returned an error.
    #[error("{operation} failed: {source:#}")]
    Failed {
        /// Operation that was attempted
        operation: Operation,
        /// Executor error
        #[source]
        source: anyhow::Error,
    },

    /// The operation did not finish within its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that was attempted
        operation: Operation,
        /// Budget that elapsed
        after: Duration,
    },
}

impl NodeOperationError {
    /// Returns `true` for the timeout variant.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error wrapper that adds details and an actionable suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: KubedepsError,
    /// What the user can do about it
    pub suggestion: Option<String>,
    /// Additional explanation
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without suggestion or details.
    #[must_use]
    pub const fn new(error: KubedepsError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with suggestions.
///
/// Known [`KubedepsError`] variants get tailored advice; I/O and YAML errors
/// are mapped onto the closest variant; everything else keeps its full cause
/// chain in an [`KubedepsError::Other`].
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(known) = error.downcast_ref::<KubedepsError>() {
        return create_error_context(known.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(KubedepsError::Io {
                    operation: "file access".to_string(),
                    path: "unknown".to_string(),
                    reason: io_error.to_string(),
                })
                .with_suggestion("Check file ownership and permissions of the project directory");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(KubedepsError::Io {
                    operation: "file access".to_string(),
                    path: "unknown".to_string(),
                    reason: io_error.to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(yaml_error) = error.downcast_ref::<serde_yaml::Error>() {
        return ErrorContext::new(KubedepsError::ConfigParse {
            file: crate::constants::PROJECT_CONFIG_FILE.to_string(),
            reason: yaml_error.to_string(),
        })
        .with_suggestion("Check the YAML syntax: indentation, list markers and quoting");
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(KubedepsError::Other {
        message,
    })
}

fn create_error_context(error: KubedepsError) -> ErrorContext {
    match &error {
        KubedepsError::CycleDetected { .. } => ErrorContext::new(error)
            .with_suggestion(
                "Remove one of the dependency declarations on the cycle, or pass --allow-cycles to deploy each project once",
            )
            .with_details("A project may not (transitively) depend on itself"),
        KubedepsError::UnknownDependency { suggestion, .. } => {
            let hint = suggestion.as_ref().map_or_else(
                || "Run 'kubedeps tree' to list the dependencies of this project".to_string(),
                |s| format!("Did you mean '{s}'?"),
            );
            ErrorContext::new(error).with_suggestion(hint)
        }
        KubedepsError::SourceResolution { .. } => ErrorContext::new(error).with_suggestion(
            "Check that the dependency path exists, or that the repository URL and revision are reachable",
        ),
        KubedepsError::ConfigNotFound { .. } => ErrorContext::new(error).with_suggestion(format!(
            "Create a {} file in the project directory or pass --project-dir",
            crate::constants::PROJECT_CONFIG_FILE
        )),
        KubedepsError::UnsupportedConfigVersion { .. } => ErrorContext::new(error)
            .with_suggestion(format!(
                "Supported versions: {}",
                crate::constants::SUPPORTED_CONFIG_VERSIONS.join(", ")
            )),
        KubedepsError::ProfileNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Check the 'profile' field of the dependency declaration"),
        KubedepsError::DuplicateDependency { .. } => ErrorContext::new(error)
            .with_suggestion("Dependency names must be unique within one project"),
        KubedepsError::GitNotFound => ErrorContext::new(error)
            .with_suggestion("Install git from https://git-scm.com/ and ensure it is in your PATH"),
        KubedepsError::GitCommandError { stderr, .. } => {
            let details = stderr.trim().to_string();
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Check your network connection and repository credentials")
        }
        KubedepsError::ToolNotFound { tool } => {
            let suggestion = format!("Install {tool} or point the global config at its binary");
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        KubedepsError::StateCacheError { path, .. } => {
            let suggestion = format!("Delete {path} to reset the dependency state");
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = KubedepsError::CycleDetected {
            path: vec!["app".into(), "api".into(), "app".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: app → api → app");
    }

    #[test]
    fn test_unknown_dependency_suggestion() {
        let err = KubedepsError::UnknownDependency {
            name: "bakend".into(),
            suggestion: Some("backend".into()),
        };
        let ctx = user_friendly_error(anyhow::Error::from(err));
        assert_eq!(ctx.suggestion.as_deref(), Some("Did you mean 'backend'?"));
    }

    #[test]
    fn test_generic_error_keeps_chain() {
        let err = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(err);
        let rendered = ctx.to_string();
        assert!(rendered.contains("outer"));
        assert!(rendered.contains("root cause"));
    }

    #[test]
    fn test_timeout_display() {
        let err = NodeOperationError::Timeout {
            operation: Operation::Deploy,
            after: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "deploy timed out after 30s");
    }
}
