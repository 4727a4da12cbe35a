//! Error types for endpoint operations and for the transfer run as a whole.
//!
//! Two layers are kept apart:
//! - [`OpError`] describes a single endpoint call (rename, remove, get, ...) and is what
//!   transports return. The staging engine inspects it to tell lock contention apart from
//!   hard failures.
//! - [`Error`] is the run-level taxonomy that ends up in result records. Every variant has a
//!   serializable [`ErrorClass`] and an [`ErrorScope`] that decides how far a failure reaches.
//!
//! # Logging Convention
//! The Display implementations show the full anyhow chain, so errors can be logged with `{}`:
//! ```ignore
//! tracing::error!("job failed: {}", &error);
//! ```

use serde::{Deserialize, Serialize};

/// Failure of a single operation against a local or remote endpoint.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The object is held open by another process (sharing/lock violation, busy file).
    #[error("{path} is in use by another process: {source:#}")]
    Locked {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl OpError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(path: impl Into<String>, error: std::io::Error) -> Self {
        let path = path.into();
        if is_lock_error(&error) {
            return OpError::Locked {
                path,
                source: error.into(),
            };
        }
        match error.kind() {
            std::io::ErrorKind::NotFound => OpError::NotFound(path),
            std::io::ErrorKind::AlreadyExists => OpError::AlreadyExists(path),
            _ => OpError::Other(anyhow::Error::new(error).context(format!("operation on {path} failed"))),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, OpError::Locked { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OpError::NotFound(_))
    }
}

/// Returns true if the OS reported that the file is in use rather than missing or forbidden.
pub fn is_lock_error(error: &std::io::Error) -> bool {
    if matches!(
        error.kind(),
        std::io::ErrorKind::ResourceBusy | std::io::ErrorKind::ExecutableFileBusy
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(error.raw_os_error(), Some(32) | Some(33))
}

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Aborts the whole run before any session opens.
    Run,
    /// Aborts the remaining candidates of one job.
    Job,
    /// Affects a single file only.
    Task,
}

/// Serializable discriminant of [`Error`], carried in result records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Configuration,
    Connection,
    PathNotFound,
    LockContention,
    Collision,
    Transfer,
    Cleanup,
    Unexpected,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Connection => "connection",
            ErrorClass::PathNotFound => "path-not-found",
            ErrorClass::LockContention => "lock-contention",
            ErrorClass::Collision => "collision",
            ErrorClass::Transfer => "transfer",
            ErrorClass::Cleanup => "cleanup",
            ErrorClass::Unexpected => "unexpected",
        };
        write!(f, "{name}")
    }
}

/// Run-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to connect to {target}: {source:#}")]
    Connection {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("{path} still locked after {attempts} attempts")]
    LockContention { path: String, attempts: u32 },

    #[error("destination {0} already exists and overwrite is disabled")]
    Collision(String),

    #[error("transfer of {path} failed: {source:#}")]
    Transfer {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cleanup of {path} failed: {source:#}")]
    Cleanup {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration(_) => ErrorClass::Configuration,
            Error::Connection { .. } => ErrorClass::Connection,
            Error::PathNotFound(_) => ErrorClass::PathNotFound,
            Error::LockContention { .. } => ErrorClass::LockContention,
            Error::Collision(_) => ErrorClass::Collision,
            Error::Transfer { .. } => ErrorClass::Transfer,
            Error::Cleanup { .. } => ErrorClass::Cleanup,
            Error::Unexpected(_) => ErrorClass::Unexpected,
        }
    }

    /// Scope of this error when raised while processing a file. `Unexpected` failures of the
    /// job setup (path checks, listing) are job-scoped and reported as such by the job runner.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Configuration(_) => ErrorScope::Run,
            Error::Connection { .. } | Error::PathNotFound(_) => ErrorScope::Job,
            Error::LockContention { .. }
            | Error::Collision(_)
            | Error::Transfer { .. }
            | Error::Cleanup { .. }
            | Error::Unexpected(_) => ErrorScope::Task,
        }
    }

    pub fn transfer(path: impl Into<String>, error: OpError) -> Self {
        Error::Transfer {
            path: path.into(),
            source: error.into(),
        }
    }

    pub fn cleanup(path: impl Into<String>, error: OpError) -> Self {
        Error::Cleanup {
            path: path.into(),
            source: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let not_found = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(OpError::from_io("/a", not_found).is_not_found());
        let exists = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert!(matches!(
            OpError::from_io("/a", exists),
            OpError::AlreadyExists(_)
        ));
        let busy = std::io::Error::from(std::io::ErrorKind::ResourceBusy);
        assert!(OpError::from_io("/a", busy).is_locked());
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let error = OpError::from_io("/a", denied);
        assert!(matches!(error, OpError::Other(_)));
        assert!(format!("{error}").contains("/a"));
    }

    #[test]
    fn scopes_follow_taxonomy() {
        assert_eq!(
            Error::Configuration("x".into()).scope(),
            ErrorScope::Run
        );
        assert_eq!(Error::PathNotFound("/x".into()).scope(), ErrorScope::Job);
        let lock = Error::LockContention {
            path: "/x".into(),
            attempts: 4,
        };
        assert_eq!(lock.scope(), ErrorScope::Task);
        assert_eq!(lock.class(), ErrorClass::LockContention);
        assert_eq!(format!("{lock}"), "/x still locked after 4 attempts");
    }
}
