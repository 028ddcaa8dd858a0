//! Error types for Stratum operations.

use std::fmt;

/// The primary error type for all Stratum operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed or conflicting schema metadata
    Config(ConfigError),
    /// Illegal object lifecycle transition
    Lifecycle(LifecycleError),
    /// Driver/storage failure (connection, statement execution)
    Storage(StorageError),
    /// Structural invariant violation (row counts, uniqueness)
    Integrity(IntegrityError),
    /// Version-checked write hit a concurrent modification
    Stale(StaleError),
    /// Value/type conversion errors
    Type(TypeError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Reverse-property declaration is self-referential or conflicting
    BadReverseLink,
    /// Property name not present on the type
    UnknownProperty,
    /// Type name not present in the registry
    UnknownType,
    /// More fetch groups than the per-object state word can track
    TooManyFetchGroups,
    /// Registry used before `resolve()` or resolved twice
    NotResolved,
    /// Other invalid metadata
    Invalid,
}

#[derive(Debug)]
pub struct LifecycleError {
    pub kind: LifecycleErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleErrorKind {
    /// Insert on an instance that is already persistent or pending insert
    AlreadyPersistent,
    /// Insert/update/delete on a removed instance
    Removed,
    /// Delete or update on a transient instance
    Transient,
    /// Operation on a stopped instance
    Stopped,
    /// Other illegal flag combination
    IllegalTransition,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
    /// Transient failures may be retried by the fetch path; writes never are.
    pub transient: bool,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Failed to acquire a connection for a data source
    Acquire,
    /// Statement or query execution failed
    Execute,
    /// Connection commit failed
    CommitFailed,
    /// Connection rollback failed
    RollbackFailed,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct IntegrityError {
    pub kind: IntegrityErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityErrorKind {
    /// A should-be-unique fetch returned more than one row
    DuplicateIdentity,
    /// A statement affected zero rows where exactly one row must exist
    MissingRow,
    /// A statement affected a different number of rows than expected
    RowCountMismatch,
}

#[derive(Debug)]
pub struct StaleError {
    pub type_name: String,
    pub message: String,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Convenience constructor for configuration errors.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Convenience constructor for lifecycle-contract violations.
    pub fn lifecycle(kind: LifecycleErrorKind, message: impl Into<String>) -> Self {
        Error::Lifecycle(LifecycleError {
            kind,
            message: message.into(),
        })
    }

    /// Convenience constructor for storage failures.
    pub fn storage(kind: StorageErrorKind, message: impl Into<String>, transient: bool) -> Self {
        Error::Storage(StorageError {
            kind,
            message: message.into(),
            transient,
            source: None,
        })
    }

    /// Convenience constructor for integrity violations.
    pub fn integrity(
        kind: IntegrityErrorKind,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Integrity(IntegrityError {
            kind,
            table: table.into(),
            message: message.into(),
        })
    }

    /// Is this a transient storage failure the fetch path may retry?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(s) if s.transient)
    }

    /// Is this a metadata problem (logged and degraded rather than raised)?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Lifecycle(e) => write!(f, "Lifecycle error: {}", e.message),
            Error::Storage(e) => write!(f, "Storage error: {}", e.message),
            Error::Integrity(e) => {
                write!(f, "Integrity violation on '{}': {}", e.table, e.message)
            }
            Error::Stale(e) => write!(f, "Stale data for '{}': {}", e.type_name, e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.table)
    }
}

impl fmt::Display for StaleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<LifecycleError> for Error {
    fn from(err: LifecycleError) -> Self {
        Error::Lifecycle(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<IntegrityError> for Error {
    fn from(err: IntegrityError) -> Self {
        Error::Integrity(err)
    }
}

impl From<StaleError> for Error {
    fn from(err: StaleError) -> Self {
        Error::Stale(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for Stratum operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flag() {
        let transient = Error::storage(StorageErrorKind::Execute, "timeout", true);
        let permanent = Error::storage(StorageErrorKind::Execute, "syntax", false);
        let integrity = Error::integrity(IntegrityErrorKind::MissingRow, "users", "no row");

        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!integrity.is_retryable());
    }

    #[test]
    fn config_predicate() {
        let err = Error::config(ConfigErrorKind::UnknownProperty, "no such property 'nme'");
        assert!(err.is_config());
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_includes_table() {
        let err = Error::integrity(
            IntegrityErrorKind::DuplicateIdentity,
            "users",
            "2 rows for one identity",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("users"));
        assert!(rendered.contains("2 rows"));
    }
}
