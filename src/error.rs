/*!
 * Error types for Tether
 */

use std::fmt;
use std::io;

use tether_connect::DeliveryError;

use crate::config::ConfigIssue;

pub type Result<T> = std::result::Result<T, TetherError>;

#[derive(Debug)]
pub enum TetherError {
    /// I/O error (config files, log files)
    Io(io::Error),

    /// Configuration could not be read or written
    Config(String),

    /// Configuration parsed but failed validation
    InvalidConfig(Vec<ConfigIssue>),

    /// Event filter pattern did not compile
    Filter(String),

    /// Logging could not be initialized
    Logging(String),

    /// Failure reported by the connection client
    Delivery(DeliveryError),

    /// Generic error with message
    Other(String),
}

impl TetherError {
    /// Check if this error is fatal (retrying cannot help)
    pub fn is_fatal(&self) -> bool {
        match self {
            TetherError::Config(_) => true,
            TetherError::InvalidConfig(_) => true,
            TetherError::Filter(_) => true,
            TetherError::Logging(_) => true,
            TetherError::Delivery(err) => !err.is_retryable(),

            TetherError::Io(_) => false,
            TetherError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            TetherError::Io(io_err) => Self::is_io_transient(io_err),
            TetherError::Delivery(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            TetherError::Io(_) => ErrorCategory::IoError,
            TetherError::Config(_) | TetherError::InvalidConfig(_) => ErrorCategory::Configuration,
            TetherError::Filter(_) => ErrorCategory::Validation,
            TetherError::Logging(_) => ErrorCategory::Logging,
            TetherError::Delivery(err) => match err {
                DeliveryError::Authentication(_) | DeliveryError::CertificatePinning(_) => {
                    ErrorCategory::Security
                }
                DeliveryError::Configuration(_) => ErrorCategory::Configuration,
                DeliveryError::NoRuntime | DeliveryError::Closed => ErrorCategory::Lifecycle,
                _ => ErrorCategory::Network,
            },
            TetherError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input (filter patterns)
    Validation,
    /// I/O operation errors
    IoError,
    /// Configuration errors
    Configuration,
    /// Logging setup errors
    Logging,
    /// Connection and transmission errors
    Network,
    /// Authentication and certificate errors
    Security,
    /// Client used after close or outside a runtime
    Lifecycle,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Logging => write!(f, "logging"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TetherError::Io(err) => write!(f, "I/O error: {}", err),
            TetherError::Config(msg) => write!(f, "Configuration error: {}", msg),
            TetherError::InvalidConfig(issues) => {
                write!(f, "Invalid configuration: ")?;
                for (i, issue) in issues.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", issue)?;
                }
                Ok(())
            }
            TetherError::Filter(msg) => write!(f, "Filter error: {}", msg),
            TetherError::Logging(msg) => write!(f, "Logging error: {}", msg),
            TetherError::Delivery(err) => write!(f, "Delivery error: {}", err),
            TetherError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TetherError::Io(err) => Some(err),
            TetherError::Delivery(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TetherError {
    fn from(err: io::Error) -> Self {
        TetherError::Io(err)
    }
}

impl From<DeliveryError> for TetherError {
    fn from(err: DeliveryError) -> Self {
        TetherError::Delivery(err)
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(err: toml::de::Error) -> Self {
        TetherError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for TetherError {
    fn from(err: toml::ser::Error) -> Self {
        TetherError::Config(format!("TOML serialize error: {}", err))
    }
}

impl From<regex::Error> for TetherError {
    fn from(err: regex::Error) -> Self {
        TetherError::Filter(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(TetherError::Config("test".to_string()).is_fatal());
        assert!(TetherError::Filter("bad pattern".to_string()).is_fatal());
        assert!(TetherError::Delivery(DeliveryError::CertificatePinning("pin".into())).is_fatal());
        assert!(TetherError::Delivery(DeliveryError::Configuration("x".into())).is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!TetherError::Io(io::Error::other("test")).is_fatal());
        assert!(!TetherError::Delivery(DeliveryError::Network("down".into())).is_fatal());
        assert!(!TetherError::Other("test".to_string()).is_fatal());
    }

    #[test]
    fn test_transient_errors() {
        assert!(TetherError::Delivery(DeliveryError::Server("503".into())).is_transient());
        assert!(
            TetherError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_transient()
        );

        assert!(!TetherError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_transient());
        assert!(!TetherError::Config("bad config".to_string()).is_transient());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TetherError::Io(io::Error::other("test")).category(),
            ErrorCategory::IoError
        );
        assert_eq!(
            TetherError::InvalidConfig(Vec::new()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            TetherError::Delivery(DeliveryError::Authentication("denied".into())).category(),
            ErrorCategory::Security
        );
        assert_eq!(
            TetherError::Delivery(DeliveryError::Connection("reset".into())).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            TetherError::Delivery(DeliveryError::Closed).category(),
            ErrorCategory::Lifecycle
        );
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Network.to_string(), "network");
        assert_eq!(ErrorCategory::Security.to_string(), "security");
        assert_eq!(ErrorCategory::Lifecycle.to_string(), "lifecycle");
    }

    #[test]
    fn test_invalid_config_display_lists_issues() {
        let err = TetherError::InvalidConfig(vec![
            ConfigIssue::new("connection.endpoint", "must not be empty"),
            ConfigIssue::new("queue.capacity", "must be greater than zero"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: connection.endpoint: must not be empty; queue.capacity: must be greater than zero"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: TetherError = io::Error::other("disk").into();
        assert!(matches!(err, TetherError::Io(_)));

        let err: TetherError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, TetherError::Filter(_)));

        let err: TetherError = toml::from_str::<toml::Value>("= nope").unwrap_err().into();
        assert!(matches!(err, TetherError::Config(_)));
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;
        let err = TetherError::Delivery(DeliveryError::NotConnected);
        assert!(err.source().is_some());
        assert!(TetherError::Other("x".into()).source().is_none());
    }
}
