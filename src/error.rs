use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::version::KernelVersion;

/// Result type for fanotify operations
pub type Result<T> = std::result::Result<T, FanotifyError>;

/// Errors that can occur while setting up or running a listener
#[derive(Error, Debug)]
pub enum FanotifyError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The process lacks CAP_SYS_ADMIN
    #[error("require CAP_SYS_ADMIN capability")]
    MissingPrivilege,

    /// The bit/combination of flags is invalid
    #[error("invalid flag combination: {message}")]
    InvalidFlagCombination { message: String },

    /// The feature or flag is unavailable on the running kernel
    #[error("{feature} is unsupported on kernel {version}")]
    UnsupportedOnKernelVersion {
        feature: &'static str,
        version: KernelVersion,
    },

    /// The kernel release string could not be parsed
    #[error("cannot parse kernel release {release:?}")]
    KernelVersion { release: String },

    /// Mount or filesystem mark requested on a per-path listener
    #[error("listener watches individual paths; mount and filesystem marks are not allowed")]
    MountMarkOnPathListener,

    /// Path mark requested on a whole-mount listener
    #[error("listener watches the entire mount; path marks are not allowed")]
    PathMarkOnMountListener,

    /// Invalid path provided
    #[error("invalid path: {}", path.display())]
    InvalidPath { path: PathBuf },

    /// The mount point could not be opened
    #[error("error opening mount point {}: {source}", path.display())]
    MountPoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Allow/deny called on a notification-only listener
    #[error("listener was not created for permission events")]
    NotPermissionListener,

    /// Allow/deny called with an event that is not a permission request
    #[error("event is not a permission event")]
    NotPermissionEvent,

    /// Kernel record format does not match the compiled-in format
    #[error("fanotify metadata version {found} does not match expected version {expected}")]
    IncompatibleMetadataVersion { expected: u8, found: u8 },

    /// System call failed
    #[error("{syscall} failed: {source}")]
    Syscall {
        syscall: &'static str,
        #[source]
        source: io::Error,
    },

    /// `start` called while another thread runs the loop
    #[error("listener is already running")]
    AlreadyRunning,

    /// `start` called after `stop`
    #[error("listener has been stopped")]
    ListenerStopped,
}

impl FanotifyError {
    /// Create a new invalid flag combination error
    pub fn invalid_flags(message: impl Into<String>) -> Self {
        FanotifyError::InvalidFlagCombination {
            message: message.into(),
        }
    }

    /// Create a new invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>) -> Self {
        FanotifyError::InvalidPath { path: path.into() }
    }

    /// Wrap the calling thread's last OS error for `syscall`
    pub fn last_os_error(syscall: &'static str) -> Self {
        FanotifyError::Syscall {
            syscall,
            source: io::Error::last_os_error(),
        }
    }

    /// Returns true for configuration errors, which are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FanotifyError::MissingPrivilege
                | FanotifyError::InvalidFlagCombination { .. }
                | FanotifyError::UnsupportedOnKernelVersion { .. }
                | FanotifyError::KernelVersion { .. }
                | FanotifyError::MountMarkOnPathListener
                | FanotifyError::PathMarkOnMountListener
                | FanotifyError::InvalidPath { .. }
                | FanotifyError::NotPermissionListener
                | FanotifyError::NotPermissionEvent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(FanotifyError::MissingPrivilege.is_configuration());
        assert!(FanotifyError::invalid_flags("x").is_configuration());
        assert!(!FanotifyError::AlreadyRunning.is_configuration());
        assert!(!FanotifyError::IncompatibleMetadataVersion {
            expected: 3,
            found: 2
        }
        .is_configuration());
    }

    #[test]
    fn test_messages() {
        let err = FanotifyError::UnsupportedOnKernelVersion {
            feature: "FAN_REPORT_NAME",
            version: KernelVersion::new(5, 4, 0),
        };
        assert_eq!(err.to_string(), "FAN_REPORT_NAME is unsupported on kernel 5.4.0");
        assert_eq!(
            FanotifyError::MissingPrivilege.to_string(),
            "require CAP_SYS_ADMIN capability"
        );
    }
}
