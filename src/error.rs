//! Recorder error taxonomy
//!
//! Every failure surfaced by the recorder carries an [`ErrorCode`] whose
//! numeric value is stable and shared with hosts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric result / failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Generic unknown error
    Unknown,
    /// Capture backend crashed
    ProcessTerminated,
    /// Backend binaries are missing
    MissingBinaries,
    /// Backend could not be reached
    ConnectionOBSError,
    /// A session is already active
    AlreadyRunning,
    /// Split requested but no split options were given at start
    SplitRecordingDisabled,
    MissingOrInvalidParameters,
    NoActiveRecording,
    /// Source or encoder failure
    EncoderError,
    NoDiskSpaceError,
    /// Container finalization failed
    ProcessOutputError,
    /// Output path is not usable
    BadPathError,
    Success,
    /// Stopped because less than the low-water mark was left on disk
    SuccessLowDiskSpace,
    /// Output was produced but capture failed part way (partial video)
    SuccessWithError,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Unknown => -1001,
            ErrorCode::ProcessTerminated => -1000,
            ErrorCode::MissingBinaries => -999,
            ErrorCode::ConnectionOBSError => -998,
            ErrorCode::AlreadyRunning => -997,
            ErrorCode::SplitRecordingDisabled => -12,
            ErrorCode::MissingOrInvalidParameters => -11,
            ErrorCode::NoActiveRecording => -10,
            ErrorCode::EncoderError => -8,
            ErrorCode::NoDiskSpaceError => -7,
            ErrorCode::ProcessOutputError => -4,
            ErrorCode::BadPathError => -1,
            ErrorCode::Success => 0,
            ErrorCode::SuccessLowDiskSpace => 1,
            ErrorCode::SuccessWithError => 2,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        let code = match value {
            -1001 => ErrorCode::Unknown,
            -1000 => ErrorCode::ProcessTerminated,
            -999 => ErrorCode::MissingBinaries,
            -998 => ErrorCode::ConnectionOBSError,
            -997 => ErrorCode::AlreadyRunning,
            -12 => ErrorCode::SplitRecordingDisabled,
            -11 => ErrorCode::MissingOrInvalidParameters,
            -10 => ErrorCode::NoActiveRecording,
            -8 => ErrorCode::EncoderError,
            -7 => ErrorCode::NoDiskSpaceError,
            -4 => ErrorCode::ProcessOutputError,
            -1 => ErrorCode::BadPathError,
            0 => ErrorCode::Success,
            1 => ErrorCode::SuccessLowDiskSpace,
            2 => ErrorCode::SuccessWithError,
            _ => return None,
        };
        Some(code)
    }

    /// Success-class codes (the output is usable)
    pub fn is_success(self) -> bool {
        self.as_i32() >= 0
    }

    /// Usage errors: returned to the caller, never change session state
    pub fn is_caller_error(self) -> bool {
        matches!(
            self,
            ErrorCode::AlreadyRunning
                | ErrorCode::MissingOrInvalidParameters
                | ErrorCode::NoActiveRecording
                | ErrorCode::SplitRecordingDisabled
                | ErrorCode::BadPathError
        )
    }
}

/// Recorder error object
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {})", .code.as_i32())]
pub struct RecorderError {
    pub code: ErrorCode,
    pub message: String,
}

impl RecorderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn already_running() -> Self {
        Self::new(ErrorCode::AlreadyRunning, "A recording session is already active")
    }

    pub fn no_active_recording() -> Self {
        Self::new(ErrorCode::NoActiveRecording, "No active recording")
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingOrInvalidParameters, message)
    }

    pub fn encoder(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncoderError, message)
    }

    pub fn bad_path(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadPathError, message)
    }

    /// Map an I/O failure while writing output
    pub fn from_output_io(err: &std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::new(ErrorCode::NoDiskSpaceError, format!("{}: {}", context, err))
        } else {
            Self::new(ErrorCode::ProcessOutputError, format!("{}: {}", context, err))
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_round_trip() {
        for code in [
            ErrorCode::Unknown,
            ErrorCode::ProcessTerminated,
            ErrorCode::MissingBinaries,
            ErrorCode::ConnectionOBSError,
            ErrorCode::AlreadyRunning,
            ErrorCode::SplitRecordingDisabled,
            ErrorCode::MissingOrInvalidParameters,
            ErrorCode::NoActiveRecording,
            ErrorCode::EncoderError,
            ErrorCode::NoDiskSpaceError,
            ErrorCode::ProcessOutputError,
            ErrorCode::BadPathError,
            ErrorCode::Success,
            ErrorCode::SuccessLowDiskSpace,
            ErrorCode::SuccessWithError,
        ] {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(42), None);
    }

    #[test]
    fn test_success_and_caller_classes() {
        assert!(ErrorCode::SuccessLowDiskSpace.is_success());
        assert!(!ErrorCode::NoDiskSpaceError.is_success());
        assert!(ErrorCode::BadPathError.is_caller_error());
        assert!(!ErrorCode::EncoderError.is_caller_error());
    }

    #[test]
    fn test_storage_full_maps_to_disk_space_error() {
        let err = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let mapped = RecorderError::from_output_io(&err, "write");
        assert_eq!(mapped.code, ErrorCode::NoDiskSpaceError);

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let mapped = RecorderError::from_output_io(&err, "write");
        assert_eq!(mapped.code, ErrorCode::ProcessOutputError);
    }

    #[test]
    fn test_display_includes_code() {
        let err = RecorderError::no_active_recording();
        assert_eq!(err.to_string(), "No active recording (code -10)");
    }
}
