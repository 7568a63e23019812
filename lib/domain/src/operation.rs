use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Category of work unit with its own concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Api,
    Model,
    GalleryImage,
    PreviewImage,
}

impl OperationClass {
    pub const ALL: [OperationClass; 4] = [
        OperationClass::Api,
        OperationClass::Model,
        OperationClass::GalleryImage,
        OperationClass::PreviewImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Api => "api",
            OperationClass::Model => "model",
            OperationClass::GalleryImage => "gallery_image",
            OperationClass::PreviewImage => "preview_image",
        }
    }

    /// Image and model classes move file payloads; api calls do not.
    pub fn is_download(&self) -> bool {
        !matches!(self, OperationClass::Api)
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification reported by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkTimeout,
    NetworkConnection,
    ServerError,
    RateLimit,
    ClientError,
    FileCorruption,
    DiskFull,
    Unknown,
}

impl ErrorCategory {
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorCategory::RateLimit,
            500..=599 => ErrorCategory::ServerError,
            400..=499 => ErrorCategory::ClientError,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Transient failures are worth retrying upstream; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::NetworkTimeout
                | ErrorCategory::NetworkConnection
                | ErrorCategory::ServerError
                | ErrorCategory::RateLimit
                | ErrorCategory::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkTimeout => "network_timeout",
            ErrorCategory::NetworkConnection => "network_connection",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::FileCorruption => "file_corruption",
            ErrorCategory::DiskFull => "disk_full",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state result returned by an operation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failure {
        category: ErrorCategory,
        reason: String,
    },
    Timeout,
}

impl OperationStatus {
    pub fn failure(category: ErrorCategory, reason: impl Into<String>) -> Self {
        OperationStatus::Failure {
            category,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationStatus::Success)
    }
}

/// A unit of work handed to an operation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub class: OperationClass,
    /// Collaborator-defined target, e.g. a model id or image url.
    pub target: String,
}

impl OperationRequest {
    pub fn new(class: OperationClass, target: impl Into<String>) -> Self {
        Self {
            class,
            target: target.into(),
        }
    }
}

/// Terminal record of one completed operation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation_class: OperationClass,
    pub success: bool,
    pub timed_out: bool,
    pub duration: Duration,
    pub timestamp_ms: u64,
}

impl OperationOutcome {
    pub fn success(class: OperationClass, duration: Duration, timestamp_ms: u64) -> Self {
        Self {
            operation_class: class,
            success: true,
            timed_out: false,
            duration,
            timestamp_ms,
        }
    }

    pub fn failure(class: OperationClass, duration: Duration, timestamp_ms: u64) -> Self {
        Self {
            operation_class: class,
            success: false,
            timed_out: false,
            duration,
            timestamp_ms,
        }
    }

    /// Timeouts always count as failures.
    pub fn timeout(class: OperationClass, duration: Duration, timestamp_ms: u64) -> Self {
        Self {
            operation_class: class,
            success: false,
            timed_out: true,
            duration,
            timestamp_ms,
        }
    }

    pub fn from_status(
        class: OperationClass,
        status: &OperationStatus,
        duration: Duration,
        timestamp_ms: u64,
    ) -> Self {
        match status {
            OperationStatus::Success => Self::success(class, duration, timestamp_ms),
            OperationStatus::Failure { .. } => Self::failure(class, duration, timestamp_ms),
            OperationStatus::Timeout => Self::timeout(class, duration, timestamp_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        assert_eq!(ErrorCategory::from_http_status(429), ErrorCategory::RateLimit);
        assert_eq!(ErrorCategory::from_http_status(503), ErrorCategory::ServerError);
        assert_eq!(ErrorCategory::from_http_status(404), ErrorCategory::ClientError);
        assert_eq!(ErrorCategory::from_http_status(302), ErrorCategory::Unknown);
    }

    #[test]
    fn permanent_failures_are_not_transient() {
        assert!(ErrorCategory::RateLimit.is_transient());
        assert!(!ErrorCategory::ClientError.is_transient());
        assert!(!ErrorCategory::DiskFull.is_transient());
        assert!(!ErrorCategory::FileCorruption.is_transient());
    }

    #[test]
    fn timeout_status_maps_to_failed_timed_out_outcome() {
        let outcome = OperationOutcome::from_status(
            OperationClass::Model,
            &OperationStatus::Timeout,
            Duration::from_secs(30),
            1_000,
        );
        assert!(!outcome.success);
        assert!(outcome.timed_out);

        let failed = OperationOutcome::from_status(
            OperationClass::Api,
            &OperationStatus::failure(ErrorCategory::ServerError, "502"),
            Duration::from_millis(40),
            1_000,
        );
        assert!(!failed.success);
        assert!(!failed.timed_out);
    }

    #[test]
    fn class_names_are_snake_case() {
        let json = serde_json::to_string(&OperationClass::GalleryImage).unwrap();
        assert_eq!(json, "\"gallery_image\"");
        assert_eq!(OperationClass::PreviewImage.to_string(), "preview_image");
    }
}
