// src/error.rs
//
// Unified error handling for the thumbnail proxy
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - Input: the source image or request cannot be served as asked
// - ResourceLimit: dimension/pixel/time ceilings
// - Upstream: origin misbehaved or was unreachable
// - Cancelled: the client went away first
// - Internal: codec or library failures that are nobody's input fault

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used by the proxy to pick a response class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unrecognised, corrupt or too-small source; bad request parameters
    Input,
    /// Dimension, pixel-buffer or timeout ceilings
    ResourceLimit,
    /// Origin status or transport failure
    Upstream,
    /// Client disconnected before the work ran
    Cancelled,
    /// Encoder/processing failures and shutdown races
    Internal,
}

/// Thumbnail proxy error types
#[derive(Debug, Error)]
pub enum ThumbnailError {
    // Source errors
    #[error("Unknown image format")]
    UnknownFormat,

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },

    #[error("Image too big: {reason}")]
    TooBig { reason: Cow<'static, str> },

    // Option errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    BadOption {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: Cow<'static, str> },

    // Scheduling errors
    #[error("Thumbnail request aborted")]
    Aborted,

    #[error("Timed out waiting for a processing slot")]
    QueueTimeout,

    #[error("Worker pool is closed")]
    PoolClosed,

    // Origin errors
    #[error("Timed out fetching from origin")]
    FetchTimeout,

    #[error("proxy received {status} {reason}")]
    OriginStatus { status: u16, reason: Cow<'static, str> },

    #[error("Failed to fetch from origin: {message}")]
    OriginFailed { message: Cow<'static, str> },

    // Processing errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Processing failed at {stage}: {message}")]
    ProcessingFailed {
        stage: Cow<'static, str>,
        message: Cow<'static, str>,
    },
}

impl Clone for ThumbnailError {
    fn clone(&self) -> Self {
        match self {
            Self::UnknownFormat => Self::UnknownFormat,
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::TooSmall { width, height } => Self::TooSmall {
                width: *width,
                height: *height,
            },
            Self::TooBig { reason } => Self::TooBig {
                reason: reason.clone(),
            },
            Self::BadOption {
                name,
                value,
                reason,
            } => Self::BadOption {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::InvalidRequest { reason } => Self::InvalidRequest {
                reason: reason.clone(),
            },
            Self::Aborted => Self::Aborted,
            Self::QueueTimeout => Self::QueueTimeout,
            Self::PoolClosed => Self::PoolClosed,
            Self::FetchTimeout => Self::FetchTimeout,
            Self::OriginStatus { status, reason } => Self::OriginStatus {
                status: *status,
                reason: reason.clone(),
            },
            Self::OriginFailed { message } => Self::OriginFailed {
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::ProcessingFailed { stage, message } => Self::ProcessingFailed {
                stage: stage.clone(),
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl ThumbnailError {
    pub fn unknown_format() -> Self {
        Self::UnknownFormat
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn too_small(width: u32, height: u32) -> Self {
        Self::TooSmall { width, height }
    }

    pub fn too_big(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::TooBig {
            reason: reason.into(),
        }
    }

    pub fn bad_option(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::BadOption {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn queue_timeout() -> Self {
        Self::QueueTimeout
    }

    pub fn pool_closed() -> Self {
        Self::PoolClosed
    }

    pub fn fetch_timeout() -> Self {
        Self::FetchTimeout
    }

    /// Origin answered with something other than 200 or 304.
    pub fn origin_status(status: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::OriginStatus {
            status,
            reason: reason.into(),
        }
    }

    pub fn origin_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::OriginFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn processing_failed(
        stage: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ProcessingFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Queue or fetch timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::QueueTimeout | Self::FetchTimeout)
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownFormat
            | Self::DecodeFailed { .. }
            | Self::TooSmall { .. }
            | Self::InvalidRequest { .. } => ErrorCategory::Input,

            Self::TooBig { .. } | Self::QueueTimeout | Self::FetchTimeout => {
                ErrorCategory::ResourceLimit
            }

            Self::OriginStatus { .. } | Self::OriginFailed { .. } => ErrorCategory::Upstream,

            Self::Aborted => ErrorCategory::Cancelled,

            // BadOption is a server-side configuration fault: the Director
            // rejects bad client input before options reach the pipeline.
            Self::BadOption { .. }
            | Self::PoolClosed
            | Self::EncodeFailed { .. }
            | Self::ProcessingFailed { .. } => ErrorCategory::Internal,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ThumbnailError>;
