// src/engine/common.rs
//
// Panic containment for native codec calls.
// A codec that panics on hostile input fails the request, not the worker.

use crate::error::{Result, ThumbnailError};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Run `f`, turning a panic into an error tagged with `label`.
///
/// Labels starting with `decode:` map to `DecodeFailed` (the input was bad);
/// everything else maps to `ProcessingFailed`.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(stage = label, "codec panicked: {message}");
            if label.starts_with("decode:") {
                Err(ThumbnailError::decode_failed(format!(
                    "{label}: panic: {message}"
                )))
            } else {
                Err(ThumbnailError::processing_failed(
                    label,
                    format!("panic: {message}"),
                ))
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
