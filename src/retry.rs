//! The retry controller.
//!
//! Classifies a failed attempt and decides whether the engine re-enters
//! `start()` after the scheduled delay. Progress between attempts earns a
//! fresh budget; the engine resets the attempt counter before asking.
use crate::error::Error;
use crate::options::UploadOptions;

/// Whether `error` should be retried as attempt `retry_attempt`.
///
/// The decision procedure, in order: an exhausted schedule never retries;
/// errors without an originating request (logic and configuration errors)
/// never retry; a user predicate, when installed, decides alone; otherwise
/// the default classification applies.
pub(crate) fn should_retry(error: &Error, retry_attempt: usize, options: &UploadOptions) -> bool {
    if retry_attempt >= options.retry_delays.len() {
        return false;
    }
    if error.request().is_none() {
        return false;
    }
    if let Some(predicate) = &options.callbacks.on_should_retry {
        return predicate(error, retry_attempt);
    }
    default_should_retry(error)
}

/// The default classification: everything retries except client errors,
/// with 409 (conflicting offset) and 423 (resource locked) as the two
/// retriable exceptions in the 4xx class.
pub(crate) fn default_should_retry(error: &Error) -> bool {
    match error.status() {
        Some(status) if (400..500).contains(&status) => matches!(status, 409 | 423),
        _ => true,
    }
}
