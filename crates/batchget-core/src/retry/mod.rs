//! Retry and backoff policy for transfers and size probes.
//!
//! Classification maps `TransferError`s onto a small set of kinds; the
//! policy turns (attempt, kind) into an exponential backoff decision.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
