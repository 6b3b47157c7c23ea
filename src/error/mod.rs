/// Retry support for the erase engine
///
/// The error type itself lives at the crate root (`EraseError`); this module
/// holds the retry strategies used around external tools and device writes.
pub mod retry;

pub use retry::{retry_blocking, FixedDelay, RetryStrategy};
