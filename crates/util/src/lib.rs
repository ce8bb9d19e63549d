//! Small helpers shared by the Castor crates.

pub mod async_runtime;
pub mod duration;
pub mod nested;
pub mod redact;

pub use async_runtime::block_on_future;
pub use duration::{DurationError, parse_duration};
pub use nested::{get_nested, remove_nested, set_nested, split_path};
pub use redact::{REDACTED, redact_sensitive};
