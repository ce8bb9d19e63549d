//! Async runtime helpers for blocking callers.
//!
//! Template helpers run synchronously while the transports they drive are
//! async. This module provides the single bridge between the two, reusing the
//! current Tokio runtime when one is available.

use anyhow::anyhow;
use std::future::Future;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task,
};

/// Execute an async future from synchronous code.
///
/// # Arguments
/// - `future`: The future to run to completion.
///
/// # Returns
/// Returns the future's output or an error if a Tokio runtime cannot be used.
///
/// # Notes
/// - Reuses the current multi-thread runtime through `block_in_place`.
/// - A current-thread runtime cannot be blocked from inside; an error is returned.
/// - Falls back to a single-threaded runtime for call sites outside Tokio.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(anyhow!("cannot block on a future from a current-thread runtime"));
        }
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!(error))?
            .block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_outside_a_runtime() {
        let value = block_on_future(async { Ok(21 * 2) }).expect("value");
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reuses_a_multi_thread_runtime() {
        let value = block_on_future(async {
            tokio::task::yield_now().await;
            Ok("done")
        })
        .expect("value");
        assert_eq!(value, "done");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refuses_current_thread_runtime() {
        let error = block_on_future(async { Ok(()) }).expect_err("current thread");
        assert!(error.to_string().contains("current-thread"), "unexpected error: {error}");
    }
}
