//! Helpers shared by sheetflow's integration tests.
//!
//! - [`builders`] assembles datasets and tasks.
//! - [`fakes`] provides scripted processors and observers.

pub mod builders;
pub mod fakes;

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Upper bound on any single awaited step of a test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_EVERY: Duration = Duration::from_millis(5);

/// Install a subscriber whose output the test harness captures.
///
/// The filter is read from `SHEETFLOW_LOG`, then `RUST_LOG`, and defaults to
/// `sheetflow=info`. Safe to call from every test.
pub fn init_tracing() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("SHEETFLOW_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("sheetflow=info"));
        // Keep whichever global subscriber got there first.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `fut`, failing the test if it outlives [`STEP_TIMEOUT`].
pub async fn with_timeout<F: Future>(fut: F) -> F::Output {
    within(STEP_TIMEOUT, fut).await
}

pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => output,
        Err(_) => panic!("test step still pending after {limit:?}"),
    }
}

/// Poll `check` until it yields a value, or give up after [`STEP_TIMEOUT`].
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        if let Some(found) = check() {
            return Some(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_EVERY).await;
    }
}
