pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use shellrelay::config::ConfigFile;
use shellrelay::controller::{Controller, ControllerHandle, ControllerOptions};
use shellrelay::exec::PrivilegedExecutor;
use shellrelay::store::DescriptorStore;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ConfigBuilder, DocumentBuilder};
pub use fake_executor::FakeExecutor;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=shellrelay=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    with_timeout_of(Duration::from_secs(5), f).await
}

/// Run a future with an explicit timeout.
pub async fn with_timeout_of<F, T>(limit: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, f)
        .await
        .unwrap_or_else(|_| panic!("Test timed out after {limit:?}"))
}

/// Poll `cond` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Spawn a controller loop on the current runtime.
pub fn spawn_controller(
    cfg: &ConfigFile,
    store: Arc<dyn DescriptorStore>,
    executor: Arc<dyn PrivilegedExecutor>,
    options: ControllerOptions,
) -> (ControllerHandle, JoinHandle<shellrelay::errors::Result<()>>) {
    let controller = Controller::new(cfg, store, executor, options);
    let handle = controller.handle();
    (handle, tokio::spawn(controller.run()))
}
