use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct TestTimeoutGuard {
    finished: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Abort the test process if it has not finished within `limit`.
///
/// Coordination bugs tend to show up as hangs; aborting with a message beats
/// waiting for the harness timeout.
pub fn test_timeout_guard(limit: Duration) -> TestTimeoutGuard {
    let finished = Arc::new(AtomicBool::new(false));
    let watchdog = Arc::clone(&finished);
    std::thread::spawn(move || {
        std::thread::sleep(limit);
        if !watchdog.load(Ordering::SeqCst) {
            eprintln!(
                "test still running after {}s, assuming a hang; aborting",
                limit.as_secs()
            );
            std::process::abort();
        }
    });
    TestTimeoutGuard { finished }
}

/// Install the test tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
