use std::sync::mpsc::Receiver;
use std::time::Duration;

/// Blocks for up to 5s, panicking with a descriptive message instead of
/// hanging the test suite if a reactor thread never sends what's expected.
pub fn recv_within<T>(rx: &Receiver<T>, what: &str) -> T {
    rx.recv_timeout(Duration::from_secs(5))
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
