//! Bounded, interval-based condition wait.

use std::time::Duration;

/// Poll `predicate` until it holds or the attempt counter passes `max_attempts`.
///
/// The predicate is checked once immediately, then again after every
/// `interval` sleep. Returns the number of sleeps taken before it held,
/// or `None` once the counter exceeds `max_attempts`.
pub async fn wait_for<F>(mut predicate: F, max_attempts: u32, interval: Duration) -> Option<u32>
where
    F: FnMut() -> bool,
{
    let mut attempts = 0;
    loop {
        if predicate() {
            return Some(attempts);
        }
        if attempts > max_attempts {
            return None;
        }
        tokio::time::sleep(interval).await;
        attempts += 1;
    }
}
