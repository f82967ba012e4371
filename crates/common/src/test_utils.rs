//! Test utilities for the tablet driver
//!
//! Provides report builders and timing helpers for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::pen_report;
//!
//! let report = pen_report(0x1234, 0x5678, 0x03ab, 0b101);
//! assert_eq!(report, [0x09, 0x05, 0x34, 0x12, 0x78, 0x56, 0xab, 0x03]);
//! ```

use protocol::{PACKET_LEN, PEN_REPORT_TAG};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a pen position/pressure report
///
/// # Arguments
/// * `x` - X position
/// * `y` - Y position
/// * `pressure` - Tip pressure
/// * `buttons` - Button bitmap (bit0 primary, bit1 aux0, bit2 aux1)
pub fn pen_report(x: u16, y: u16, pressure: u16, buttons: u8) -> [u8; PACKET_LEN] {
    let [x0, x1] = x.to_le_bytes();
    let [y0, y1] = y.to_le_bytes();
    let [p0, p1] = pressure.to_le_bytes();
    [PEN_REPORT_TAG, buttons, x0, x1, y0, y1, p0, p1]
}

/// Build a report with an arbitrary tag and zeroed payload
pub fn tagged_report(tag: u8) -> [u8; PACKET_LEN] {
    [tag, 0, 0, 0, 0, 0, 0, 0]
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was observed. For blocking tests that
/// wait on another thread.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pen_report_layout() {
        let report = pen_report(0x0102, 0x0304, 0x0506, 0x07);
        assert_eq!(report, [0x09, 0x07, 0x02, 0x01, 0x04, 0x03, 0x06, 0x05]);
    }

    #[test]
    fn test_tagged_report() {
        assert_eq!(tagged_report(0xff), [0xff, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_wait_until() {
        assert!(wait_until(Duration::from_millis(10), || true));
        assert!(!wait_until(Duration::from_millis(10), || false));
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
