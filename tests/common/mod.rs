//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::{Duration, Instant};

/// How long helpers wait for background threads before failing a test
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `cond` until it holds or `timeout` expires; returns the final result
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// [`wait_for`] with [`test_timeout`], panicking with `what` on expiry
pub fn expect_within(what: &str, cond: impl FnMut() -> bool) {
    assert!(wait_for(test_timeout(), cond), "timed out waiting for {}", what);
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
