//! Custom assertion macros
//!
//! Shorter failure output for `Result`s, reasons and the request log of a
//! [`FakeTransport`](super::FakeTransport).

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result failed with the given `SyncError` variant
#[macro_export]
macro_rules! assert_sync_err {
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert that a reason or log line mentions a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            $haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            $haystack,
            $needle
        );
    };
}

/// Assert the exact `VERB path` sequence a fake transport received
#[macro_export]
macro_rules! assert_requests {
    ($transport:expr, [$($line:expr),* $(,)?]) => {
        let expected: Vec<&str> = vec![$($line),*];
        pretty_assertions::assert_eq!($transport.request_lines(), expected);
    };
}
