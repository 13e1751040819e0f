/// Perform a runtime assertion, but if it fails, log an error rather than
/// issuing a runtime panic.
///
/// Debug builds still panic, so violated invariants surface in tests.
#[macro_export]
macro_rules! log_assert {
    ($check:expr, $($field:tt)*) => {{
        let check: bool = $check;
        debug_assert!(check);
        if !check {
            tracing::error!($($field)*)
        }
    }}
}

/// Records that the queue reached a state that should be impossible.
///
/// Unlike [log_assert], this never panics, not even in debug builds: callers use it on
/// paths that recover from the bad state (for example by reclaiming a bucket), and those
/// recovery paths are themselves under test.
#[macro_export]
macro_rules! illegal_state {
    ($msg:expr, $($field:tt)*) => {{
        tracing::error!($($field)*, "illegal state: {}", $msg)
    }}
}
