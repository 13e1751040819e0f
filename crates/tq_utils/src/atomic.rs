use std::sync::atomic::Ordering;

/// The ordering used for every atomic operation in tq.
pub const ORDERING: Ordering = Ordering::SeqCst;
