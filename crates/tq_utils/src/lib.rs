pub mod atomic;
pub mod log_assert;
pub mod net_protocol;
pub mod server_shutdown;
pub mod time;
pub mod vec_set;
