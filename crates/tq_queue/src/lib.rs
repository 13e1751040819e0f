//! The scheduling core of the test queue.
//!
//! Locks are always taken in the order
//! `container -> holder -> (aliveness | capabilities | history | results collector)`.
//! The leaf locks never call back into a queue.

pub mod aliveness;
pub mod balancing;
pub mod bucket_queue;
pub mod capabilities;
pub mod config;
mod container;
pub mod history;
pub mod holder;
mod job_queue;
pub mod maintenance;
pub mod metrics;
pub mod nothing_to_dequeue;
pub mod permission;
pub mod results_collector;
pub mod server;
