//! Logical messages exchanged between workers, clients and the queue.
//!
//! Everything here is plain data that derives the serde traits; how the messages travel
//! between processes is up to the embedding server.

pub mod buckets;
pub mod jobs;
pub mod queue;
pub mod results;
pub mod workers;
