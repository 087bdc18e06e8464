//! C9: background workers. Each runs on its own interval, independent of
//! the inbound/outbound queue drains, and touches the database directly
//! rather than through a shared in-process queue (§5 "no in-memory
//! queues").

pub mod follower_sync;
pub mod mover;
pub mod poller;
