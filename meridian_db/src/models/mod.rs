pub mod actor;
pub mod capability;
pub mod follow;
pub mod followers_sync;
pub mod inbox_queue;
pub mod object;
pub mod outbox;
pub mod share;
