//! The federation engine: identity/URL model, HTTP signatures, integrity
//! proofs, resolver/cache, inbound/outbound queues, capability discovery,
//! backfill, background workers, forwarding, and portable-actor
//! replication. Every public operation here is a pure function plus at most
//! one I/O call (§9 "Coroutine/async control flow"), composing under
//! `meridian_server`'s actix runtime the way the teacher's `apub` module
//! composes under its own.

pub mod activity;
pub mod audience;
pub mod backfill;
pub mod capability;
pub mod forwarding;
pub mod identity;
pub mod inbox;
pub mod integrity_proof;
pub mod outbox;
pub mod policy;
pub mod portable;
pub mod resolver;
pub mod signatures;
pub mod workers;
