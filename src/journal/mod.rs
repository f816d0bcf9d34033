//! Run journal: append-only event log and record digests.

pub mod eventlog;
pub mod hasher;
