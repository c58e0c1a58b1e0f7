//! Activity logging: append-only JSONL audit trail fed by a logger thread.

pub mod activity;
pub mod jsonl;
