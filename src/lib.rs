//! Chat groups over a partitioned table store: one table per group holding
//! metadata, membership and message rows, a shared denormalized group list
//! for cheap listing, and per-user reverse indices for "which groups am I
//! in" lookups. Secondary indices are maintained best-effort and reconciled
//! lazily on read.

pub mod common;
pub mod server;
pub mod storage;
