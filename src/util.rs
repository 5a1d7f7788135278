//! Shared utility modules used across indexlib components.

pub mod bits;
pub mod retry;
pub mod varint;
