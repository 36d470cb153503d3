//! Synthetic multi-channel acquisition: paced signal sources with TTL sync
//! lines, bounded per-source buffers and a manager that runs them together.
pub mod config;
pub mod drivers;
pub mod recorder;
