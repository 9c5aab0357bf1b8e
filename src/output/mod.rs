//! The **output** module carries encoded results from the worker pool to
//! disk under capacity budgets.
//!
//! ## Key Components
//!
//! - `coordinator`: single delivery thread enforcing the ordering contract
//!   (strict capture order by default, per-worker order on opt-in)
//! - `writer`: per-destination file writes with deterministic wall-clock
//!   names, temp-then-rename, a latest-pointer file and a sentinel-gated
//!   secondary destination
//! - `retention`: per-destination byte accounting seeded from a startup
//!   directory scan, with background oldest-first eviction
//!
//! The writer runs on the coordinator thread: delivery order and write
//! order are the same order by construction.

pub mod coordinator;
pub mod retention;
pub mod writer;
