//! Core pipeline types: configuration, frame ownership, cancellation, the
//! error taxonomy, scheduling and the session glue.

pub mod cancel;
pub mod config;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod scheduler;
