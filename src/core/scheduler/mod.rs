//! Frame scheduling: the dispatcher stamps sequence numbers on the single
//! ingress path, and the worker pool pulls from the shared bounded queue so
//! whichever worker is idle takes the next frame.

pub mod dispatcher;
pub mod encode_worker;
