//! Round-robin service lists and per-request selection.

pub mod round_robin;
pub mod selector;
