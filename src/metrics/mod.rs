//! Lifecycle metrics
//!
//! Thin wrappers over the `metrics` facade so every call site uses the same
//! names and label keys. No recorder is installed here; without one every call
//! is a no-op.

pub mod counters;
pub mod histograms;
pub mod labels;
