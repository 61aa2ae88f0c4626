//! CLI command implementations.

pub mod merge;
pub mod plan;
pub mod poll;
pub mod register;
pub mod resubmit;
pub mod status;
pub mod submit;
