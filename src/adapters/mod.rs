//! Adapters implementing the domain ports.

pub mod command;
pub mod git;
pub mod lock;
pub mod scheduler;
pub mod sqlite;
