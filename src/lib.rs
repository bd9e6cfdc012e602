#![forbid(unsafe_code)]

pub mod commands;
pub mod config;
pub mod metrics;
pub mod store;
pub mod version;
pub mod vfs;
