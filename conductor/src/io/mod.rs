//! I/O adapters: configuration, on-disk layout, ports and their default implementations.

pub mod config;
pub mod init;
pub mod manifest;
pub mod ports;
pub mod process;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod skills;
pub mod trace;
pub mod workspace_fs;
