// file: src/network/mod.rs
// version: 2.0.0
// guid: s9t0u1v2-w3x4-5678-9012-345678stuvwx

//! Command execution on the local host and on nodes over SSH

pub mod executor;
pub mod local;
pub mod mock;
pub mod pool;
pub mod ssh;

pub use executor::{CommandOutput, RemoteExecutor, SystemInfo};
pub use local::LocalClient;
pub use pool::ExecutorPool;
pub use ssh::SshClient;

