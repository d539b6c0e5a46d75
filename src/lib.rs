// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # Kubernetes Auto Installer
//!
//! Bootstraps Kubernetes control planes either as a single local node or as a
//! multi-host HA cluster reached over SSH. An `InstallerService` runs any
//! number of installations concurrently; each one walks its step sequence
//! with retries, can be cancelled between steps and is verified at the end.

pub mod cli;
pub mod config;
pub mod error;
pub mod installer;
pub mod logging;
pub mod network;
pub mod steps;

pub use error::{InstallerError, Result};

/// Version information for the installer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
