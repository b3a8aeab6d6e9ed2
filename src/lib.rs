// ABOUTME: Library root for highk - container lifecycle, networking, volumes and registry login.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod container;
pub mod cp;
pub mod diagnostics;
pub mod error;
pub mod login;
pub mod namespace;
pub mod network;
pub mod output;
pub mod runtime;
pub mod store;
pub mod types;
