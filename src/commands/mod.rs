// ABOUTME: Command module aggregator for the highk CLI.
// ABOUTME: One module per command group; all share the Context built from global flags.

mod container;
mod context;
mod cp;
mod hook;
mod login;
pub mod namespace;
pub mod network;
pub mod volume;

pub use container::{
    create, inspect, kill, pause, ps, rename, restart, rm, run, start, stop, unpause, wait,
};
pub use context::Context;
pub use cp::cp;
pub use hook::oci_hook;
pub use login::{login, logout};
