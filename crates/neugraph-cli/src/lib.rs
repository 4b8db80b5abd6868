//! neugraph CLI crate
//!
//! Commands (see [commands]):
//! - pack: JSON or bincode trace description -> VTRC file.
//! - inspect: header, metadata and variable listing of a VTRC file.
//! - plot: open input/output traces, select nodes, run one refresh pass
//!   through the viewer's controller and write the rendered SVG.
//!
//! The binary (src/main.rs) wires up logging and argument parsing and calls
//! [`NeugraphCli::execute`]. The library surface exists so tests can drive
//! commands without spawning a process.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::NeugraphCli;
