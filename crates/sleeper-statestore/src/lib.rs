#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Builds the [StateStore](sleeper_state::StateStore) of each table and
//! keeps it for the life of the process.
//!
//! Create one [StateStoreProvider] at start-up and pass it to everything
//! that needs table-keyed access to state.

mod config;
mod provider;

pub use config::*;
pub use provider::*;
