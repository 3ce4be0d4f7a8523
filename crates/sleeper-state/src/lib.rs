#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Interfaces for the Sleeper state store.
//!
//! The state store tracks the partition tree and the data files of each
//! table. Many independent processes read and mutate it at once, so every
//! mutation is applied through a conditional write on the backend: a writer
//! that loses a race sees a clean failure rather than a partial update.

mod clock;
mod config;
mod error;
mod file_info_store;
pub mod item_table;
mod partition_store;
mod revision;
mod state_store;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use file_info_store::*;
pub use item_table::ItemTable;
pub use partition_store::*;
pub use revision::*;
pub use state_store::*;
