#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! State store backend keeping one item per partition and per file record.
//!
//! Every mutation is a single conditional multi-item write, so a writer that
//! loses a race fails immediately and nothing is applied. There is no retry
//! here; callers decide whether to re-read and try again.

mod file_info_store;
mod item_format;
mod partition_store;

pub use file_info_store::*;
pub use partition_store::*;
