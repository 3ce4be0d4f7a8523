#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Data model for the Sleeper state store.
//!
//! Partitions form a tree over the row-key space. Only leaf partitions own
//! data files. Files are tracked by one lifecycle record per filename and one
//! file-in-partition record per partition the file contributes records to.

mod error;
mod file_info;
mod key;
mod partition;
mod partition_splitter;
mod partition_tree;
mod partitions_from_split_points;
mod region;
mod schema;

pub use error::*;
pub use file_info::*;
pub use key::*;
pub use partition::*;
pub use partition_splitter::*;
pub use partition_tree::*;
pub use partitions_from_split_points::*;
pub use region::*;
pub use schema::*;
