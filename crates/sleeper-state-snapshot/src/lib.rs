#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! State store backend keeping each table's partitions and files as
//! immutable Parquet snapshots in an object store.
//!
//! The current snapshot of each kind is named by a revision pointer held in
//! an item table. An update reads the current snapshot, applies the change,
//! writes the result under the next revision and then conditionally moves
//! the pointer. Losing that race re-applies the change to the newer
//! snapshot, up to a bounded number of attempts.

mod file_info_store;
mod partition_store;
mod snapshot_format;
mod snapshot_store;
pub mod stores;

pub use file_info_store::*;
pub use partition_store::*;
pub use snapshot_format::SnapshotRecord;
pub use snapshot_store::*;
pub use stores::{ObjectStoreKey, ObjectStoreRegistry, ObjectStoreUrl};
