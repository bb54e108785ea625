#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod file;
pub mod patcher;
pub mod pattern;

pub use file::{patch_file, FileError, FileReport, WriteMode};
pub use patcher::byte::SignaturePatcher;
pub use patcher::{PatchError, Patched, Patcher};
pub use pattern::{PatchPair, Pattern};
