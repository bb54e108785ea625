//! # Code
//!
//! Helpers for making sense of machine code around a patch site

pub mod x64;
