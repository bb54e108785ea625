//! # Patch
//!
//! This module covers patchers, which rewrite a patch site inside a binary image and remember what they overwrote

pub mod byte;

use thiserror::Error;

use crate::code::x64::MAX_INSTR_LEN;
use crate::pattern::Pattern;

/// All patchers save the bytes they overwrote and are able to revert on-command
///
/// Patchers never touch their input; the patched image is returned as a new buffer so a failed patch leaves nothing half-written.
pub trait Patcher {
    /// Error type that can occur when patching
    type Error;

    /// Patches a copy of `image`
    fn patch(&self, image: &[u8]) -> Result<Patched, Self::Error>;
}

/// Errors when the patch site cannot be located unambiguously
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    /// Pattern does not occur in the image, either because it is already patched or because it is a different build
    #[error("signature `{signature}` not found (already patched or unexpected binary version)")]
    NoMatch {
        /// Pattern that was searched for
        signature: Pattern,
    },
    /// Pattern occurs more than once, so the patch site is ambiguous
    #[error("signature `{signature}` matched {} times at offsets {}, expected exactly one", .offsets.len(), format_offsets(.offsets))]
    MultipleMatches {
        /// Pattern that was searched for
        signature: Pattern,
        /// Every offset the signature was found at
        offsets: Vec<usize>,
    },
}
impl PatchError {
    /// Offsets the signature was found at. Empty for [`PatchError::NoMatch`]
    pub fn offsets(&self) -> &[usize] {
        match self {
            Self::NoMatch { .. } => &[],
            Self::MultipleMatches { offsets, .. } => offsets,
        }
    }
}

/// Formats offsets as a comma-separated hex list
fn format_offsets(offsets: &[usize]) -> String {
    offsets
        .iter()
        .map(|offset| format!("{:#x}", offset))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A successfully patched image
///
/// Holds the bytes that were overwritten so the original image can be reconstructed with [`Patched::restore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patched {
    /// Patched copy of the image
    image: Vec<u8>,
    /// Offset of the patch site
    offset: usize,
    /// Original data from the patch site
    original: Vec<u8>,
}
impl Patched {
    /// Creates a new [`Patched`]. `original` must be the bytes at `offset` before the patch was applied
    pub(crate) fn new(image: Vec<u8>, offset: usize, original: Vec<u8>) -> Self {
        debug_assert!(offset + original.len() <= image.len());
        Self {
            image,
            offset,
            original,
        }
    }
    /// Offset of the patch site
    pub fn offset(&self) -> usize {
        self.offset
    }
    /// The patched image
    pub fn image(&self) -> &[u8] {
        &self.image
    }
    /// Bytes that were at the patch site before patching
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }
    /// Bytes now at the patch site
    pub fn patched_bytes(&self) -> &[u8] {
        &self.image[self.range()]
    }
    /// Up to one instruction's worth of the patched image, starting at the patch site. Always covers the patched bytes
    pub fn site(&self) -> &[u8] {
        let len = MAX_INSTR_LEN.max(self.original.len());
        let end = self.image.len().min(self.offset + len);
        &self.image[self.offset..end]
    }
    /// Same window as [`Patched::site`], as it read before patching
    pub fn original_site(&self) -> Vec<u8> {
        let mut site = self.site().to_vec();
        site[..self.original.len()].copy_from_slice(&self.original);
        site
    }
    /// Consumes the result, returning the patched image
    pub fn into_image(self) -> Vec<u8> {
        self.image
    }
    /// Reverts the patch, returning the original image
    pub fn restore(mut self) -> Vec<u8> {
        let range = self.range();
        self.image[range].copy_from_slice(&self.original);
        self.image
    }

    /// Range of the patch site in the image
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.original.len()
    }
}
