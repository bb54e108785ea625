//! # Pattern
//!
//! Byte patterns that identify a patch site, and the pairing of a pattern with the bytes written over it

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Call into the vendor check of `xlinpack_xeon64`
pub const LINPACK_AMD_SIGNATURE: [u8; 3] = [0xe8, 0xf2, 0x30];
/// `mov eax, 1` prefix written over [`LINPACK_AMD_SIGNATURE`], so the check always reports a genuine Intel CPU
pub const LINPACK_AMD_REPLACEMENT: [u8; 3] = [0xb8, 0x01, 0x00];

/// Errors when parsing a [`Pattern`] from hex
#[derive(Debug, Error)]
pub enum PatternError {
    /// Input was not valid hex
    #[error("invalid hex pattern: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Input contained no bytes
    #[error("pattern must contain at least one byte")]
    Empty,
}

/// Raw byte pattern
///
/// Parses from hex (`"e8f230"`, `"E8 F2 30"`) and displays as space-separated lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Pattern(Vec<u8>);
impl Pattern {
    /// Creates a new [`Pattern`] from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
    /// Bytes of the pattern
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    /// Length of the pattern in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }
    /// Returns `true` if the pattern has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(compact)?;
        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self(bytes))
    }
}
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({})", self)
    }
}

/// Errors when pairing a signature with its replacement
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchPairError {
    /// An empty signature would match at every offset
    #[error("signature must contain at least one byte")]
    EmptySignature,
    /// Replacement would shift every offset after the patch site
    #[error("replacement is {replacement} bytes but signature is {signature} bytes")]
    LengthMismatch {
        /// Length of the signature
        signature: usize,
        /// Length of the replacement
        replacement: usize,
    },
}

/// A signature and the same-length bytes that replace it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchPair {
    /// Pattern to search for
    signature: Pattern,
    /// Bytes written over the pattern
    replacement: Pattern,
}
impl PatchPair {
    /// Pairs `signature` with `replacement`, rejecting pairs that would not be length-preserving
    pub fn new(signature: Pattern, replacement: Pattern) -> Result<Self, PatchPairError> {
        if signature.is_empty() {
            return Err(PatchPairError::EmptySignature);
        }
        if signature.len() != replacement.len() {
            return Err(PatchPairError::LengthMismatch {
                signature: signature.len(),
                replacement: replacement.len(),
            });
        }
        Ok(Self {
            signature,
            replacement,
        })
    }
    /// The vendor-check patch for `xlinpack_xeon64`
    pub fn linpack_amd() -> Self {
        Self {
            signature: Pattern::new(LINPACK_AMD_SIGNATURE),
            replacement: Pattern::new(LINPACK_AMD_REPLACEMENT),
        }
    }
    /// Pattern to search for
    pub fn signature(&self) -> &Pattern {
        &self.signature
    }
    /// Bytes written over the pattern
    pub fn replacement(&self) -> &Pattern {
        &self.replacement
    }
}
impl Default for PatchPair {
    fn default() -> Self {
        Self::linpack_amd()
    }
}
