//! This module contains a signature patcher, which overwrites the one place a byte pattern occurs

use memchr::memmem;
use tracing::{debug, info, warn};

use super::{PatchError, Patched, Patcher};
use crate::pattern::PatchPair;

/// Returns every offset `needle` starts at in `haystack`, in ascending order.
///
/// Overlapping occurrences are all reported. An empty needle never matches.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let finder = memmem::Finder::new(needle);
    let mut offsets = Vec::new();
    let mut start = 0;
    // restart one past each hit rather than past its end so self-overlapping patterns are all counted
    while let Some(pos) = finder.find(&haystack[start..]) {
        offsets.push(start + pos);
        start += pos + 1;
    }
    offsets
}

/// Patcher that replaces a signature with a same-length replacement.
///
/// Patching only succeeds when the signature occurs exactly once. Zero matches usually mean the image is already
/// patched, and more than one means the site cannot be told apart from a false positive.
#[derive(Clone, Debug, Default)]
pub struct SignaturePatcher {
    /// Pattern to find and the bytes to write over it
    pair: PatchPair,
}
impl SignaturePatcher {
    /// Creates a new [`SignaturePatcher`]
    pub fn new(pair: PatchPair) -> Self {
        Self { pair }
    }
    /// Creates a patcher for the vendor check in `xlinpack_xeon64`
    pub fn linpack_amd() -> Self {
        Self::new(PatchPair::linpack_amd())
    }
}
impl Patcher for SignaturePatcher {
    type Error = PatchError;

    fn patch(&self, image: &[u8]) -> Result<Patched, Self::Error> {
        let signature = self.pair.signature();
        let offsets = find_all(image, signature.as_bytes());
        debug!(
            signature = %signature,
            matches = offsets.len(),
            image_len = image.len(),
            "scanned image"
        );

        if offsets.is_empty() {
            warn!(signature = %signature, "signature not found");
            return Err(PatchError::NoMatch {
                signature: signature.clone(),
            });
        }
        if offsets.len() > 1 {
            warn!(signature = %signature, ?offsets, "signature matched more than once");
            return Err(PatchError::MultipleMatches {
                signature: signature.clone(),
                offsets,
            });
        }
        let offset = offsets[0];

        let end = offset + signature.len();
        let mut patched = image.to_vec();
        let original = patched[offset..end].to_vec();
        patched[offset..end].copy_from_slice(self.pair.replacement().as_bytes());
        info!(
            offset = format_args!("{:#x}", offset),
            replacement = %self.pair.replacement(),
            "patched signature"
        );

        Ok(Patched::new(patched, offset, original))
    }
}

#[cfg(test)]
mod tests {
    use super::{find_all, SignaturePatcher};
    use crate::patcher::{PatchError, Patcher};
    use crate::pattern::{PatchPair, Pattern};

    #[test]
    /// Every occurrence is found, overlapping ones included
    fn test_find_all() {
        assert_eq!(find_all(&[1, 2, 3, 1, 2, 3], &[1, 2]), [0, 3]);
        assert_eq!(find_all(&[1, 2, 3], &[4]), Vec::<usize>::new());
        assert_eq!(find_all(&[1, 2, 3], &[]), Vec::<usize>::new());
        assert_eq!(find_all(&[1], &[1, 2]), Vec::<usize>::new());
        // overlapping occurrences are reported individually
        assert_eq!(find_all(&[0xaa, 0xaa, 0xaa], &[0xaa, 0xaa]), [0, 1]);
    }

    #[test]
    /// Single match is replaced and nothing else changes
    fn test_patch() {
        let image = [0xde, 0xad, 0xe8, 0xf2, 0x30, 0xbe, 0xef];
        let patched = SignaturePatcher::linpack_amd().patch(&image).unwrap();

        assert_eq!(patched.offset(), 2);
        assert_eq!(patched.image(), [0xde, 0xad, 0xb8, 0x01, 0x00, 0xbe, 0xef]);
        assert_eq!(patched.original_bytes(), [0xe8, 0xf2, 0x30]);

        // input is untouched
        assert_eq!(image, [0xde, 0xad, 0xe8, 0xf2, 0x30, 0xbe, 0xef]);
        assert_eq!(patched.restore(), image);
    }

    #[test]
    /// Signature at the very start and end of the image
    fn test_patch_bounds() {
        let patcher = SignaturePatcher::linpack_amd();
        let patched = patcher.patch(&[0xe8, 0xf2, 0x30]).unwrap();
        assert_eq!(patched.into_image(), [0xb8, 0x01, 0x00]);

        let patched = patcher.patch(&[0x00, 0xe8, 0xf2, 0x30]).unwrap();
        assert_eq!(patched.offset(), 1);
        assert_eq!(patched.into_image(), [0x00, 0xb8, 0x01, 0x00]);
    }

    #[test]
    /// Images without the signature are rejected
    fn test_no_match() {
        let patcher = SignaturePatcher::linpack_amd();
        let err = patcher.patch(&[0x00, 0x11, 0x22, 0x33]).unwrap_err();
        assert!(matches!(err, PatchError::NoMatch { .. }));

        assert!(matches!(patcher.patch(&[]), Err(PatchError::NoMatch { .. })));
        // truncated signature
        assert!(matches!(patcher.patch(&[0xe8, 0xf2]), Err(PatchError::NoMatch { .. })));
    }

    #[test]
    /// Two matches are ambiguous and both offsets are reported
    fn test_multiple_matches() {
        let err = SignaturePatcher::linpack_amd()
            .patch(&[0xe8, 0xf2, 0x30, 0x00, 0xe8, 0xf2, 0x30])
            .unwrap_err();
        assert_eq!(err.offsets(), [0, 4]);
    }

    #[test]
    /// Hex text `0e8f230f` contains `e8f230` at an odd nibble, which is not a byte-aligned match
    fn test_straddling_nibbles() {
        let patcher = SignaturePatcher::linpack_amd();
        assert!(matches!(
            patcher.patch(&[0x0e, 0x8f, 0x23, 0x0f]),
            Err(PatchError::NoMatch { .. })
        ));

        // a straddling pseudo-match next to a real one still counts as one
        let patched = patcher
            .patch(&[0x0e, 0x8f, 0x23, 0x0f, 0xe8, 0xf2, 0x30])
            .unwrap();
        assert_eq!(patched.offset(), 4);
    }

    #[test]
    /// A patched image no longer contains the signature, so patching again fails
    fn test_repatch_fails() {
        let patcher = SignaturePatcher::linpack_amd();
        let once = patcher
            .patch(&[0xde, 0xad, 0xe8, 0xf2, 0x30, 0xbe, 0xef])
            .unwrap()
            .into_image();
        assert!(matches!(patcher.patch(&once), Err(PatchError::NoMatch { .. })));
    }

    #[test]
    /// Overlapping matches of a self-overlapping signature are ambiguous
    fn test_overlapping_custom_signature() {
        let pair = PatchPair::new(Pattern::new([0x90, 0x90]), Pattern::new([0xcc, 0xcc])).unwrap();
        let patcher = SignaturePatcher::new(pair);

        let err = patcher.patch(&[0x00, 0x90, 0x90, 0x90, 0x00]).unwrap_err();
        assert_eq!(err.offsets(), [1, 2]);

        let patched = patcher.patch(&[0x00, 0x90, 0x90, 0x00]).unwrap();
        assert_eq!(patched.into_image(), [0x00, 0xcc, 0xcc, 0x00]);
    }
}
