//! Decodes x86 instructions at a patch site so the before and after can be logged

use std::fmt;
use std::str::FromStr;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};
use thiserror::Error;

/// Longest possible x86 instruction
pub const MAX_INSTR_LEN: usize = 15;

/// Error when parsing a [`Bitness`]
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported bitness `{0}`, expected 16, 32 or 64")]
pub struct BitnessError(
    /// Rejected input
    String,
);

/// Decoding mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Bitness {
    /// Real mode
    Bits16,
    /// Protected mode
    Bits32,
    /// Long mode
    #[default]
    Bits64,
}
impl Bitness {
    /// Bitness as expected by [`Decoder`]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}
impl FromStr for Bitness {
    type Err = BitnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16" => Ok(Self::Bits16),
            "32" => Ok(Self::Bits32),
            "64" => Ok(Self::Bits64),
            other => Err(BitnessError(other.to_owned())),
        }
    }
}
impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Decodes the first instruction in `code`, which is located at `ip`.
///
/// Returns `None` if `code` is empty or does not start with a valid instruction.
pub fn decode(code: &[u8], ip: u64, bitness: Bitness) -> Option<Instruction> {
    if code.is_empty() {
        return None;
    }
    let code = &code[..code.len().min(MAX_INSTR_LEN)];
    let mut decoder = Decoder::with_ip(bitness.as_u32(), code, ip, DecoderOptions::NONE);
    let instruction = decoder.decode();
    if instruction.is_invalid() {
        None
    } else {
        Some(instruction)
    }
}

/// Decodes and formats the first instruction in `code` in NASM syntax
pub fn describe(code: &[u8], ip: u64, bitness: Bitness) -> Option<String> {
    let instruction = decode(code, ip, bitness)?;
    let mut formatter = NasmFormatter::new();
    let mut output = String::new();
    formatter.format(&instruction, &mut output);
    Some(output)
}

#[cfg(test)]
mod tests {
    use iced_x86::{Code, Mnemonic};

    use super::{decode, describe, Bitness, BitnessError};

    #[test]
    /// The original Linpack site is a relative call
    fn test_decode_call() {
        let instruction = decode(&[0xe8, 0xf2, 0x30, 0x00, 0x00], 0x1000, Bitness::Bits64).unwrap();
        assert_eq!(instruction.mnemonic(), Mnemonic::Call);
        assert_eq!(instruction.len(), 5);
        assert_eq!(instruction.near_branch_target(), 0x1000 + 5 + 0x30f2);
    }

    #[test]
    /// The patched site loads 1 into eax
    fn test_decode_mov() {
        let instruction = decode(&[0xb8, 0x01, 0x00, 0x00, 0x00], 0, Bitness::Bits64).unwrap();
        assert_eq!(instruction.code(), Code::Mov_r32_imm32);
        assert_eq!(instruction.immediate32(), 1);
        assert!(describe(&[0xb8, 0x01, 0x00, 0x00, 0x00], 0, Bitness::Bits64)
            .unwrap()
            .starts_with("mov eax,"));
    }

    #[test]
    /// Empty and truncated code does not decode
    fn test_decode_invalid() {
        assert!(decode(&[], 0, Bitness::Bits64).is_none());
        // truncated call
        assert!(decode(&[0xe8, 0xf2], 0, Bitness::Bits64).is_none());
    }

    #[test]
    /// Only 16, 32 and 64 are accepted
    fn test_bitness() {
        assert_eq!("32".parse::<Bitness>(), Ok(Bitness::Bits32));
        assert_eq!(Bitness::default().to_string(), "64");
        assert_eq!("8".parse::<Bitness>(), Err(BitnessError("8".to_owned())));
    }
}
