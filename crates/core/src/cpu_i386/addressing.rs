//! ModRM/SIB decoding and effective-address resolution
//!
//! Resolution consumes SIB and displacement bytes from the instruction
//! stream, so it advances EIP as a side effect. Resolving the same encoding
//! twice from the same cursor position yields the same address.

use super::memory::{Memory386, MemoryError};
use super::registers::{Register, RegisterFile};
use super::OperandSize;
use crate::logging::{log, LogCategory, LogLevel};

/// `rm` value that introduces a SIB byte
const RM_SIB: u8 = 0b100;
/// `rm` (or SIB base) value that means "disp32, no base" when `mod == 00`
const RM_DISP32: u8 = 0b101;
/// SIB index value meaning "no index register"
const SIB_NO_INDEX: u8 = 0b100;

/// Fetch an immediate of the given width at EIP and advance EIP past it
#[inline]
pub fn fetch<M: Memory386 + ?Sized>(
    regs: &mut RegisterFile,
    memory: &M,
    size: OperandSize,
) -> Result<u32, MemoryError> {
    let eip = regs.eip();
    let value = memory.read_sized(size, eip)?;
    regs.set_eip(eip.wrapping_add(size.bytes()));
    Ok(value)
}

/// Decoded ModR/M byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    /// Addressing mode, bits 7-6
    pub mode: u8,
    /// Register operand or sub-opcode, bits 5-3
    pub reg: u8,
    /// Register-or-memory operand, bits 2-0
    pub rm: u8,
}

impl ModRm {
    #[inline]
    pub fn decode(byte: u8) -> Self {
        Self {
            mode: (byte >> 6) & 0x03,
            reg: (byte >> 3) & 0x07,
            rm: byte & 0x07,
        }
    }

    /// `mod == 11`: the r/m field names a register
    #[inline]
    pub fn is_register(&self) -> bool {
        self.mode == 0b11
    }
}

/// Decoded scale-index-base byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sib {
    pub scale: u8,
    pub index: u8,
    pub base: u8,
}

impl Sib {
    #[inline]
    pub fn decode(byte: u8) -> Self {
        Self {
            scale: (byte >> 6) & 0x03,
            index: (byte >> 3) & 0x07,
            base: byte & 0x07,
        }
    }
}

/// Compute the effective address named by a memory-form ModR/M (`mod != 11`)
///
/// Only the flat 32-bit model is supported; there are no segment overrides.
pub fn resolve_effective_address<M: Memory386 + ?Sized>(
    regs: &mut RegisterFile,
    memory: &M,
    modrm: ModRm,
) -> Result<u32, MemoryError> {
    let mut address = 0u32;
    let mut base = modrm.rm;

    if modrm.rm == RM_SIB {
        let sib = Sib::decode(fetch(regs, memory, OperandSize::Byte)? as u8);
        if sib.index != SIB_NO_INDEX {
            let index = regs.get(Register::decode(sib.index, OperandSize::Dword));
            address = index << sib.scale;
        }
        base = sib.base;
    }

    let base_value = |regs: &RegisterFile| regs.get(Register::decode(base, OperandSize::Dword));

    match modrm.mode {
        // [base] or [disp32]
        0b00 => {
            if base == RM_DISP32 {
                let disp = fetch(regs, memory, OperandSize::Dword)?;
                Ok(address.wrapping_add(disp))
            } else {
                Ok(address.wrapping_add(base_value(regs)))
            }
        }
        // [base + disp8]
        0b01 => {
            let disp = OperandSize::Byte.sign_extend(fetch(regs, memory, OperandSize::Byte)?);
            Ok(address.wrapping_add(base_value(regs)).wrapping_add(disp))
        }
        // [base + disp32]
        0b10 => {
            let disp = fetch(regs, memory, OperandSize::Dword)?;
            Ok(address.wrapping_add(base_value(regs)).wrapping_add(disp))
        }
        _ => {
            log(LogCategory::Stubs, LogLevel::Warn, || {
                format!("Effective address requested for register-form ModRM {:?}", modrm)
            });
            Ok(0)
        }
    }
}
