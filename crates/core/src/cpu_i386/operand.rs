//! Register-or-memory operands
//!
//! An [`Operand`] is resolved once per instruction from a ModR/M byte and
//! then read and written as many times as the handler needs without touching
//! the instruction stream again.

use super::addressing::{resolve_effective_address, ModRm};
use super::memory::{Memory386, MemoryError};
use super::registers::{Register, RegisterFile};
use super::OperandSize;

/// A resolved r/m operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// `mod == 11`: the r/m field selects a register of the operand width
    Register(Register),
    /// Any other mode: a typed location in guest memory
    Memory { addr: u32, size: OperandSize },
}

impl Operand {
    /// Resolve the r/m half of a ModR/M byte, consuming any SIB and
    /// displacement bytes that follow it.
    pub fn resolve<M: Memory386 + ?Sized>(
        regs: &mut RegisterFile,
        memory: &M,
        modrm: ModRm,
        size: OperandSize,
    ) -> Result<Self, MemoryError> {
        if modrm.is_register() {
            Ok(Operand::Register(Register::decode(modrm.rm, size)))
        } else {
            let addr = resolve_effective_address(regs, memory, modrm)?;
            Ok(Operand::Memory { addr, size })
        }
    }

    pub fn size(&self) -> OperandSize {
        match *self {
            Operand::Register(reg) => reg.size(),
            Operand::Memory { size, .. } => size,
        }
    }

    pub fn read<M: Memory386 + ?Sized>(
        &self,
        regs: &RegisterFile,
        memory: &M,
    ) -> Result<u32, MemoryError> {
        match *self {
            Operand::Register(reg) => Ok(regs.get(reg)),
            Operand::Memory { addr, size } => memory.read_sized(size, addr),
        }
    }

    pub fn write<M: Memory386 + ?Sized>(
        &self,
        regs: &mut RegisterFile,
        memory: &mut M,
        value: u32,
    ) -> Result<(), MemoryError> {
        match *self {
            Operand::Register(reg) => {
                regs.set(reg, value);
                Ok(())
            }
            Operand::Memory { addr, size } => memory.write_sized(size, addr, value),
        }
    }
}

/// Resolve and read an r/m operand in one go
pub fn read_operand<M: Memory386 + ?Sized>(
    regs: &mut RegisterFile,
    memory: &M,
    size: OperandSize,
    modrm: ModRm,
) -> Result<u32, MemoryError> {
    Operand::resolve(regs, memory, modrm, size)?.read(regs, memory)
}

/// Resolve and write an r/m operand in one go
pub fn write_operand<M: Memory386 + ?Sized>(
    regs: &mut RegisterFile,
    memory: &mut M,
    size: OperandSize,
    modrm: ModRm,
    value: u32,
) -> Result<(), MemoryError> {
    let operand = Operand::resolve(regs, memory, modrm, size)?;
    operand.write(regs, memory, value)
}
