//! Intel 80386 (32-bit protected-mode flat model) interpreter core
//!
//! A fetch-decode-execute engine for a small subset of the IA-32 instruction
//! set, generic over a [`Memory386`] address space and a [`Console`] that
//! backs the `int 0x80` system calls.
//!
//! The instruction pointer doubles as the fetch cursor: every fetch reads at
//! EIP and advances it by the number of bytes consumed. Handlers that need an
//! operand twice (read-modify-write) resolve it once into an [`Operand`] and
//! reuse that, so the cursor only ever moves forward within an instruction.
//!
//! Dispatch goes through a 64-entry table keyed by the top six opcode bits;
//! the low two bits are decoded by the handler (width, direction,
//! sign-extension or a small sub-opcode).

mod addressing;
mod instructions;
mod memory;
mod operand;
mod registers;
mod syscall;

#[cfg(test)]
mod tests;

pub use addressing::{fetch, resolve_effective_address, ModRm, Sib};
pub use memory::{FlatMemory, Memory386, MemoryError};
pub use operand::{read_operand, write_operand, Operand};
pub use registers::{Flag, Register, RegisterFile, RegisterSnapshot};
pub use syscall::{BufferConsole, Console, StdConsole, Syscall};

use crate::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operand-size override prefix (selects 16-bit operands for one instruction)
pub const OPERAND_SIZE_PREFIX: u8 = 0x66;

/// Width of an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandSize {
    Byte,
    Word,
    Dword,
}

impl OperandSize {
    /// Decode the legacy width scheme: the opcode's `w` bit selects byte vs.
    /// wide, the operand-size prefix selects 16 vs. 32 bits for wide operands.
    #[inline]
    pub fn from_bits(wide: bool, size16: bool) -> Self {
        match (wide, size16) {
            (false, _) => OperandSize::Byte,
            (true, true) => OperandSize::Word,
            (true, false) => OperandSize::Dword,
        }
    }

    #[inline]
    pub fn bytes(self) -> u32 {
        match self {
            OperandSize::Byte => 1,
            OperandSize::Word => 2,
            OperandSize::Dword => 4,
        }
    }

    #[inline]
    pub fn mask(self) -> u32 {
        match self {
            OperandSize::Byte => 0x0000_00FF,
            OperandSize::Word => 0x0000_FFFF,
            OperandSize::Dword => 0xFFFF_FFFF,
        }
    }

    /// Sign-extend a value of this width to 32 bits
    #[inline]
    pub fn sign_extend(self, value: u32) -> u32 {
        match self {
            OperandSize::Byte => value as u8 as i8 as i32 as u32,
            OperandSize::Word => value as u16 as i16 as i32 as u32,
            OperandSize::Dword => value,
        }
    }
}

/// How add/sub/cmp derive the zero flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroFlagMode {
    /// ZF is set when the (width-masked) result is zero
    #[default]
    Result,
    /// ZF is set when the two operands were equal before the operation.
    OperandEquality,
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuConfig {
    #[serde(default)]
    pub zero_flag: ZeroFlagMode,
}

/// Failures that end a run
#[derive(Debug, Error)]
pub enum CpuError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("Unknown opcode 0x{opcode:02X} at EIP=0x{eip:08X}")]
    UnimplementedOpcode { opcode: u8, eip: u32 },
    #[error("Unknown variant /{sub_op} of opcode 0x{opcode:02X} at EIP=0x{eip:08X}")]
    UnimplementedGroupOp { opcode: u8, sub_op: u8, eip: u32 },
    #[error("Unknown loop type {kind} at EIP=0x{eip:08X}")]
    UnimplementedLoop { kind: u8, eip: u32 },
    #[error("Unknown interrupt 0x{vector:02X} at EIP=0x{eip:08X}")]
    UnimplementedInterrupt { vector: u8, eip: u32 },
    #[error("Unknown syscall: {number}")]
    UnknownSyscall { number: u32 },
    #[error("Host console error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the engine should do after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// Fetch the next instruction
    Continue,
    /// HLT executed
    Halt,
    /// The guest called `exit` with this code
    Exit(u32),
}

/// How a completed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Halted,
    Exited(u32),
}

/// The decoded prefix/opcode pair handed to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    /// An operand-size prefix preceded the opcode
    pub size16: bool,
    /// Address of the first byte of the instruction (prefix included)
    pub eip: u32,
}

impl Instruction {
    /// Operand size for an opcode whose `w` bit is `wide`
    #[inline]
    pub fn size(&self, wide: bool) -> OperandSize {
        OperandSize::from_bits(wide, self.size16)
    }

    /// Operand size for opcodes that are always word or dword
    #[inline]
    pub fn wide_size(&self) -> OperandSize {
        self.size(true)
    }

    fn unimplemented(&self) -> CpuError {
        CpuError::UnimplementedOpcode {
            opcode: self.opcode,
            eip: self.eip,
        }
    }
}

type Handler<M, C> = fn(&mut Cpu386<M, C>, Instruction) -> Result<Step, CpuError>;

/// i386 interpreter state and execution engine
pub struct Cpu386<M: Memory386, C: Console = StdConsole> {
    /// Architectural registers; EIP is the fetch cursor
    pub regs: RegisterFile,
    /// Guest address space
    pub memory: M,
    /// Host side of the syscall bridge
    pub console: C,
    /// Instructions executed since construction or reset
    pub instructions: u64,
    config: CpuConfig,
    handlers: [Handler<M, C>; 64],
    halted: bool,
}

impl<M: Memory386> Cpu386<M, StdConsole> {
    /// Create an engine whose syscalls use the process's stdin/stdout
    pub fn new(memory: M) -> Self {
        Self::with_console(memory, StdConsole)
    }
}

impl<M: Memory386, C: Console> Cpu386<M, C> {
    pub fn with_console(memory: M, console: C) -> Self {
        Self::with_config(memory, console, CpuConfig::default())
    }

    pub fn with_config(memory: M, console: C, config: CpuConfig) -> Self {
        Self {
            regs: RegisterFile::new(),
            memory,
            console,
            instructions: 0,
            config,
            handlers: Self::handler_table(),
            halted: false,
        }
    }

    pub fn config(&self) -> CpuConfig {
        self.config
    }

    pub fn set_config(&mut self, config: CpuConfig) {
        self.config = config;
    }

    /// Zero the registers and clear the halted state (memory is preserved)
    pub fn reset(&mut self) {
        self.regs.reset();
        self.instructions = 0;
        self.halted = false;
    }

    /// A HLT, exit or failure has stopped the engine
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn set_eip(&mut self, eip: u32) {
        self.regs.set_eip(eip);
    }

    /// Fetch an immediate of the given width at EIP and advance past it
    #[inline]
    fn fetch(&mut self, size: OperandSize) -> Result<u32, CpuError> {
        Ok(fetch(&mut self.regs, &self.memory, size)?)
    }

    #[inline]
    fn fetch_u8(&mut self) -> Result<u8, CpuError> {
        Ok(self.fetch(OperandSize::Byte)? as u8)
    }

    /// Fetch a signed 8-bit displacement, sign-extended to 32 bits
    #[inline]
    fn fetch_rel8(&mut self) -> Result<u32, CpuError> {
        let byte = self.fetch(OperandSize::Byte)?;
        Ok(OperandSize::Byte.sign_extend(byte))
    }

    /// Push a value of the given width
    fn push(&mut self, size: OperandSize, value: u32) -> Result<(), CpuError> {
        let esp = self.regs.esp().wrapping_sub(size.bytes());
        self.memory.write_sized(size, esp, value)?;
        self.regs.set_esp(esp);
        Ok(())
    }

    /// Pop a value of the given width
    fn pop(&mut self, size: OperandSize) -> Result<u32, CpuError> {
        let esp = self.regs.esp();
        let value = self.memory.read_sized(size, esp)?;
        self.regs.set_esp(esp.wrapping_add(size.bytes()));
        Ok(value)
    }

    /// Execute one instruction
    ///
    /// Once a handler halts, exits or fails, the engine stays halted and
    /// further calls return [`Step::Halt`] without fetching.
    pub fn step(&mut self) -> Result<Step, CpuError> {
        if self.halted {
            return Ok(Step::Halt);
        }

        let start = self.regs.eip();
        let result = self.decode_and_execute(start);
        self.instructions += 1;

        match result {
            Ok(Step::Continue) => Ok(Step::Continue),
            Ok(step) => {
                self.halted = true;
                log(LogCategory::Cpu, LogLevel::Debug, || {
                    format!(
                        "Stopped with {:?} after {} instruction(s), EIP=0x{:08X}",
                        step,
                        self.instructions,
                        self.regs.eip()
                    )
                });
                Ok(step)
            }
            Err(e) => {
                self.halted = true;
                log(LogCategory::Stubs, LogLevel::Warn, || {
                    format!("Instruction at 0x{:08X} failed: {}", start, e)
                });
                Err(e)
            }
        }
    }

    fn decode_and_execute(&mut self, start: u32) -> Result<Step, CpuError> {
        let mut opcode = self.fetch_u8()?;
        let size16 = opcode == OPERAND_SIZE_PREFIX;
        if size16 {
            opcode = self.fetch_u8()?;
        }

        log(LogCategory::Cpu, LogLevel::Trace, || {
            format!(
                "EIP=0x{:08X} opcode={}{:02X}",
                start,
                if size16 { "66 " } else { "" },
                opcode
            )
        });

        let instr = Instruction {
            opcode,
            size16,
            eip: start,
        };
        let handler = self.handlers[(opcode >> 2) as usize];
        handler(self, instr)
    }

    /// Run until HLT, `exit`, or a failure
    pub fn run(&mut self) -> Result<RunOutcome, CpuError> {
        loop {
            match self.step()? {
                Step::Continue => {}
                Step::Halt => return Ok(RunOutcome::Halted),
                Step::Exit(code) => return Ok(RunOutcome::Exited(code)),
            }
        }
    }
}
