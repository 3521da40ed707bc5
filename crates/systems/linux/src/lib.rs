//! Linux/i386 user-process machine
//!
//! Assembles the interpreter core into something that can run a statically
//! linked ELF32 executable: a flat address space, an initial stack pointer,
//! the image's segments and entry point, and an optional single-step
//! debugger.

mod debugger;
mod elf;

pub use debugger::{print_memory, print_registers, print_state, Debugger, StdinLines};
pub use elf::{ElfImage, LoaderError, ProgramHeader, ELF_MAGIC, PT_LOAD};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use thiserror::Error;
use x86emu_core::cpu_i386::{
    Console, Cpu386, CpuConfig, CpuError, FlatMemory, Memory386, MemoryError, RegisterSnapshot,
    RunOutcome, StdConsole, Step,
};
use x86emu_core::logging::{log, LogCategory, LogLevel};

/// Address space size used for user processes
pub const DEFAULT_MEMORY_SIZE: usize = 0x0FFF_FFFF;
/// Initial ESP for user processes
pub const DEFAULT_STACK_POINTER: u32 = 0x0FFF_FF00;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Failed to load image: {0}")]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Cpu(#[from] CpuError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("Debugger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_memory_size() -> usize {
    DEFAULT_MEMORY_SIZE
}

fn default_stack_pointer() -> u32 {
    DEFAULT_STACK_POINTER
}

/// Process setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    #[serde(default = "default_stack_pointer")]
    pub stack_pointer: u32,
    #[serde(default)]
    pub cpu: CpuConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            stack_pointer: DEFAULT_STACK_POINTER,
            cpu: CpuConfig::default(),
        }
    }
}

/// Serializable summary of a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub config: MachineConfig,
    pub entry: u32,
    pub registers: RegisterSnapshot,
    pub instructions: u64,
    /// How the last run ended, if it ended normally
    pub outcome: Option<RunOutcome>,
    /// The failure that ended the last run, if any
    pub failure: Option<String>,
}

/// A single guest process
pub struct Machine<C: Console = StdConsole> {
    cpu: Cpu386<FlatMemory, C>,
    config: MachineConfig,
    entry: u32,
    outcome: Option<RunOutcome>,
    failure: Option<String>,
}

impl Machine<StdConsole> {
    /// Machine whose syscalls talk to the process's stdin/stdout
    pub fn new(config: MachineConfig) -> Self {
        Self::with_console(config, StdConsole)
    }
}

impl<C: Console> Machine<C> {
    pub fn with_console(config: MachineConfig, console: C) -> Self {
        let memory = FlatMemory::new(config.memory_size);
        let mut cpu = Cpu386::with_config(memory, console, config.cpu);
        cpu.regs.set_esp(config.stack_pointer);
        Self {
            cpu,
            config,
            entry: 0,
            outcome: None,
            failure: None,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu386<FlatMemory, C> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu386<FlatMemory, C> {
        &mut self.cpu
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Load an ELF32 executable and point EIP at its entry
    ///
    /// The memory printer starts at the entry point afterwards.
    pub fn load_elf(&mut self, bytes: &[u8]) -> Result<u32, MachineError> {
        let image = ElfImage::parse(bytes)?;
        let entry = image.load(&mut self.cpu.memory)?;
        self.cpu.memory.mark_dirty_from(entry);
        self.set_entry(entry);
        Ok(entry)
    }

    /// Copy a flat binary to `addr` and start executing there
    pub fn load_raw(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MachineError> {
        self.cpu.memory.load(addr, bytes)?;
        self.set_entry(addr);
        Ok(())
    }

    /// Start execution somewhere other than the loaded entry point
    pub fn set_entry(&mut self, entry: u32) {
        self.entry = entry;
        self.cpu.set_eip(entry);
    }

    /// Run until HLT, `exit`, or a failure
    pub fn run(&mut self) -> Result<RunOutcome, MachineError> {
        let result = self.cpu.run();
        self.finish(result)
    }

    /// Run with the debugger consulted before every instruction
    pub fn run_with_debugger<R: BufRead, W: Write>(
        &mut self,
        debugger: &mut Debugger<R, W>,
    ) -> Result<RunOutcome, MachineError> {
        loop {
            debugger.before_step(&self.cpu)?;
            if !debugger.is_stepping() {
                return self.run();
            }
            match self.cpu.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Halt) => return self.finish(Ok(RunOutcome::Halted)),
                Ok(Step::Exit(code)) => return self.finish(Ok(RunOutcome::Exited(code))),
                Err(e) => return self.finish(Err(e)),
            }
        }
    }

    fn finish(
        &mut self,
        result: Result<RunOutcome, CpuError>,
    ) -> Result<RunOutcome, MachineError> {
        match result {
            Ok(outcome) => {
                log(LogCategory::Cpu, LogLevel::Info, || {
                    format!(
                        "{:?} after {} instruction(s)",
                        outcome, self.cpu.instructions
                    )
                });
                self.outcome = Some(outcome);
                self.failure = None;
                Ok(outcome)
            }
            Err(e) => {
                self.outcome = None;
                self.failure = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> MachineState {
        MachineState {
            config: self.config,
            entry: self.entry,
            registers: self.cpu.regs.snapshot(),
            instructions: self.cpu.instructions,
            outcome: self.outcome,
            failure: self.failure.clone(),
        }
    }

    /// Versioned JSON save state
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "system": "linux-i386",
            "state": self.state(),
        })
    }

    /// Restore registers and the instruction counter from [`Machine::save_state`]
    ///
    /// Memory is not part of the save state.
    pub fn load_state(&mut self, state: &Value) -> Result<(), serde_json::Error> {
        if let Some(state) = state.get("state") {
            let state: MachineState = serde_json::from_value(state.clone())?;
            self.cpu.regs.restore(&state.registers);
            self.cpu.instructions = state.instructions;
            self.entry = state.entry;
            self.outcome = state.outcome;
            self.failure = state.failure;
        }
        Ok(())
    }

    /// Read guest memory, e.g. to inspect results after a run
    pub fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>, MachineError> {
        let mut buf = vec![0u8; len];
        self.cpu.memory.read_block(addr, &mut buf)?;
        Ok(buf)
    }
}
