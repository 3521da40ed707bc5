//! `int 0x80` system call bridge
//!
//! EAX selects the call, EBX/ECX/EDX carry the arguments. Host I/O goes
//! through a [`Console`] so tests and frontends can supply their own.

use super::memory::{Memory386, MemoryError};
use super::registers::{Register, RegisterFile};
use super::{CpuError, Step};
use crate::logging::{log, LogCategory, LogLevel};
use std::io::{self, BufRead, Cursor, Write};

/// Host side of guest console I/O
pub trait Console {
    /// Read one line including its terminator; empty at end of input
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Console backed by the process's stdin and stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl Console for StdConsole {
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        io::stdin().lock().read_until(b'\n', &mut line)?;
        Ok(line)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(data)?;
        out.flush()
    }
}

/// In-memory console for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: Cursor<Vec<u8>>,
    /// Everything the guest has written
    pub output: Vec<u8>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console whose stdin yields `input`
    pub fn with_input(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Cursor::new(input.into()),
            output: Vec::new(),
        }
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferConsole {
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.input.read_until(b'\n', &mut line)?;
        Ok(line)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(data);
        Ok(())
    }
}

/// Calls understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 1,
    Read = 3,
    Write = 4,
}

impl Syscall {
    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Syscall::Exit),
            3 => Some(Syscall::Read),
            4 => Some(Syscall::Write),
            _ => None,
        }
    }
}

/// Execute the call selected by EAX
pub(super) fn dispatch<M: Memory386 + ?Sized, C: Console + ?Sized>(
    regs: &mut RegisterFile,
    memory: &mut M,
    console: &mut C,
) -> Result<Step, CpuError> {
    let number = regs.get(Register::Eax);
    let ebx = regs.get(Register::Ebx);
    let ecx = regs.get(Register::Ecx);
    let edx = regs.get(Register::Edx);

    log(LogCategory::Syscall, LogLevel::Debug, || {
        format!(
            "int 0x80: eax={} ebx=0x{:08X} ecx=0x{:08X} edx=0x{:08X} esi=0x{:08X} edi=0x{:08X}",
            number,
            ebx,
            ecx,
            edx,
            regs.get(Register::Esi),
            regs.get(Register::Edi)
        )
    });

    match Syscall::from_number(number) {
        Some(Syscall::Exit) => {
            log(LogCategory::Syscall, LogLevel::Info, || {
                format!("Program exited with code {}", ebx)
            });
            Ok(Step::Exit(ebx))
        }
        Some(Syscall::Read) => {
            let count = sys_read(memory, console, ecx, edx)?;
            regs.set(Register::Eax, count);
            Ok(Step::Continue)
        }
        Some(Syscall::Write) => {
            let count = sys_write(memory, console, ecx, edx)?;
            regs.set(Register::Eax, count);
            Ok(Step::Continue)
        }
        None => {
            log(LogCategory::Syscall, LogLevel::Error, || {
                format!("Unknown syscall: {}", number)
            });
            Err(CpuError::UnknownSyscall { number })
        }
    }
}

/// Copy `len` guest bytes at `addr` to the console
fn sys_write<M: Memory386 + ?Sized, C: Console + ?Sized>(
    memory: &M,
    console: &mut C,
    addr: u32,
    len: u32,
) -> Result<u32, CpuError> {
    let len_bytes = len as usize;
    if (addr as usize).saturating_add(len_bytes) > memory.size() {
        return Err(MemoryError::OutOfBounds {
            addr,
            len: len_bytes,
            size: memory.size(),
        }
        .into());
    }

    let mut buf = vec![0u8; len_bytes];
    memory.read_block(addr, &mut buf)?;
    console.write_all(&buf)?;
    Ok(len)
}

/// Store one console line at `addr`, using at most `max` bytes
///
/// At most `max - 1` characters are kept. A newline is appended when it still
/// leaves room for the terminating NUL. Returns the number of bytes stored,
/// not counting the NUL.
fn sys_read<M: Memory386 + ?Sized, C: Console + ?Sized>(
    memory: &mut M,
    console: &mut C,
    addr: u32,
    max: u32,
) -> Result<u32, CpuError> {
    let mut line = console.read_line()?;
    if line.is_empty() || max == 0 {
        return Ok(0);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }

    let max = max as usize;
    line.truncate(max - 1);
    if line.len() + 1 < max {
        line.push(b'\n');
    }
    let count = line.len() as u32;
    line.push(0);

    memory.write_block(addr, &line)?;
    Ok(count)
}
