//! Interactive single-step debugger and state printer
//!
//! While stepping, the debugger prints the register bank and the modified
//! part of memory before every instruction, then waits for a command:
//!
//! - `s`: execute one instruction
//! - `c`: continue without stopping (leaves stepping mode)
//!
//! End of input behaves like `c`.

use std::io::{self, BufRead, Read, Write};
use x86emu_core::cpu_i386::{Console, Cpu386, FlatMemory, RegisterSnapshot};

const ROW_SIZE: usize = 16;
const HIGHLIGHT: &str = "\x1b[1;31m";
const RESET: &str = "\x1b[0m";
const BANNER: &str = "***********************************";

/// Print the register bank as a header line and a line of 8-digit hex values
pub fn print_registers<W: Write>(out: &mut W, regs: &RegisterSnapshot) -> io::Result<()> {
    const NAMES: [&str; 10] = [
        "EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI", "EIP", "EFLAGS",
    ];
    for name in NAMES {
        write!(out, "{:<9}", name)?;
    }
    writeln!(out)?;
    for value in regs.values() {
        write!(out, "{:08x} ", value)?;
    }
    writeln!(out)
}

/// Hex dump of the modified part of `memory` in 16-byte rows
///
/// The byte at `eip` is highlighted. After a row whose bytes are all equal,
/// further uniform rows are collapsed into a single `....` line.
pub fn print_memory<W: Write>(out: &mut W, memory: &FlatMemory, eip: u32) -> io::Result<()> {
    let data = memory.as_slice();
    let Some(range) = memory.dirty_range() else {
        return Ok(());
    };

    let first = (range.start / ROW_SIZE) * ROW_SIZE;
    let last = range
        .end
        .div_ceil(ROW_SIZE)
        .saturating_mul(ROW_SIZE)
        .min(data.len());
    let eip = eip as usize;

    let mut previous_uniform = false;
    let mut collapsed = false;
    let mut row_start = first;
    while row_start < last {
        let row_end = (row_start + ROW_SIZE).min(last);
        let row = &data[row_start..row_end];
        let uniform = row.iter().all(|&b| b == row[0]);
        let holds_eip = (row_start..row_end).contains(&eip);

        if uniform && previous_uniform && !holds_eip {
            if !collapsed {
                writeln!(out, "....")?;
                collapsed = true;
            }
        } else {
            print_row(out, row_start, row, eip)?;
            collapsed = false;
            previous_uniform = uniform;
        }
        row_start = row_end;
    }
    Ok(())
}

fn print_row<W: Write>(out: &mut W, addr: usize, row: &[u8], eip: usize) -> io::Result<()> {
    write!(out, "{:08x}: ", addr)?;
    let mut ascii = String::with_capacity(row.len());
    for (i, &byte) in row.iter().enumerate() {
        let c = if byte.is_ascii_graphic() || byte == b' ' {
            byte as char
        } else {
            '.'
        };
        if addr + i == eip {
            write!(out, "{}{:02x}{} ", HIGHLIGHT, byte, RESET)?;
            ascii.push_str(HIGHLIGHT);
            ascii.push(c);
            ascii.push_str(RESET);
        } else {
            write!(out, "{:02x} ", byte)?;
            ascii.push(c);
        }
    }
    writeln!(out, " {}", ascii)
}

/// Registers followed by memory, as shown at every debugger stop
pub fn print_state<W: Write, C: Console>(
    out: &mut W,
    cpu: &Cpu386<FlatMemory, C>,
) -> io::Result<()> {
    writeln!(out, "Registers:")?;
    print_registers(out, &cpu.regs.snapshot())?;
    writeln!(out, "Memory:")?;
    print_memory(out, &cpu.memory, cpu.regs.eip())
}

/// Line-oriented step/continue debugger
pub struct Debugger<R: BufRead, W: Write> {
    input: R,
    output: W,
    stepping: bool,
}

/// Stdin reader that holds the lock for one line at a time
///
/// The guest's `read` syscall shares stdin with the debugger, so neither
/// side may keep it locked.
#[derive(Debug, Default)]
pub struct StdinLines {
    line: Vec<u8>,
    pos: usize,
}

impl Read for StdinLines {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for StdinLines {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.line.len() {
            self.line.clear();
            self.pos = 0;
            io::stdin().lock().read_until(b'\n', &mut self.line)?;
        }
        Ok(&self.line[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.line.len());
    }
}

impl Debugger<StdinLines, io::Stdout> {
    /// Debugger on the process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(StdinLines::default(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Debugger<R, W> {
    /// Create a debugger that is not stepping yet
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            stepping: false,
        }
    }

    pub fn is_stepping(&self) -> bool {
        self.stepping
    }

    /// Enter stepping mode and print the command help
    pub fn enable(&mut self) -> io::Result<()> {
        self.stepping = true;
        writeln!(self.output, "{}", BANNER)?;
        writeln!(self.output, "Debug mode enabled")?;
        writeln!(self.output, "Commands:")?;
        writeln!(self.output, "s - step over")?;
        writeln!(self.output, "c - continue / disable debug mode")?;
        writeln!(self.output, "{}", BANNER)?;
        self.output.flush()
    }

    /// Leave stepping mode
    pub fn disable(&mut self) -> io::Result<()> {
        self.stepping = false;
        writeln!(self.output, "{}", BANNER)?;
        writeln!(self.output, "Debug mode disabled")?;
        writeln!(self.output, "{}", BANNER)?;
        self.output.flush()
    }

    /// Called before each instruction; blocks for a command while stepping
    pub fn before_step<C: Console>(&mut self, cpu: &Cpu386<FlatMemory, C>) -> io::Result<()> {
        if !self.stepping {
            return Ok(());
        }

        print_state(&mut self.output, cpu)?;
        self.output.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return self.disable();
            }
            match line.trim().chars().next() {
                Some('s') => return Ok(()),
                Some('c') => return self.disable(),
                Some(_) => {
                    writeln!(self.output, "Unknown debug command")?;
                    self.output.flush()?;
                }
                None => {}
            }
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }
}
