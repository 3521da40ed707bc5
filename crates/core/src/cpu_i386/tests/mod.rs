//! Tests for the i386 interpreter engine
//!
//! - `tests_data`: register and memory moves
//! - `tests_arith`: add/sub/cmp, inc/dec and flag updates
//! - `tests_stack`: push/pop, pusha/popa
//! - `tests_control`: jumps, call/ret, loop, hlt and unimplemented opcodes
//! - `tests_syscall`: `int 0x80` through the engine
//! - `tests_scenarios`: small complete programs

mod tests_arith;
mod tests_syscall;

use crate::cpu_i386::{BufferConsole, Cpu386, FlatMemory};

const MEM_SIZE: usize = 0x1000;
const STACK_TOP: u32 = 0x0F00;

/// Engine with `program` at address 0, EIP = 0 and ESP = `STACK_TOP`
fn cpu_with_program(program: &[u8]) -> Cpu386<FlatMemory, BufferConsole> {
    let mem = FlatMemory::with_program(MEM_SIZE, 0, program).unwrap();
    let mut cpu = Cpu386::with_console(mem, BufferConsole::new());
    cpu.regs.set_esp(STACK_TOP);
    cpu
}
