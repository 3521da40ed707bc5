//! Tests for `int 0x80` as executed by the engine

use super::cpu_with_program;
use crate::cpu_i386::{BufferConsole, CpuError, Register, RunOutcome};

#[test]
fn test_write_hi() {
    let mut cpu = cpu_with_program(&[
        0xC6, 0x05, 0x00, 0x02, 0x00, 0x00, 0x48, // MOV BYTE [0x200], 'H'
        0xC6, 0x05, 0x01, 0x02, 0x00, 0x00, 0x49, // MOV BYTE [0x201], 'I'
        0xB8, 0x04, 0x00, 0x00, 0x00, // MOV EAX, 4
        0xBB, 0x01, 0x00, 0x00, 0x00, // MOV EBX, 1
        0xB9, 0x00, 0x02, 0x00, 0x00, // MOV ECX, 0x200
        0xBA, 0x02, 0x00, 0x00, 0x00, // MOV EDX, 2
        0xCD, 0x80, // INT 0x80
        0xF4, // HLT
    ]);

    assert_eq!(cpu.run().unwrap(), RunOutcome::Halted);
    assert_eq!(cpu.console.output_str(), "HI");
    assert_eq!(cpu.regs.get(Register::Eax), 2);
    assert_eq!(cpu.regs.eip(), 37);
}

#[test]
fn test_exit_stops_run_with_code() {
    let mut cpu = cpu_with_program(&[
        0xB8, 0x01, 0x00, 0x00, 0x00, // MOV EAX, 1
        0xBB, 0x07, 0x00, 0x00, 0x00, // MOV EBX, 7
        0xCD, 0x80, // INT 0x80
        0xF4, // HLT (never reached)
    ]);

    assert_eq!(cpu.run().unwrap(), RunOutcome::Exited(7));
    assert!(cpu.is_halted());
    assert_eq!(cpu.regs.eip(), 12);
    assert_eq!(cpu.instructions, 3);
}

#[test]
fn test_read_line_into_memory() {
    let mut cpu = cpu_with_program(&[
        0xB8, 0x03, 0x00, 0x00, 0x00, // MOV EAX, 3
        0xBB, 0x00, 0x00, 0x00, 0x00, // MOV EBX, 0
        0xB9, 0x00, 0x03, 0x00, 0x00, // MOV ECX, 0x300
        0xBA, 0x10, 0x00, 0x00, 0x00, // MOV EDX, 16
        0xCD, 0x80, // INT 0x80
        0xF4, // HLT
    ]);
    cpu.console = BufferConsole::with_input("hello\n");

    assert_eq!(cpu.run().unwrap(), RunOutcome::Halted);
    assert_eq!(&cpu.memory.as_slice()[0x300..0x307], b"hello\n\0");
    assert_eq!(cpu.regs.get(Register::Eax), 6);
}

#[test]
fn test_unknown_syscall_fails_run() {
    let mut cpu = cpu_with_program(&[0xB8, 0x63, 0x00, 0x00, 0x00, 0xCD, 0x80, 0xF4]);
    assert!(matches!(
        cpu.run(),
        Err(CpuError::UnknownSyscall { number: 99 })
    ));
    assert!(cpu.is_halted());
}
