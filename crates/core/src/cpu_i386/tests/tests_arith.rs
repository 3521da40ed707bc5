//! Tests for ADD/SUB/CMP, INC/DEC and the flags they produce

use super::cpu_with_program;
use crate::cpu_i386::{CpuConfig, CpuError, Flag, Memory386, Register, Step, ZeroFlagMode};

#[test]
fn test_add_rm_reg_registers() {
    // ADD EAX, EBX
    let mut cpu = cpu_with_program(&[0x01, 0xD8]);
    cpu.regs.set(Register::Eax, 5);
    cpu.regs.set(Register::Ebx, 7);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 12);
    assert_eq!(cpu.regs.get(Register::Ebx), 7);
    assert!(!cpu.regs.flag(Flag::Carry));
    assert!(!cpu.regs.flag(Flag::Zero));
}

#[test]
fn test_add_reg_rm_from_memory_wraps() {
    // ADD EAX, [EBX]
    let mut cpu = cpu_with_program(&[0x03, 0x03]);
    cpu.regs.set(Register::Eax, 0xFFFF_FFFF);
    cpu.regs.set(Register::Ebx, 0x100);
    cpu.memory.write_u32(0x100, 1).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 0);
    assert_eq!(cpu.memory.read_u32(0x100).unwrap(), 1);
    assert!(cpu.regs.flag(Flag::Carry));
    assert!(cpu.regs.flag(Flag::Zero));
}

#[test]
fn test_add_byte_to_memory() {
    // ADD [EDI], AL
    let mut cpu = cpu_with_program(&[0x00, 0x07]);
    cpu.regs.set(Register::Edi, 0x100);
    cpu.regs.set(Register::Eax, 0x20);
    cpu.memory.write_u16(0x100, 0x33F0).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.memory.read_u8(0x100).unwrap(), 0x10);
    assert_eq!(cpu.memory.read_u8(0x101).unwrap(), 0x33);
    assert!(cpu.regs.flag(Flag::Carry));
}

#[test]
fn test_add_imm8_to_memory_leaves_eip_after_immediate() {
    // ADD DWORD [EBX + 8], 5 ; HLT
    let mut cpu = cpu_with_program(&[0x83, 0x43, 0x08, 0x05, 0xF4]);
    cpu.regs.set(Register::Ebx, 0x100);
    cpu.memory.write_u32(0x108, 10).unwrap();

    cpu.step().unwrap();
    assert_eq!(cpu.memory.read_u32(0x108).unwrap(), 15);
    assert_eq!(cpu.regs.eip(), 4);
    assert_eq!(cpu.step().unwrap(), Step::Halt);
}

#[test]
fn test_add_imm32_to_memory_disp32() {
    // ADD DWORD [EAX + 0x100], 0x12345678
    let mut cpu = cpu_with_program(&[
        0x81, 0x80, 0x00, 0x01, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12,
    ]);
    cpu.regs.set(Register::Eax, 0x100);
    cpu.memory.write_u32(0x200, 1).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.memory.read_u32(0x200).unwrap(), 0x1234_5679);
    assert_eq!(cpu.regs.eip(), 10);
}

#[test]
fn test_add_imm8_to_byte_register() {
    // ADD BL, 1
    let mut cpu = cpu_with_program(&[0x80, 0xC3, 0x01]);
    cpu.regs.set(Register::Ebx, 0x12FF);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Ebx), 0x1200);
    assert!(cpu.regs.flag(Flag::Carry));
    assert!(cpu.regs.flag(Flag::Zero));
}

#[test]
fn test_add_imm16_with_prefix() {
    // ADD CX, 1
    let mut cpu = cpu_with_program(&[0x66, 0x81, 0xC1, 0x01, 0x00]);
    cpu.regs.set(Register::Ecx, 0xABCD_FFFF);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Ecx), 0xABCD_0000);
    assert!(cpu.regs.flag(Flag::Carry));
    assert_eq!(cpu.regs.eip(), 5);
}

#[test]
fn test_sub_sign_extended_negative_immediate() {
    // SUB EAX, -1
    let mut cpu = cpu_with_program(&[0x83, 0xE8, 0xFF]);
    cpu.regs.set(Register::Eax, 5);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 6);
    assert!(cpu.regs.flag(Flag::Carry));
    assert!(!cpu.regs.flag(Flag::Zero));
}

#[test]
fn test_sub_to_zero() {
    // SUB ECX, 3
    let mut cpu = cpu_with_program(&[0x83, 0xE9, 0x03]);
    cpu.regs.set(Register::Ecx, 3);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Ecx), 0);
    assert!(cpu.regs.flag(Flag::Zero));
    assert!(!cpu.regs.flag(Flag::Carry));
}

#[test]
fn test_cmp_sets_flags_without_writing() {
    // CMP EAX, 5 ; CMP EAX, 5
    let mut cpu = cpu_with_program(&[0x83, 0xF8, 0x05, 0x83, 0xF8, 0x05]);
    cpu.regs.set(Register::Eax, 5);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 5);
    assert!(cpu.regs.flag(Flag::Zero));
    assert!(!cpu.regs.flag(Flag::Carry));

    cpu.regs.set(Register::Eax, 4);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 4);
    assert!(!cpu.regs.flag(Flag::Zero));
    assert!(cpu.regs.flag(Flag::Carry));
}

#[test]
fn test_cmp_memory_byte() {
    // CMP BYTE [0x200], 0x41
    let mut cpu = cpu_with_program(&[0x80, 0x3D, 0x00, 0x02, 0x00, 0x00, 0x41]);
    cpu.memory.write_u8(0x200, 0x41).unwrap();
    cpu.step().unwrap();
    assert!(cpu.regs.flag(Flag::Zero));
    assert_eq!(cpu.memory.read_u8(0x200).unwrap(), 0x41);
    assert_eq!(cpu.regs.eip(), 7);
}

#[test]
fn test_zero_flag_modes() {
    // ADD EAX, 5
    let program = [0x83, 0xC0, 0x05];

    let mut cpu = cpu_with_program(&program);
    cpu.regs.set(Register::Eax, 5);
    cpu.step().unwrap();
    assert!(!cpu.regs.flag(Flag::Zero), "result 10 is not zero");

    let mut cpu = cpu_with_program(&program);
    cpu.set_config(CpuConfig {
        zero_flag: ZeroFlagMode::OperandEquality,
    });
    cpu.regs.set(Register::Eax, 5);
    cpu.step().unwrap();
    assert!(cpu.regs.flag(Flag::Zero), "operands were equal");
    assert_eq!(cpu.regs.get(Register::Eax), 10);
}

#[test]
fn test_operand_equality_mode_ignores_zero_result() {
    // ADD EAX, 1 with EAX = 0xFFFFFFFF
    let mut cpu = cpu_with_program(&[0x83, 0xC0, 0x01]);
    cpu.set_config(CpuConfig {
        zero_flag: ZeroFlagMode::OperandEquality,
    });
    cpu.regs.set(Register::Eax, 0xFFFF_FFFF);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 0);
    assert!(!cpu.regs.flag(Flag::Zero));
    assert!(cpu.regs.flag(Flag::Carry));
}

#[test]
fn test_group_rejects_other_sub_opcodes() {
    // OR EAX, 1
    let mut cpu = cpu_with_program(&[0x83, 0xC8, 0x01]);
    assert!(matches!(
        cpu.step(),
        Err(CpuError::UnimplementedGroupOp {
            opcode: 0x83,
            sub_op: 1,
            eip: 0
        })
    ));
    assert!(cpu.is_halted());
}

#[test]
fn test_inc_wraps_without_touching_flags() {
    // INC EAX
    let mut cpu = cpu_with_program(&[0x40]);
    cpu.regs.set(Register::Eax, 0xFFFF_FFFF);
    cpu.regs.set_flag(Flag::Carry, true);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Eax), 0);
    assert!(cpu.regs.flag(Flag::Carry));
    assert!(!cpu.regs.flag(Flag::Zero));
}

#[test]
fn test_dec_register() {
    // DEC EBX ; DEC EDI
    let mut cpu = cpu_with_program(&[0x4B, 0x4F]);
    cpu.regs.set(Register::Ebx, 1);
    cpu.step().unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Ebx), 0);
    assert_eq!(cpu.regs.get(Register::Edi), 0xFFFF_FFFF);
}

#[test]
fn test_inc_word_register() {
    // INC CX
    let mut cpu = cpu_with_program(&[0x66, 0x41]);
    cpu.regs.set(Register::Ecx, 0x1234_FFFF);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.get(Register::Ecx), 0x1234_0000);
    assert_eq!(cpu.regs.eip(), 2);
}

#[test]
fn test_config_from_json() {
    let config: CpuConfig = serde_json::from_str(r#"{"zero_flag":"operand_equality"}"#).unwrap();
    assert_eq!(config.zero_flag, ZeroFlagMode::OperandEquality);

    let config: CpuConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, CpuConfig::default());
    assert_eq!(config.zero_flag, ZeroFlagMode::Result);
}
