//! Opcode handlers and the dispatch table
//!
//! The table is keyed by `opcode >> 2`. Each handler decodes the two low
//! opcode bits itself and rejects the variants this core does not implement.

use super::addressing::ModRm;
use super::memory::Memory386;
use super::operand::Operand;
use super::registers::{Flag, Register};
use super::syscall::{self, Console};
use super::{Cpu386, CpuError, Handler, Instruction, OperandSize, Step, ZeroFlagMode};
use crate::logging::{log, LogCategory, LogLevel};

/// `int` vector routed to the syscall bridge
const SYSCALL_VECTOR: u8 = 0x80;
const ESP_SELECTOR: u8 = 0b100;

/// Arithmetic operations that update CF and ZF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AluOp {
    Add,
    Sub,
    /// Subtract for flags only
    Cmp,
}

impl AluOp {
    /// Decode the ModRM `reg` field of the 0x80-0x83 group
    fn from_group(sub_op: u8) -> Option<Self> {
        match sub_op {
            0b000 => Some(AluOp::Add),
            0b101 => Some(AluOp::Sub),
            0b111 => Some(AluOp::Cmp),
            _ => None,
        }
    }
}

impl<M: Memory386, C: Console> Cpu386<M, C> {
    /// Build the 64-entry handler table
    pub(super) fn handler_table() -> [Handler<M, C>; 64] {
        let unimplemented: Handler<M, C> = Self::op_unimplemented;
        let mut table = [unimplemented; 64];

        let mut set = |opcode: u8, handler: Handler<M, C>| {
            table[(opcode >> 2) as usize] = handler;
        };

        set(0x00, Self::op_add_rm_reg);
        set(0x40, Self::op_inc_dec);
        set(0x44, Self::op_inc_dec);
        set(0x48, Self::op_inc_dec);
        set(0x4C, Self::op_inc_dec);
        set(0x50, Self::op_push_reg);
        set(0x54, Self::op_push_reg);
        set(0x58, Self::op_pop_reg);
        set(0x5C, Self::op_pop_reg);
        set(0x60, Self::op_pusha_popa);
        set(0x68, Self::op_push_imm);
        set(0x74, Self::op_jz_jnz);
        set(0x80, Self::op_group_imm);
        set(0x88, Self::op_mov_rm_reg);
        set(0x90, Self::op_nop);
        set(0xB0, Self::op_mov_reg_imm);
        set(0xB4, Self::op_mov_reg_imm);
        set(0xB8, Self::op_mov_reg_imm);
        set(0xBC, Self::op_mov_reg_imm);
        set(0xC0, Self::op_ret);
        set(0xC4, Self::op_mov_rm_imm);
        set(0xCC, Self::op_int);
        set(0xE0, Self::op_loop);
        set(0xE8, Self::op_call_jmp);
        set(0xF4, Self::op_hlt);

        table
    }

    fn op_unimplemented(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        log(LogCategory::Stubs, LogLevel::Warn, || {
            format!(
                "Unimplemented opcode 0x{:02X} at EIP=0x{:08X}",
                instr.opcode, instr.eip
            )
        });
        Err(instr.unimplemented())
    }

    /// Width-masked add/sub/cmp, updating CF and ZF
    fn alu(&mut self, op: AluOp, size: OperandSize, lhs: u32, rhs: u32) -> u32 {
        let mask = size.mask();
        let lhs = lhs & mask;
        let rhs = rhs & mask;

        let (result, carry) = match op {
            AluOp::Add => {
                let r = lhs.wrapping_add(rhs) & mask;
                (r, r < lhs)
            }
            AluOp::Sub | AluOp::Cmp => (lhs.wrapping_sub(rhs) & mask, rhs > lhs),
        };

        let zero = match self.config.zero_flag {
            ZeroFlagMode::Result => result == 0,
            ZeroFlagMode::OperandEquality => lhs == rhs,
        };

        self.regs.set_flag(Flag::Carry, carry);
        self.regs.set_flag(Flag::Zero, zero);
        result
    }

    fn fetch_modrm(&mut self) -> Result<ModRm, CpuError> {
        Ok(ModRm::decode(self.fetch_u8()?))
    }

    /// Resolve the r/m operand of the current instruction
    fn resolve_rm(&mut self, modrm: ModRm, size: OperandSize) -> Result<Operand, CpuError> {
        Ok(Operand::resolve(&mut self.regs, &self.memory, modrm, size)?)
    }

    fn read_rm(&self, operand: Operand) -> Result<u32, CpuError> {
        Ok(operand.read(&self.regs, &self.memory)?)
    }

    fn write_rm(&mut self, operand: Operand, value: u32) -> Result<(), CpuError> {
        Ok(operand.write(&mut self.regs, &mut self.memory, value)?)
    }

    /// Set EIP relative to the end of the current instruction
    fn jump_relative(&mut self, rel: u32) {
        let target = self.regs.eip().wrapping_add(rel);
        self.regs.set_eip(target);
    }

    // 00-03: ADD r/m, reg / ADD reg, r/m
    fn op_add_rm_reg(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let to_reg = instr.opcode & 0x02 != 0;
        let size = instr.size(instr.opcode & 0x01 != 0);
        let modrm = self.fetch_modrm()?;
        let reg = Register::decode(modrm.reg, size);
        let rm = self.resolve_rm(modrm, size)?;

        let lhs = self.regs.get(reg);
        let rhs = self.read_rm(rm)?;
        let result = self.alu(AluOp::Add, size, lhs, rhs);

        if to_reg {
            self.regs.set(reg, result);
        } else {
            self.write_rm(rm, result)?;
        }
        Ok(Step::Continue)
    }

    // 40-4F: INC reg / DEC reg (flags untouched)
    fn op_inc_dec(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let reg = Register::decode(instr.opcode, instr.wide_size());
        let value = self.regs.get(reg);
        let value = if instr.opcode & 0x08 == 0 {
            value.wrapping_add(1)
        } else {
            value.wrapping_sub(1)
        };
        self.regs.set(reg, value);
        Ok(Step::Continue)
    }

    // 50-57: PUSH reg
    fn op_push_reg(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let size = instr.wide_size();
        let value = self.regs.get(Register::decode(instr.opcode, size));
        self.push(size, value)?;
        Ok(Step::Continue)
    }

    // 58-5F: POP reg
    fn op_pop_reg(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let size = instr.wide_size();
        let value = self.pop(size)?;
        // POP ESP keeps the popped value, not the incremented pointer
        self.regs.set(Register::decode(instr.opcode, size), value);
        Ok(Step::Continue)
    }

    // 60: PUSHA, 61: POPA
    fn op_pusha_popa(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let size = instr.wide_size();
        match instr.opcode {
            0x60 => {
                // The stored ESP is the value before the first push
                let original_esp = self.regs.esp();
                for selector in 0..8u8 {
                    let value = if selector == ESP_SELECTOR {
                        original_esp
                    } else {
                        self.regs.get(Register::decode(selector, size))
                    };
                    self.push(size, value)?;
                }
            }
            0x61 => {
                for selector in (0..8u8).rev() {
                    let value = self.pop(size)?;
                    if selector != ESP_SELECTOR {
                        self.regs.set(Register::decode(selector, size), value);
                    }
                }
            }
            _ => return self.op_unimplemented(instr),
        }
        Ok(Step::Continue)
    }

    // 68: PUSH imm16/32, 6A: PUSH imm8 (sign-extended)
    fn op_push_imm(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let size = instr.wide_size();
        let value = match instr.opcode {
            0x68 => self.fetch(size)?,
            0x6A => self.fetch_rel8()?,
            _ => return self.op_unimplemented(instr),
        };
        self.push(size, value)?;
        Ok(Step::Continue)
    }

    // 74: JZ rel8, 75: JNZ rel8
    fn op_jz_jnz(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode > 0x75 {
            return self.op_unimplemented(instr);
        }
        let rel = self.fetch_rel8()?;
        let n = instr.opcode & 0x01 != 0;
        if self.regs.flag(Flag::Zero) != n {
            self.jump_relative(rel);
        }
        Ok(Step::Continue)
    }

    // 80-83: ADD/SUB/CMP r/m, imm
    fn op_group_imm(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let wide = instr.opcode & 0x01 != 0;
        let sign_extend = instr.opcode & 0x02 != 0;
        let size = instr.size(wide);

        let modrm = self.fetch_modrm()?;
        let op = AluOp::from_group(modrm.reg).ok_or(CpuError::UnimplementedGroupOp {
            opcode: instr.opcode,
            sub_op: modrm.reg,
            eip: instr.eip,
        })?;

        // The immediate follows any SIB/displacement bytes
        let rm = self.resolve_rm(modrm, size)?;
        let imm = if sign_extend || !wide {
            self.fetch_rel8()?
        } else {
            self.fetch(size)?
        };

        let lhs = self.read_rm(rm)?;
        let result = self.alu(op, size, lhs, imm);
        if op != AluOp::Cmp {
            self.write_rm(rm, result)?;
        }
        Ok(Step::Continue)
    }

    // 88-8B: MOV r/m, reg / MOV reg, r/m
    fn op_mov_rm_reg(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let to_reg = instr.opcode & 0x02 != 0;
        let size = instr.size(instr.opcode & 0x01 != 0);
        let modrm = self.fetch_modrm()?;
        let reg = Register::decode(modrm.reg, size);
        let rm = self.resolve_rm(modrm, size)?;

        if to_reg {
            let value = self.read_rm(rm)?;
            self.regs.set(reg, value);
        } else {
            let value = self.regs.get(reg);
            self.write_rm(rm, value)?;
        }
        Ok(Step::Continue)
    }

    // 90: NOP
    fn op_nop(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode != 0x90 {
            return self.op_unimplemented(instr);
        }
        Ok(Step::Continue)
    }

    // B0-BF: MOV reg, imm
    fn op_mov_reg_imm(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let size = instr.size(instr.opcode & 0x08 != 0);
        let value = self.fetch(size)?;
        self.regs.set(Register::decode(instr.opcode, size), value);
        Ok(Step::Continue)
    }

    // C3: RET near
    fn op_ret(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode != 0xC3 {
            return self.op_unimplemented(instr);
        }
        let eip = self.pop(instr.wide_size())?;
        self.regs.set_eip(eip);
        Ok(Step::Continue)
    }

    // C6: MOV r/m8, imm8, C7: MOV r/m16/32, imm16/32
    fn op_mov_rm_imm(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode < 0xC6 {
            return self.op_unimplemented(instr);
        }
        let size = instr.size(instr.opcode & 0x01 != 0);
        let modrm = self.fetch_modrm()?;
        if modrm.reg != 0 {
            return Err(CpuError::UnimplementedGroupOp {
                opcode: instr.opcode,
                sub_op: modrm.reg,
                eip: instr.eip,
            });
        }
        let rm = self.resolve_rm(modrm, size)?;
        let value = self.fetch(size)?;
        self.write_rm(rm, value)?;
        Ok(Step::Continue)
    }

    // CD: INT imm8
    fn op_int(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode != 0xCD {
            return self.op_unimplemented(instr);
        }
        let vector = self.fetch_u8()?;
        if vector != SYSCALL_VECTOR {
            return Err(CpuError::UnimplementedInterrupt {
                vector,
                eip: instr.eip,
            });
        }
        syscall::dispatch(&mut self.regs, &mut self.memory, &mut self.console)
    }

    // E2: LOOP rel8
    fn op_loop(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let rel = self.fetch_rel8()?;
        let kind = instr.opcode & 0x03;
        if kind != 0b10 {
            return Err(CpuError::UnimplementedLoop {
                kind,
                eip: instr.eip,
            });
        }
        let ecx = self.regs.get(Register::Ecx).wrapping_sub(1);
        self.regs.set(Register::Ecx, ecx);
        if ecx != 0 {
            self.jump_relative(rel);
        }
        Ok(Step::Continue)
    }

    // E8: CALL rel, E9: JMP rel, EB: JMP rel8
    fn op_call_jmp(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        let op = instr.opcode & 0x03;
        if op == 0b10 {
            return self.op_unimplemented(instr);
        }

        let size = instr.wide_size();
        let rel = if op == 0b11 {
            self.fetch_rel8()?
        } else {
            let raw = self.fetch(size)?;
            size.sign_extend(raw)
        };

        let next = self.regs.eip();
        let mut target = next.wrapping_add(rel);
        if instr.size16 {
            target &= 0xFFFF;
        }

        if op == 0b00 {
            self.push(size, next)?;
        }
        self.regs.set_eip(target);
        Ok(Step::Continue)
    }

    // F4: HLT
    fn op_hlt(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        if instr.opcode != 0xF4 {
            return self.op_unimplemented(instr);
        }
        Ok(Step::Halt)
    }
}
