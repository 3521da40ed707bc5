//! Architectural register bank
//!
//! Ten 32-bit slots: the eight general purpose registers in encoding order
//! (EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI) followed by EIP and EFLAGS.
//! The 16-bit and 8-bit names are views over the same slots; writing a view
//! leaves the bits outside it untouched.

use super::OperandSize;
use serde::{Deserialize, Serialize};

const SLOT_COUNT: usize = 10;
const SLOT_EIP: usize = 8;
const SLOT_EFLAGS: usize = 9;

/// A register reference: which slot, and which bits of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
    Ax,
    Cx,
    Dx,
    Bx,
    Sp,
    Bp,
    Si,
    Di,
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
    Eip,
    Eflags,
}

/// The part of a slot a register name covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Full,
    Low16,
    Low8,
    High8,
}

impl Register {
    /// General purpose registers in encoding order
    pub const GPR32: [Register; 8] = [
        Register::Eax,
        Register::Ecx,
        Register::Edx,
        Register::Ebx,
        Register::Esp,
        Register::Ebp,
        Register::Esi,
        Register::Edi,
    ];

    const GPR16: [Register; 8] = [
        Register::Ax,
        Register::Cx,
        Register::Dx,
        Register::Bx,
        Register::Sp,
        Register::Bp,
        Register::Si,
        Register::Di,
    ];

    const GPR8: [Register; 8] = [
        Register::Al,
        Register::Cl,
        Register::Dl,
        Register::Bl,
        Register::Ah,
        Register::Ch,
        Register::Dh,
        Register::Bh,
    ];

    /// Decode a 3-bit register selector (opcode low bits, ModRM reg or rm)
    /// within an operand-size class.
    ///
    /// For byte operands selectors 4-7 name AH/CH/DH/BH, the high bytes of
    /// slots 0-3, not SP/BP/SI/DI.
    pub fn decode(selector: u8, size: OperandSize) -> Self {
        let index = (selector & 0x07) as usize;
        match size {
            OperandSize::Byte => Self::GPR8[index],
            OperandSize::Word => Self::GPR16[index],
            OperandSize::Dword => Self::GPR32[index],
        }
    }

    fn location(self) -> (usize, View) {
        use Register::*;
        match self {
            Eax => (0, View::Full),
            Ecx => (1, View::Full),
            Edx => (2, View::Full),
            Ebx => (3, View::Full),
            Esp => (4, View::Full),
            Ebp => (5, View::Full),
            Esi => (6, View::Full),
            Edi => (7, View::Full),
            Ax => (0, View::Low16),
            Cx => (1, View::Low16),
            Dx => (2, View::Low16),
            Bx => (3, View::Low16),
            Sp => (4, View::Low16),
            Bp => (5, View::Low16),
            Si => (6, View::Low16),
            Di => (7, View::Low16),
            Al => (0, View::Low8),
            Cl => (1, View::Low8),
            Dl => (2, View::Low8),
            Bl => (3, View::Low8),
            Ah => (0, View::High8),
            Ch => (1, View::High8),
            Dh => (2, View::High8),
            Bh => (3, View::High8),
            Eip => (SLOT_EIP, View::Full),
            Eflags => (SLOT_EFLAGS, View::Full),
        }
    }

    /// Width of the view this name covers
    pub fn size(self) -> OperandSize {
        match self.location().1 {
            View::Full => OperandSize::Dword,
            View::Low16 => OperandSize::Word,
            View::Low8 | View::High8 => OperandSize::Byte,
        }
    }

    pub fn name(self) -> &'static str {
        use Register::*;
        match self {
            Eax => "EAX",
            Ecx => "ECX",
            Edx => "EDX",
            Ebx => "EBX",
            Esp => "ESP",
            Ebp => "EBP",
            Esi => "ESI",
            Edi => "EDI",
            Ax => "AX",
            Cx => "CX",
            Dx => "DX",
            Bx => "BX",
            Sp => "SP",
            Bp => "BP",
            Si => "SI",
            Di => "DI",
            Al => "AL",
            Cl => "CL",
            Dl => "DL",
            Bl => "BL",
            Ah => "AH",
            Ch => "CH",
            Dh => "DH",
            Bh => "BH",
            Eip => "EIP",
            Eflags => "EFLAGS",
        }
    }
}

/// Status flags tracked by this core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Carry Flag
    Carry,
    /// Zero Flag
    Zero,
}

impl Flag {
    #[inline]
    fn mask(self) -> u32 {
        match self {
            Flag::Carry => 0x0001,
            Flag::Zero => 0x0040,
        }
    }
}

/// The register bank owned by one engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    slots: [u32; SLOT_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            slots: [0; SLOT_COUNT],
        }
    }

    /// Zero every slot
    pub fn reset(&mut self) {
        self.slots = [0; SLOT_COUNT];
    }

    /// Read a register through its view
    #[inline]
    pub fn get(&self, reg: Register) -> u32 {
        let (slot, view) = reg.location();
        let raw = self.slots[slot];
        match view {
            View::Full => raw,
            View::Low16 => raw & 0x0000_FFFF,
            View::Low8 => raw & 0x0000_00FF,
            View::High8 => (raw >> 8) & 0x0000_00FF,
        }
    }

    /// Write a register through its view, preserving the rest of the slot
    #[inline]
    pub fn set(&mut self, reg: Register, value: u32) {
        let (slot, view) = reg.location();
        let raw = &mut self.slots[slot];
        *raw = match view {
            View::Full => value,
            View::Low16 => (*raw & 0xFFFF_0000) | (value & 0x0000_FFFF),
            View::Low8 => (*raw & 0xFFFF_FF00) | (value & 0x0000_00FF),
            View::High8 => (*raw & 0xFFFF_00FF) | ((value & 0x0000_00FF) << 8),
        };
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        (self.slots[SLOT_EFLAGS] & flag.mask()) != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.slots[SLOT_EFLAGS] |= flag.mask();
        } else {
            self.slots[SLOT_EFLAGS] &= !flag.mask();
        }
    }

    #[inline]
    pub fn eip(&self) -> u32 {
        self.slots[SLOT_EIP]
    }

    #[inline]
    pub fn set_eip(&mut self, value: u32) {
        self.slots[SLOT_EIP] = value;
    }

    #[inline]
    pub fn esp(&self) -> u32 {
        self.get(Register::Esp)
    }

    #[inline]
    pub fn set_esp(&mut self, value: u32) {
        self.set(Register::Esp, value);
    }

    /// Copy of the bank for printing and save files
    pub fn snapshot(&self) -> RegisterSnapshot {
        let s = &self.slots;
        RegisterSnapshot {
            eax: s[0],
            ecx: s[1],
            edx: s[2],
            ebx: s[3],
            esp: s[4],
            ebp: s[5],
            esi: s[6],
            edi: s[7],
            eip: s[SLOT_EIP],
            eflags: s[SLOT_EFLAGS],
        }
    }

    /// Install a previously taken snapshot
    pub fn restore(&mut self, snapshot: &RegisterSnapshot) {
        self.slots = [
            snapshot.eax,
            snapshot.ecx,
            snapshot.edx,
            snapshot.ebx,
            snapshot.esp,
            snapshot.ebp,
            snapshot.esi,
            snapshot.edi,
            snapshot.eip,
            snapshot.eflags,
        ];
    }
}

/// Register state for debugging and state dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
    pub eflags: u32,
}

impl RegisterSnapshot {
    /// Values in bank order (general purpose registers, EIP, EFLAGS)
    pub fn values(&self) -> [u32; SLOT_COUNT] {
        [
            self.eax, self.ecx, self.edx, self.ebx, self.esp, self.ebp, self.esi, self.edi,
            self.eip, self.eflags,
        ]
    }
}
