//! ELF32 executable loading
//!
//! Only what a statically linked i386 executable needs: the file header,
//! the program header table, and `PT_LOAD` segments. Section headers,
//! relocations and dynamic linking are ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use x86emu_core::cpu_i386::{Memory386, MemoryError};
use x86emu_core::logging::{log, LogCategory, LogLevel};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;

const E_ENTRY: usize = 0x18;
const E_PHOFF: usize = 0x1C;
const E_PHENTSIZE: usize = 0x2A;
const E_PHNUM: usize = 0x2C;
const ELF32_HEADER_SIZE: usize = 0x34;

const P_TYPE: usize = 0x00;
const P_OFFSET: usize = 0x04;
const P_VADDR: usize = 0x08;
const P_FILESZ: usize = 0x10;
const P_MEMSZ: usize = 0x14;
const P_FLAGS: usize = 0x18;
const ELF32_PHDR_SIZE: usize = 0x20;

/// Loadable segment
pub const PT_LOAD: u32 = 1;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Invalid ELF file: bad magic")]
    BadMagic,
    #[error("Unsupported ELF class {0} (only 32-bit images are supported)")]
    UnsupportedClass(u8),
    #[error("Unsupported ELF data encoding {0} (only little-endian images are supported)")]
    UnsupportedEncoding(u8),
    #[error("Truncated ELF image: {what} needs {len} byte(s) at offset 0x{offset:X}")]
    Truncated {
        what: &'static str,
        offset: usize,
        len: usize,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// One entry of the program header table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub p_type: u32,
    /// Offset of the segment in the file
    pub offset: u32,
    /// Virtual address of the segment in memory
    pub vaddr: u32,
    /// Bytes present in the file
    pub filesz: u32,
    /// Bytes occupied in memory (the rest is zero-filled)
    pub memsz: u32,
    pub flags: u32,
}

/// A validated ELF32 little-endian image
#[derive(Debug, Clone)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    pub entry: u32,
    pub program_headers: Vec<ProgramHeader>,
}

fn slice<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], LoaderError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(LoaderError::Truncated { what, offset, len })
}

fn read_u16(data: &[u8], offset: usize, what: &'static str) -> Result<u16, LoaderError> {
    let bytes = slice(data, offset, 2, what)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize, what: &'static str) -> Result<u32, LoaderError> {
    let bytes = slice(data, offset, 4, what)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

impl<'a> ElfImage<'a> {
    /// Validate the header and read the program header table
    pub fn parse(data: &'a [u8]) -> Result<Self, LoaderError> {
        if data.len() < ELF_MAGIC.len() || data[..ELF_MAGIC.len()] != ELF_MAGIC {
            return Err(LoaderError::BadMagic);
        }
        slice(data, 0, ELF32_HEADER_SIZE, "file header")?;

        if data[EI_CLASS] != ELFCLASS32 {
            return Err(LoaderError::UnsupportedClass(data[EI_CLASS]));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(LoaderError::UnsupportedEncoding(data[EI_DATA]));
        }

        let entry = read_u32(data, E_ENTRY, "e_entry")?;
        let phoff = read_u32(data, E_PHOFF, "e_phoff")? as usize;
        let phentsize = read_u16(data, E_PHENTSIZE, "e_phentsize")? as usize;
        let phnum = read_u16(data, E_PHNUM, "e_phnum")? as usize;

        if phnum > 0 && phentsize < ELF32_PHDR_SIZE {
            return Err(LoaderError::Truncated {
                what: "program header entry",
                offset: phoff,
                len: ELF32_PHDR_SIZE,
            });
        }
        slice(data, phoff, phentsize * phnum, "program header table")?;

        let mut program_headers = Vec::with_capacity(phnum);
        for i in 0..phnum {
            let base = phoff + i * phentsize;
            program_headers.push(ProgramHeader {
                p_type: read_u32(data, base + P_TYPE, "p_type")?,
                offset: read_u32(data, base + P_OFFSET, "p_offset")?,
                vaddr: read_u32(data, base + P_VADDR, "p_vaddr")?,
                filesz: read_u32(data, base + P_FILESZ, "p_filesz")?,
                memsz: read_u32(data, base + P_MEMSZ, "p_memsz")?,
                flags: read_u32(data, base + P_FLAGS, "p_flags")?,
            });
        }

        Ok(Self {
            data,
            entry,
            program_headers,
        })
    }

    /// Copy every `PT_LOAD` segment into `memory` and return the entry point
    ///
    /// Each segment's `memsz` bytes are zeroed before its `filesz` bytes are
    /// copied in, so `.bss` comes up cleared.
    pub fn load<M: Memory386 + ?Sized>(&self, memory: &mut M) -> Result<u32, LoaderError> {
        for (i, ph) in self.program_headers.iter().enumerate() {
            if ph.p_type != PT_LOAD {
                log(LogCategory::Loader, LogLevel::Debug, || {
                    format!("Skipping program header {} of type {}", i, ph.p_type)
                });
                continue;
            }

            let bytes = slice(
                self.data,
                ph.offset as usize,
                ph.filesz as usize,
                "segment data",
            )?;

            log(LogCategory::Loader, LogLevel::Debug, || {
                format!(
                    "Segment {}: 0x{:X} file bytes at 0x{:08X}, 0x{:X} in memory, flags {:03b}",
                    i, ph.filesz, ph.vaddr, ph.memsz, ph.flags
                )
            });

            memory.clear(ph.vaddr, ph.memsz as usize)?;
            memory.write_block(ph.vaddr, bytes)?;
        }

        log(LogCategory::Loader, LogLevel::Info, || {
            format!("Entry point 0x{:08X}", self.entry)
        });
        Ok(self.entry)
    }
}
