//! Flat guest address space
//!
//! The engine only talks to memory through [`Memory386`]. Implementations
//! provide bounds-checked block transfers; the typed little-endian accessors
//! are built on top of them.

use super::OperandSize;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Out of bounds: {len} byte(s) at 0x{addr:08X} (memory size 0x{size:X})")]
    OutOfBounds { addr: u32, len: usize, size: usize },
}

/// Memory interface trait for the i386 interpreter
///
/// Every access fails with [`MemoryError::OutOfBounds`] when
/// `addr + len` exceeds [`Memory386::size`].
pub trait Memory386 {
    /// Size of the address space in bytes
    fn size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `addr` into `buf`
    fn read_block(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` into memory starting at `addr`
    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// Zero `len` bytes starting at `addr`
    fn clear(&mut self, addr: u32, len: usize) -> Result<(), MemoryError> {
        self.write_block(addr, &vec![0; len])
    }

    fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_block(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, addr: u32) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.read_block(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_block(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), MemoryError> {
        self.write_block(addr, &[val])
    }

    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), MemoryError> {
        self.write_block(addr, &val.to_le_bytes())
    }

    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), MemoryError> {
        self.write_block(addr, &val.to_le_bytes())
    }

    /// Width-dispatched read, zero-extended to 32 bits
    fn read_sized(&self, size: OperandSize, addr: u32) -> Result<u32, MemoryError> {
        match size {
            OperandSize::Byte => self.read_u8(addr).map(u32::from),
            OperandSize::Word => self.read_u16(addr).map(u32::from),
            OperandSize::Dword => self.read_u32(addr),
        }
    }

    /// Width-dispatched write of the low bytes of `val`
    fn write_sized(&mut self, size: OperandSize, addr: u32, val: u32) -> Result<(), MemoryError> {
        match size {
            OperandSize::Byte => self.write_u8(addr, val as u8),
            OperandSize::Word => self.write_u16(addr, val as u16),
            OperandSize::Dword => self.write_u32(addr, val),
        }
    }
}

/// Zero-initialized byte store of fixed size
///
/// Tracks the smallest range covering every write so a printer can show only
/// the part of memory a program touched.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    data: Vec<u8>,
    dirty: Option<Range<usize>>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            dirty: None,
        }
    }

    /// Create a store and copy `program` to `addr`
    pub fn with_program(size: usize, addr: u32, program: &[u8]) -> Result<Self, MemoryError> {
        let mut mem = Self::new(size);
        mem.load(addr, program)?;
        Ok(mem)
    }

    /// Copy a flat image to `addr`
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.write_block(addr, bytes)
    }

    #[inline]
    fn check(&self, addr: u32, len: usize) -> Result<Range<usize>, MemoryError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds {
                addr,
                len,
                size: self.data.len(),
            }),
        }
    }

    fn touch(&mut self, range: &Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range.clone(),
        });
    }

    /// Range of bytes modified so far, if any
    pub fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Pull the start of the dirty range down to `addr`
    ///
    /// Used after loading an image so a dump starts at the entry point.
    pub fn mark_dirty_from(&mut self, addr: u32) {
        let start = (addr as usize).min(self.data.len());
        self.dirty = Some(match self.dirty.take() {
            Some(d) => start..d.end.max(start),
            None => start..start,
        });
    }

    /// Forget all dirty tracking
    pub fn reset_dirty(&mut self) {
        self.dirty = None;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Memory386 for FlatMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read_block(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.check(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.check(addr, data.len())?;
        self.data[range.clone()].copy_from_slice(data);
        self.touch(&range);
        Ok(())
    }

    fn clear(&mut self, addr: u32, len: usize) -> Result<(), MemoryError> {
        let range = self.check(addr, len)?;
        self.data[range].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_memory_is_zeroed() {
        let mem = FlatMemory::new(64);
        assert_eq!(mem.size(), 64);
        assert!(mem.as_slice().iter().all(|&b| b == 0));
        assert_eq!(mem.dirty_range(), None);
    }

    #[test]
    fn test_little_endian_accessors() {
        let mut mem = FlatMemory::new(16);
        mem.write_u32(4, 0x1122_3344).unwrap();
        assert_eq!(mem.read_u8(4).unwrap(), 0x44);
        assert_eq!(mem.read_u16(4).unwrap(), 0x3344);
        assert_eq!(mem.read_u16(6).unwrap(), 0x1122);
        assert_eq!(mem.read_u32(4).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_sized_access_truncates() {
        let mut mem = FlatMemory::new(16);
        mem.write_sized(OperandSize::Word, 0, 0xAABB_CCDD).unwrap();
        assert_eq!(mem.read_sized(OperandSize::Dword, 0).unwrap(), 0x0000_CCDD);
        mem.write_sized(OperandSize::Byte, 8, 0x1FF).unwrap();
        assert_eq!(mem.read_sized(OperandSize::Byte, 8).unwrap(), 0xFF);
        assert_eq!(mem.read_u8(9).unwrap(), 0);
    }

    #[test]
    fn test_out_of_bounds_is_reported() {
        let mut mem = FlatMemory::new(16);
        assert!(mem.read_u8(15).is_ok());
        assert_eq!(
            mem.read_u32(14),
            Err(MemoryError::OutOfBounds {
                addr: 14,
                len: 4,
                size: 16
            })
        );
        assert!(mem.write_u16(15, 1).is_err());
        assert!(mem.write_block(u32::MAX, &[1, 2]).is_err());
        assert!(mem.clear(10, 7).is_err());
        // A failed write must not mark anything dirty
        assert_eq!(mem.dirty_range(), None);
    }

    #[test]
    fn test_dirty_range_grows_with_writes() {
        let mut mem = FlatMemory::new(256);
        mem.write_u8(100, 1).unwrap();
        assert_eq!(mem.dirty_range(), Some(100..101));
        mem.write_u32(20, 1).unwrap();
        assert_eq!(mem.dirty_range(), Some(20..101));
        mem.write_block(200, &[1, 2, 3]).unwrap();
        assert_eq!(mem.dirty_range(), Some(20..203));

        mem.mark_dirty_from(0);
        assert_eq!(mem.dirty_range(), Some(0..203));
        mem.reset_dirty();
        assert_eq!(mem.dirty_range(), None);
    }

    #[test]
    fn test_clear_zeroes_range() {
        let mut mem = FlatMemory::with_program(32, 8, &[0xAA; 8]).unwrap();
        mem.clear(10, 4).unwrap();
        assert_eq!(&mem.as_slice()[8..16], &[0xAA, 0xAA, 0, 0, 0, 0, 0xAA, 0xAA]);
    }

    #[test]
    fn test_block_round_trip() {
        let mut mem = FlatMemory::new(32);
        mem.write_block(3, b"hello").unwrap();
        let mut buf = [0u8; 5];
        mem.read_block(3, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
