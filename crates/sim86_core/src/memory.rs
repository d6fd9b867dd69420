/*
    sim86
    https://github.com/dbalsom/sim86

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    memory.rs

    Sparse byte-addressable store over the 1 MiB 8086 address space.
    Chunks are allocated on first write; a never-written byte reads as
    zero. Accesses outside the address space indicate a bad effective
    address upstream and are hard errors.

*/

use fxhash::FxHashMap;

use crate::cpu_common::MemoryError;

/// Size of the 8086 physical address space.
pub const ADDRESS_SPACE: u32 = 0x10_0000;

/// Allocation granularity of the sparse store.
pub const CHUNK_SIZE: usize = 0x1000;

pub struct Memory {
    chunks: FxHashMap<u32, Box<[u8; CHUNK_SIZE]>>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            chunks: FxHashMap::default(),
        }
    }

    #[inline(always)]
    fn check(address: u32) -> Result<(), MemoryError> {
        if address >= ADDRESS_SPACE {
            return Err(MemoryError::OutOfRange(address));
        }
        Ok(())
    }

    pub fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        Self::check(address)?;
        let chunk_idx = address / CHUNK_SIZE as u32;
        Ok(match self.chunks.get(&chunk_idx) {
            Some(chunk) => chunk[address as usize % CHUNK_SIZE],
            None => 0,
        })
    }

    /// Little-endian word read. The high byte wraps around the top of the
    /// address space, matching segment arithmetic.
    pub fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        let lo = self.read_u8(address)? as u16;
        let hi = self.read_u8((address + 1) % ADDRESS_SPACE)? as u16;
        Ok(hi << 8 | lo)
    }

    pub fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        Self::check(address)?;
        let chunk_idx = address / CHUNK_SIZE as u32;
        let chunk = self
            .chunks
            .entry(chunk_idx)
            .or_insert_with(|| Box::new([0u8; CHUNK_SIZE]));
        chunk[address as usize % CHUNK_SIZE] = value;
        Ok(())
    }

    /// Number of chunks materialized so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_written_bytes_read_zero() {
        let mem = Memory::new();
        assert_eq!(mem.read_u8(0), Ok(0));
        assert_eq!(mem.read_u8(ADDRESS_SPACE - 1), Ok(0));
        assert_eq!(mem.read_u16(0x12345), Ok(0));
        assert_eq!(mem.chunk_count(), 0);
    }

    #[test]
    fn chunks_allocate_lazily_on_write() {
        let mut mem = Memory::new();
        mem.write_u8(0x1234, 0xAB).unwrap();
        assert_eq!(mem.chunk_count(), 1);
        assert_eq!(mem.read_u8(0x1234), Ok(0xAB));
        // Same chunk
        mem.write_u8(0x1235, 0xCD).unwrap();
        assert_eq!(mem.chunk_count(), 1);
        assert_eq!(mem.read_u16(0x1234), Ok(0xCDAB));
        // Different chunk
        mem.write_u8(0x80000, 0x01).unwrap();
        assert_eq!(mem.chunk_count(), 2);
    }

    #[test]
    fn out_of_range_access_is_fatal() {
        let mut mem = Memory::new();
        assert_eq!(mem.read_u8(ADDRESS_SPACE), Err(MemoryError::OutOfRange(ADDRESS_SPACE)));
        assert_eq!(
            mem.write_u8(0xFFFF_FFFF, 0),
            Err(MemoryError::OutOfRange(0xFFFF_FFFF))
        );
    }

    #[test]
    fn word_read_wraps_the_address_space() {
        let mut mem = Memory::new();
        mem.write_u8(ADDRESS_SPACE - 1, 0x34).unwrap();
        mem.write_u8(0, 0x12).unwrap();
        assert_eq!(mem.read_u16(ADDRESS_SPACE - 1), Ok(0x1234));
    }
}
