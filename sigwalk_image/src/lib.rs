pub mod image;
#[cfg(all(windows, feature = "process-internal"))]
pub mod process;

pub mod scanner {
    pub use sigwalk_scanner::*;
}

use std::{borrow::Cow, collections::BTreeMap, ops::Range};

pub use image::Image;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryAccessError {
    #[error("read of {len:#x} bytes at {address:#x} is out of bounds")]
    OutOfBounds { address: usize, len: usize },
    #[error("address arithmetic overflowed at {0:#x}")]
    Overflow(usize),
    #[error("invalid UTF-16 string")]
    Utf16Error,
}

impl MemoryAccessError {
    fn oob(range: &Range<usize>) -> Self {
        Self::OutOfBounds {
            address: range.start,
            len: range.end.saturating_sub(range.start),
        }
    }
}

/// Continuous block of memory
pub trait MemoryBlockTrait {
    /// Return starting address of block
    fn address(&self) -> usize;
    /// Returned contained memory
    fn data(&self) -> &[u8];
}

/// Potentially sparse, read-only view of foreign memory. Every read is checked and fails instead
/// of faulting.
pub trait MemoryTrait {
    /// Return slice of u8 at `range`
    fn range(&self, range: Range<usize>) -> Result<&[u8], MemoryAccessError>;

    /// Check that `len` bytes at `address` can be read
    fn probe(&self, address: usize, len: usize) -> bool {
        address
            .checked_add(len)
            .is_some_and(|end| self.range(address..end).is_ok())
    }

    fn read_array<const N: usize>(&self, address: usize) -> Result<[u8; N], MemoryAccessError> {
        let end = address
            .checked_add(N)
            .ok_or(MemoryAccessError::Overflow(address))?;
        let range = address..end;
        self.range(range.clone())?
            .try_into()
            .map_err(|_| MemoryAccessError::oob(&range))
    }

    /// Return u8 at `address`
    fn index(&self, address: usize) -> Result<u8, MemoryAccessError> {
        Ok(self.read_array::<1>(address)?[0])
    }
    /// Return u16 at `address`
    fn u16_le(&self, address: usize) -> Result<u16, MemoryAccessError> {
        Ok(u16::from_le_bytes(self.read_array(address)?))
    }
    /// Return i32 at `address`
    fn i32_le(&self, address: usize) -> Result<i32, MemoryAccessError> {
        Ok(i32::from_le_bytes(self.read_array(address)?))
    }
    /// Return u32 at `address`
    fn u32_le(&self, address: usize) -> Result<u32, MemoryAccessError> {
        Ok(u32::from_le_bytes(self.read_array(address)?))
    }
    /// Return u64 at `address`
    fn u64_le(&self, address: usize) -> Result<u64, MemoryAccessError> {
        Ok(u64::from_le_bytes(self.read_array(address)?))
    }
    /// Return ptr (usize) at `address`
    fn ptr(&self, address: usize) -> Result<usize, MemoryAccessError> {
        Ok(self.u64_le(address)? as usize)
    }
    /// Return instruction relative address at `address`
    fn rip4(&self, address: usize) -> Result<usize, MemoryAccessError> {
        let displacement = self.i32_le(address)?;
        offset_address(address, 4)?
            .checked_add_signed(displacement as isize)
            .ok_or(MemoryAccessError::Overflow(address))
    }

    /// Read null terminated wide string from `address`, at most `max_chars` code units
    fn read_wstring(&self, address: usize, max_chars: usize) -> Result<String, MemoryAccessError> {
        let mut units = vec![];
        for i in 0..max_chars {
            let unit = self.u16_le(element_address(address, i, 2)?)?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| MemoryAccessError::Utf16Error)
    }
}

impl<T: MemoryBlockTrait> MemoryTrait for T {
    fn range(&self, range: Range<usize>) -> Result<&[u8], MemoryAccessError> {
        let data = self.data();
        range
            .start
            .checked_sub(self.address())
            .zip(range.end.checked_sub(self.address()))
            .filter(|(start, end)| start <= end)
            .and_then(|(start, end)| data.get(start..end))
            .ok_or_else(|| MemoryAccessError::oob(&range))
    }
}

/// `base + offset` for a base read from foreign memory
pub fn offset_address(base: usize, offset: usize) -> Result<usize, MemoryAccessError> {
    base.checked_add(offset).ok_or(MemoryAccessError::Overflow(base))
}

/// Address of element `index` in an array of `stride` byte elements starting at `base`
pub fn element_address(
    base: usize,
    index: usize,
    stride: usize,
) -> Result<usize, MemoryAccessError> {
    index
        .checked_mul(stride)
        .and_then(|offset| base.checked_add(offset))
        .ok_or(MemoryAccessError::Overflow(base))
}

/// Resolve a position independent operand: when `displacement_offset` is non-zero the 32-bit
/// displacement at `match_address + displacement_offset` is applied relative to the end of the
/// field, then `extra_offset` is added.
pub fn resolve_displacement(
    memory: &(impl MemoryTrait + ?Sized),
    match_address: usize,
    displacement_offset: usize,
    extra_offset: isize,
) -> Result<usize, MemoryAccessError> {
    let mut address = match_address;
    if displacement_offset != 0 {
        address = memory.rip4(offset_address(match_address, displacement_offset)?)?;
    }
    if extra_offset != 0 {
        address = address
            .checked_add_signed(extra_offset)
            .ok_or(MemoryAccessError::Overflow(address))?;
    }
    Ok(address)
}

pub struct NamedMemorySection<'data> {
    name: String,
    address: usize,
    data: Cow<'data, [u8]>,
}

impl<'data> NamedMemorySection<'data> {
    pub fn new<D: Into<Cow<'data, [u8]>>>(name: String, address: usize, data: D) -> Self {
        Self {
            name,
            address,
            data: data.into(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
impl MemoryBlockTrait for NamedMemorySection<'_> {
    fn address(&self) -> usize {
        self.address
    }
    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Sparse memory made of disjoint sections, e.g. a process dump
#[derive(Default)]
pub struct Memory<'data> {
    sections: Vec<NamedMemorySection<'data>>,
}

impl<'data> Memory<'data> {
    pub fn new_sections(sections: Vec<NamedMemorySection<'data>>) -> Self {
        Self { sections }
    }
    pub fn sections(&self) -> &[NamedMemorySection<'data>] {
        &self.sections
    }
    pub fn get_section_containing(
        &self,
        address: usize,
    ) -> Result<&NamedMemorySection<'data>, MemoryAccessError> {
        self.sections
            .iter()
            .find(|section| {
                address >= section.address && address - section.address < section.data.len()
            })
            .ok_or(MemoryAccessError::OutOfBounds { address, len: 1 })
    }
}

impl MemoryTrait for Memory<'_> {
    fn range(&self, range: Range<usize>) -> Result<&[u8], MemoryAccessError> {
        self.get_section_containing(range.start)?.range(range)
    }
}

/// Assemble a [`Memory`] by writing little endian values at absolute addresses. Writes landing in
/// or directly after an existing block extend it, anything else starts a new block.
#[derive(Default)]
pub struct MemoryBuilder {
    blocks: BTreeMap<usize, Vec<u8>>,
}

impl MemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `len` zeroed bytes at `address`
    pub fn zeroed(mut self, address: usize, len: usize) -> Self {
        self.write(address, &vec![0; len]);
        self
    }
    pub fn bytes(mut self, address: usize, bytes: &[u8]) -> Self {
        self.write(address, bytes);
        self
    }
    pub fn u64(self, address: usize, value: u64) -> Self {
        self.bytes(address, &value.to_le_bytes())
    }
    pub fn ptr(self, address: usize, value: usize) -> Self {
        self.u64(address, value as u64)
    }
    pub fn i32(self, address: usize, value: i32) -> Self {
        self.bytes(address, &value.to_le_bytes())
    }
    pub fn wstring(self, address: usize, value: &str) -> Self {
        let bytes = value
            .encode_utf16()
            .chain([0])
            .flat_map(u16::to_le_bytes)
            .collect::<Vec<_>>();
        self.bytes(address, &bytes)
    }

    fn write(&mut self, address: usize, bytes: &[u8]) {
        let end = address + bytes.len();
        let start = self
            .blocks
            .range(..=address)
            .next_back()
            .filter(|(start, block)| **start + block.len() >= address)
            .map(|(start, _)| *start)
            .unwrap_or(address);

        // absorb following blocks that the write now touches
        let touched = self
            .blocks
            .range(start..=end)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();
        let mut merged = vec![];
        for s in touched {
            let block = self.blocks.remove(&s).unwrap_or_default();
            let offset = s - start;
            if merged.len() < offset + block.len() {
                merged.resize(offset + block.len(), 0);
            }
            merged[offset..offset + block.len()].copy_from_slice(&block);
        }
        let offset = address - start;
        if merged.len() < offset + bytes.len() {
            merged.resize(offset + bytes.len(), 0);
        }
        merged[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.blocks.insert(start, merged);
    }

    pub fn build(self) -> Memory<'static> {
        Memory::new_sections(
            self.blocks
                .into_iter()
                .map(|(address, data)| NamedMemorySection::new(String::new(), address, data))
                .collect(),
        )
    }
}
