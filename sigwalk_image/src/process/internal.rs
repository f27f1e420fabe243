//! Access to the address space of the current process.

use std::{ffi::c_void, ops::Range};

use anyhow::{Context, Result};
use windows::Win32::System::{
    LibraryLoader::GetModuleHandleA,
    Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_GUARD, PAGE_NOACCESS},
};

use crate::{image::image_size, offset_address, Image, MemoryAccessError, MemoryTrait};

/// Readable view of the whole process. Every read is preceded by a region query so unmapped or
/// guarded pages produce an error instead of a fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl ProcessMemory {
    fn is_readable(range: &Range<usize>) -> bool {
        let mut address = range.start;
        while address < range.end {
            let mut info = MEMORY_BASIC_INFORMATION::default();
            let written = unsafe {
                VirtualQuery(
                    Some(address as *const c_void),
                    &mut info,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0
                || info.State != MEM_COMMIT
                || info.Protect.0 == 0
                || info.Protect.0 & (PAGE_NOACCESS.0 | PAGE_GUARD.0) != 0
            {
                return false;
            }
            let region_end = (info.BaseAddress as usize).saturating_add(info.RegionSize);
            if region_end <= address {
                return false;
            }
            address = region_end;
        }
        true
    }
}

impl MemoryTrait for ProcessMemory {
    fn range(&self, range: Range<usize>) -> Result<&[u8], MemoryAccessError> {
        if range.start > range.end || range.start == 0 || !Self::is_readable(&range) {
            return Err(MemoryAccessError::OutOfBounds {
                address: range.start,
                len: range.end.saturating_sub(range.start),
            });
        }
        Ok(unsafe { std::slice::from_raw_parts(range.start as *const u8, range.len()) })
    }
}

/// View of the main module of the current process
pub fn read_image() -> Result<Image<'static>> {
    let main_module = unsafe { GetModuleHandleA(None) }.context("could not find main module")?;
    let base_address = main_module.0 as usize;
    let size = image_size(&ProcessMemory, base_address)?;

    let data = ProcessMemory
        .range(base_address..offset_address(base_address, size)?)
        .context("main module is not readable")?;
    // the module stays mapped for the lifetime of the process
    let data: &'static [u8] =
        unsafe { std::slice::from_raw_parts(data.as_ptr(), data.len()) };

    Ok(Image::new(base_address, data))
}
