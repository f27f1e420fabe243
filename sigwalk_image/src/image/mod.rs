#[cfg(feature = "image-pe")]
pub mod pe;

use std::borrow::Cow;

use sigwalk_scanner::{scan_pattern, Pattern};

use crate::{offset_address, MemoryAccessError, MemoryBlockTrait, MemoryTrait};

/// Offset of `e_lfanew` in the DOS header
pub const DOS_LFANEW_OFFSET: usize = 60;
/// Offset of `SizeOfImage` from the start of the NT headers
pub const NT_SIZE_OF_IMAGE_OFFSET: usize = 80;

/// Read the declared in-memory size of the module mapped at `base_address`
pub fn image_size(
    memory: &(impl MemoryTrait + ?Sized),
    base_address: usize,
) -> Result<usize, MemoryAccessError> {
    let lfanew = memory.i32_le(offset_address(base_address, DOS_LFANEW_OFFSET)?)?;
    let nt = base_address
        .checked_add_signed(lfanew as isize)
        .ok_or(MemoryAccessError::Overflow(base_address))?;
    Ok(memory.u32_le(offset_address(nt, NT_SIZE_OF_IMAGE_OFFSET)?)? as usize)
}

/// Contiguous view of a loaded module: `data[i]` is the byte at `base_address + i`
pub struct Image<'data> {
    pub base_address: usize,
    data: Cow<'data, [u8]>,
}

impl<'data> Image<'data> {
    pub fn new<D: Into<Cow<'data, [u8]>>>(base_address: usize, data: D) -> Self {
        Self {
            base_address,
            data: data.into(),
        }
    }

    /// Wrap a module view that starts with its headers, trimmed to the size the headers declare
    pub fn from_module<D: Into<Cow<'data, [u8]>>>(
        base_address: usize,
        data: D,
    ) -> Result<Self, MemoryAccessError> {
        let image = Self::new(base_address, data);
        let size = image_size(&image, base_address)?;
        if size > image.data.len() {
            return Err(MemoryAccessError::OutOfBounds {
                address: base_address,
                len: size,
            });
        }
        Ok(match image.data {
            Cow::Borrowed(data) => Self::new(base_address, &data[..size]),
            Cow::Owned(mut data) => {
                data.truncate(size);
                Self::new(base_address, data)
            }
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn end_address(&self) -> usize {
        self.base_address + self.data.len()
    }

    /// Scan the whole image, returning the absolute address of the first match
    pub fn find(&self, pattern: &Pattern) -> Option<usize> {
        scan_pattern(pattern, self.base_address, &self.data)
    }
}

impl MemoryBlockTrait for Image<'_> {
    fn address(&self) -> usize {
        self.base_address
    }
    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Minimal module: DOS header pointing at NT headers at 0x80 declaring `size`
    pub(crate) fn fake_module(size: usize, buffer_len: usize) -> Vec<u8> {
        let mut data = vec![0; buffer_len];
        data[0] = b'M';
        data[1] = b'Z';
        data[DOS_LFANEW_OFFSET..DOS_LFANEW_OFFSET + 4].copy_from_slice(&0x80i32.to_le_bytes());
        let size_field = 0x80 + NT_SIZE_OF_IMAGE_OFFSET;
        data[size_field..size_field + 4].copy_from_slice(&(size as u32).to_le_bytes());
        data
    }

    #[test]
    fn test_header_size() {
        let data = fake_module(0x2000, 0x3000);
        let image = Image::from_module(0x1_4000_0000, data).unwrap();
        assert_eq!(0x2000, image.size());
        assert_eq!(0x1_4000_2000, image.end_address());
        assert_eq!(Ok(0x2000), image_size(&image, image.base_address));
    }

    #[test]
    fn test_header_size_exceeds_view() {
        let data = fake_module(0x4000, 0x1000);
        assert!(Image::from_module(0x1000, &data[..]).is_err());
        assert!(Image::from_module(0x1000, &data[..32]).is_err());
    }

    #[test]
    fn test_header_size_overflow() {
        let memory = crate::MemoryBuilder::new().build();
        assert_eq!(
            Err(MemoryAccessError::Overflow(usize::MAX - 8)),
            image_size(&memory, usize::MAX - 8)
        );

        // e_lfanew pointing the NT headers at the end of the address space
        let base = usize::MAX - 0xff;
        let memory = crate::MemoryBuilder::new()
            .zeroed(base, 0x80)
            .i32(base + DOS_LFANEW_OFFSET, 0xc0)
            .build();
        assert_eq!(
            Err(MemoryAccessError::Overflow(base + 0xc0)),
            image_size(&memory, base)
        );
    }

    #[test]
    fn test_find_absolute() {
        let mut data = fake_module(0x2000, 0x2000);
        data[0x1000..0x1004].copy_from_slice(&[0x48, 0x8b, 0x05, 0x99]);
        let image = Image::from_module(0x7ff0_0000, data).unwrap();
        assert_eq!(
            Some(0x7ff0_0000 + 0x1000),
            image.find(&Pattern::new("48 8B 05 ?"))
        );
        assert_eq!(None, image.find(&Pattern::new("48 8B 06")));
    }
}
