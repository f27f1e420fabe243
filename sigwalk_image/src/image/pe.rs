use anyhow::{bail, Context, Result};
use object::{Object, ObjectSection};
use tracing::debug;

use super::Image;

impl Image<'static> {
    /// Load a PE file from disk and lay its sections out the way the loader maps them, so offsets
    /// into the result are relative virtual addresses.
    pub fn read_pe(file: &[u8]) -> Result<Self> {
        let object = object::File::parse(file).context("failed to parse image")?;
        if !matches!(object.format(), object::BinaryFormat::Pe) {
            bail!("expected a PE image, found {:?}", object.format());
        }

        let base_address = object.relative_address_base() as usize;

        let mut size = 0;
        let mut first_section = usize::MAX;
        for section in object.sections() {
            let rva = (section.address() as usize)
                .checked_sub(base_address)
                .context("section below image base")?;
            first_section = first_section.min(rva);
            let end = rva
                .checked_add(section.size() as usize)
                .context("section extends past the address space")?;
            size = size.max(end);
        }
        if first_section == usize::MAX {
            bail!("image has no sections");
        }

        let mut mapped = vec![0; size];
        let headers = first_section.min(file.len());
        mapped[..headers].copy_from_slice(&file[..headers]);

        for section in object.sections() {
            let rva = section.address() as usize - base_address;
            let data = section.data()?;
            let len = data.len().min(section.size() as usize);
            debug!(
                "mapping section {} at {:#x} ({:#x} bytes)",
                section.name().unwrap_or_default(),
                rva,
                len
            );
            mapped[rva..rva + len].copy_from_slice(&data[..len]);
        }

        Ok(Image::new(base_address, mapped))
    }
}
