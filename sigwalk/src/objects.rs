//! Name and index lookup over the engine's global object table.
//!
//! Two physical layouts exist. [`TableLayout::Flat`] is a single array of slots while
//! [`TableLayout::Chunked`] is an array of pointers to fixed capacity chunks of slots. Both expose
//! the same [`ObjectTable::access_by_index`] and [`ObjectTable::find_by_name`] operations.

use sigwalk_image::{element_address, offset_address, MemoryTrait};
use strum::Display;
use tracing::trace;

use crate::{NameHandle, NameResolver, Result};

/// Offset of the name handle in an object
pub const OBJECT_NAME_OFFSET: usize = 24;
/// Offset of the owning object pointer in an object
pub const OBJECT_OUTER_OFFSET: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TableLayout {
    Flat,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectTableDescriptor {
    pub layout: TableLayout,
    pub address: usize,
}

/// Address of a live object in the foreign process. Valid only while that memory stays mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub usize);

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableGeometry {
    /// Size of one slot, the object pointer is its first field
    pub stride: usize,
    pub flat_count_offset: usize,
    pub chunked_count_offset: usize,
    pub chunk_capacity: usize,
    /// Upper bound on chunk pointer slots inspected
    pub max_chunks: usize,
}

impl Default for TableGeometry {
    fn default() -> Self {
        Self {
            stride: 24,
            flat_count_offset: 12,
            chunked_count_offset: 20,
            chunk_capacity: 0xFFFF,
            max_chunks: 0x1000,
        }
    }
}

/// Run of non-null chunk pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSpan {
    array: usize,
    first: usize,
    count: usize,
}

pub struct ObjectTable<'a, M: MemoryTrait + ?Sized> {
    memory: &'a M,
    names: &'a dyn NameResolver,
    descriptor: ObjectTableDescriptor,
    geometry: TableGeometry,
}

impl<'a, M: MemoryTrait + ?Sized> ObjectTable<'a, M> {
    pub fn new(
        memory: &'a M,
        names: &'a dyn NameResolver,
        descriptor: ObjectTableDescriptor,
    ) -> Self {
        Self {
            memory,
            names,
            descriptor,
            geometry: Default::default(),
        }
    }

    pub fn with_geometry(mut self, geometry: TableGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn descriptor(&self) -> ObjectTableDescriptor {
        self.descriptor
    }
    pub fn memory(&self) -> &'a M {
        self.memory
    }
    pub fn names(&self) -> &'a dyn NameResolver {
        self.names
    }

    /// Element count stored in the table header
    pub fn len(&self) -> Result<usize> {
        let offset = match self.descriptor.layout {
            TableLayout::Flat => self.geometry.flat_count_offset,
            TableLayout::Chunked => self.geometry.chunked_count_offset,
        };
        let count = self
            .memory
            .i32_le(offset_address(self.descriptor.address, offset)?)?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn chunk_span(&self) -> Result<ChunkSpan> {
        let array = self.memory.ptr(self.descriptor.address)?;
        let slot = |i: usize| -> Result<usize> {
            Ok(self.memory.ptr(element_address(array, i, 8)?)?)
        };

        let limit = self.geometry.max_chunks;
        let mut i = 0;
        while i < limit && slot(i)? == 0 {
            i += 1;
        }
        let first = i;
        while i < limit && slot(i)? != 0 {
            i += 1;
        }
        Ok(ChunkSpan {
            array,
            first,
            count: i - first,
        })
    }

    fn chunked_slot(&self, span: &ChunkSpan, index: usize) -> Result<Option<usize>> {
        let capacity = self.geometry.chunk_capacity;
        let mut chunk = index / capacity;
        // an exact nonzero multiple of the capacity belongs to the previous chunk
        if chunk != 0 && chunk * capacity == index {
            chunk -= 1;
        }
        if chunk >= span.count {
            return Ok(None);
        }
        let base = self
            .memory
            .ptr(element_address(span.array, span.first + chunk, 8)?)?;
        Ok(Some(element_address(
            base,
            index - capacity * chunk,
            self.geometry.stride,
        )?))
    }

    fn slot(&self, span: Option<&ChunkSpan>, index: usize) -> Result<Option<ObjectHandle>> {
        let slot = match span {
            None => {
                let array = self.memory.ptr(self.descriptor.address)?;
                Some(element_address(array, index, self.geometry.stride)?)
            }
            Some(span) => self.chunked_slot(span, index)?,
        };
        let Some(slot) = slot else {
            return Ok(None);
        };
        let object = self.memory.ptr(slot)?;
        Ok((object != 0).then_some(ObjectHandle(object)))
    }

    fn span(&self) -> Result<Option<ChunkSpan>> {
        Ok(match self.descriptor.layout {
            TableLayout::Flat => None,
            TableLayout::Chunked => Some(self.chunk_span()?),
        })
    }

    /// Object at `index`, `None` for empty slots and indices past the element count
    pub fn access_by_index(&self, index: usize) -> Result<Option<ObjectHandle>> {
        if index >= self.len()? {
            return Ok(None);
        }
        self.slot(self.span()?.as_ref(), index)
    }

    /// Every non-null object in index order. Unreadable slots are skipped.
    pub fn objects(&self) -> Result<impl Iterator<Item = ObjectHandle> + '_> {
        let len = self.len()?;
        let span = self.span()?;
        Ok((0..len).filter_map(move |i| match self.slot(span.as_ref(), i) {
            Ok(object) => object,
            Err(err) => {
                trace!("skipping object {i}: {err}");
                None
            }
        }))
    }

    pub fn name_handle(&self, object: ObjectHandle) -> Result<NameHandle> {
        let address = offset_address(object.0, OBJECT_NAME_OFFSET)?;
        Ok(NameHandle(self.memory.u64_le(address)?))
    }

    /// Display name of `object`, empty if it cannot be resolved
    pub fn object_name(&self, object: ObjectHandle) -> Result<String> {
        Ok(self.names.resolve(self.name_handle(object)?))
    }

    pub fn outer(&self, object: ObjectHandle) -> Result<Option<ObjectHandle>> {
        let outer = self
            .memory
            .ptr(offset_address(object.0, OBJECT_OUTER_OFFSET)?)?;
        Ok((outer != 0).then_some(ObjectHandle(outer)))
    }

    /// First object in index order whose display name is exactly `name`
    pub fn find_by_name(&self, name: &str) -> Result<Option<ObjectHandle>> {
        for object in self.objects()? {
            match self.object_name(object) {
                Ok(object_name) if object_name == name => return Ok(Some(object)),
                Ok(_) => {}
                Err(err) => trace!("skipping {object}: {err}"),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::HashMap;

    use sigwalk_image::{Memory, MemoryAccessError, MemoryBuilder};

    use super::*;
    use crate::ResolveError;

    pub(crate) const TABLE: usize = 0x10_0000;
    const ARRAY: usize = 0x20_0000;
    const OBJECTS: usize = 0x30_0000;
    pub(crate) const OBJECT_SIZE: usize = 0x100;

    pub(crate) fn object_address(i: usize) -> usize {
        OBJECTS + i * OBJECT_SIZE
    }

    /// Writes an object with name handle `name` and owner `outer` at `object_address(i)`
    pub(crate) fn put_object(
        memory: MemoryBuilder,
        i: usize,
        name: u64,
        outer: usize,
    ) -> MemoryBuilder {
        memory
            .zeroed(object_address(i), OBJECT_SIZE)
            .u64(object_address(i) + OBJECT_NAME_OFFSET, name)
            .ptr(object_address(i) + OBJECT_OUTER_OFFSET, outer)
    }

    pub(crate) fn names(names: &[(u64, &str)]) -> HashMap<NameHandle, String> {
        names
            .iter()
            .map(|(handle, name)| (NameHandle(*handle), name.to_string()))
            .collect()
    }

    /// Flat table whose slot `i` holds `objects[i]` (0 for an empty slot)
    pub(crate) fn flat_table(mut memory: MemoryBuilder, objects: &[usize]) -> MemoryBuilder {
        memory = memory
            .zeroed(TABLE, 0x20)
            .ptr(TABLE, ARRAY)
            .i32(TABLE + 12, objects.len() as i32);
        for (i, object) in objects.iter().enumerate() {
            memory = memory.zeroed(ARRAY + i * 24, 24).ptr(ARRAY + i * 24, *object);
        }
        memory
    }

    const CHUNKS: usize = 0x40_0000;

    /// Chunked table with `leading_null` unused chunk pointers followed by `chunks`, each chunk a
    /// list of slot values
    pub(crate) fn chunked_table(
        mut memory: MemoryBuilder,
        count: i32,
        leading_null: usize,
        chunks: &[Vec<usize>],
    ) -> MemoryBuilder {
        memory = memory
            .zeroed(TABLE, 0x20)
            .ptr(TABLE, ARRAY)
            .i32(TABLE + 20, count)
            .zeroed(ARRAY, (leading_null + chunks.len() + 1) * 8);
        for (c, slots) in chunks.iter().enumerate() {
            let chunk = CHUNKS + c * 0x1000;
            memory = memory.ptr(ARRAY + (leading_null + c) * 8, chunk);
            for (s, object) in slots.iter().enumerate() {
                memory = memory.zeroed(chunk + s * 24, 24).ptr(chunk + s * 24, *object);
            }
        }
        memory
    }

    fn small_chunks() -> TableGeometry {
        TableGeometry {
            chunk_capacity: 4,
            ..Default::default()
        }
    }

    fn table<'a>(
        memory: &'a Memory<'static>,
        names: &'a HashMap<NameHandle, String>,
        layout: TableLayout,
    ) -> ObjectTable<'a, Memory<'static>> {
        ObjectTable::new(
            memory,
            names,
            ObjectTableDescriptor {
                layout,
                address: TABLE,
            },
        )
    }

    #[test]
    fn test_flat_access_and_find() {
        let mut memory = MemoryBuilder::new();
        for i in 0..3 {
            memory = put_object(memory, i, 100 + i as u64, 0);
        }
        let memory = flat_table(
            memory,
            &[object_address(0), 0, object_address(1), object_address(2)],
        )
        .build();
        let names = names(&[(100, "Engine"), (101, "World"), (102, "World")]);
        let table = table(&memory, &names, TableLayout::Flat);

        assert_eq!(Ok(4), table.len());
        assert_eq!(Ok(Some(ObjectHandle(object_address(0)))), table.access_by_index(0));
        assert_eq!(Ok(None), table.access_by_index(1));
        assert_eq!(Ok(None), table.access_by_index(4));
        assert_eq!(
            Ok(Some(ObjectHandle(object_address(1)))),
            table.find_by_name("World")
        );
        assert_eq!(Ok(None), table.find_by_name("world"));
        assert_eq!(Ok(None), table.find_by_name(""));
        assert_eq!(3, table.objects().unwrap().count());
    }

    #[test]
    fn test_chunked_single_full_chunk() {
        let slots = (10..14).collect::<Vec<_>>();
        let memory = chunked_table(MemoryBuilder::new(), 4, 0, &[slots]).build();
        let names = HashMap::new();
        let table = table(&memory, &names, TableLayout::Chunked).with_geometry(small_chunks());

        for i in 0..4 {
            assert_eq!(Ok(Some(ObjectHandle(10 + i))), table.access_by_index(i));
        }
        assert_eq!(Ok(None), table.access_by_index(4));
    }

    #[test]
    fn test_chunked_closed_right_boundary() {
        // index 4 stays in chunk 0, so chunk 0 carries a fifth slot
        let chunk0 = (10..15).collect::<Vec<_>>();
        let chunk1 = (20..24).collect::<Vec<_>>();
        let memory = chunked_table(MemoryBuilder::new(), 8, 2, &[chunk0, chunk1]).build();
        let names = HashMap::new();
        let table = table(&memory, &names, TableLayout::Chunked).with_geometry(small_chunks());

        assert_eq!(Ok(Some(ObjectHandle(13))), table.access_by_index(3));
        assert_eq!(Ok(Some(ObjectHandle(14))), table.access_by_index(4));
        assert_eq!(Ok(Some(ObjectHandle(21))), table.access_by_index(5));
        assert_eq!(Ok(Some(ObjectHandle(23))), table.access_by_index(7));
        assert_eq!(Ok(None), table.access_by_index(8));
    }

    #[test]
    fn test_chunked_missing_chunk() {
        let memory = chunked_table(MemoryBuilder::new(), 12, 0, &[vec![1, 2, 3, 4, 5]]).build();
        let names = HashMap::new();
        let table = table(&memory, &names, TableLayout::Chunked).with_geometry(small_chunks());

        assert_eq!(Ok(Some(ObjectHandle(5))), table.access_by_index(4));
        // chunk 1 is not present
        assert_eq!(Ok(None), table.access_by_index(6));
        assert_eq!(Ok(None), table.access_by_index(8));
    }

    #[test]
    fn test_chunked_find_by_name() {
        let mut memory = MemoryBuilder::new();
        for i in 0..3 {
            memory = put_object(memory, i, 200 + i as u64, 0);
        }
        let memory = chunked_table(
            memory,
            7,
            1,
            &[
                vec![0, object_address(0), 0, 0, 0],
                vec![object_address(1), object_address(2)],
            ],
        )
        .build();
        let names = names(&[(200, "Default__Object"), (201, "Console"), (202, "Player")]);
        let table = table(&memory, &names, TableLayout::Chunked).with_geometry(small_chunks());

        assert_eq!(
            Ok(Some(ObjectHandle(object_address(0)))),
            table.find_by_name("Default__Object")
        );
        assert_eq!(
            Ok(Some(ObjectHandle(object_address(2)))),
            table.find_by_name("Player")
        );
        assert_eq!(Ok(None), table.find_by_name("Missing"));
    }

    #[test]
    fn test_negative_count_is_empty() {
        let memory = flat_table(MemoryBuilder::new(), &[]).i32(TABLE + 12, -5).build();
        let names = HashMap::new();
        let table = table(&memory, &names, TableLayout::Flat);
        assert_eq!(Ok(true), table.is_empty());
        assert_eq!(Ok(None), table.access_by_index(0));
    }

    #[test]
    fn test_pointers_near_address_space_end() {
        let names = HashMap::new();
        let bogus = usize::MAX - 4;

        let memory = flat_table(MemoryBuilder::new(), &[bogus]).build();
        let flat = table(&memory, &names, TableLayout::Flat);
        assert_eq!(Ok(Some(ObjectHandle(bogus))), flat.access_by_index(0));
        assert_eq!(Ok(None), flat.find_by_name("x"));
        assert_eq!(
            Err(ResolveError::Memory(MemoryAccessError::Overflow(bogus))),
            flat.outer(ObjectHandle(bogus))
        );

        // table header itself at the end of the address space
        let header = ObjectTable::new(
            &memory,
            &names,
            ObjectTableDescriptor {
                layout: TableLayout::Flat,
                address: bogus,
            },
        );
        assert_eq!(
            Err(ResolveError::Memory(MemoryAccessError::Overflow(bogus))),
            header.len()
        );

        // chunk array pointer
        let memory = MemoryBuilder::new()
            .zeroed(TABLE, 0x20)
            .ptr(TABLE, usize::MAX - 8)
            .i32(TABLE + 20, 4)
            .build();
        let chunked = table(&memory, &names, TableLayout::Chunked);
        assert!(chunked.access_by_index(0).is_err());

        // chunk pointer
        let memory = chunked_table(MemoryBuilder::new(), 4, 0, &[])
            .zeroed(ARRAY, 16)
            .ptr(ARRAY, usize::MAX - 8)
            .build();
        let chunked = table(&memory, &names, TableLayout::Chunked).with_geometry(small_chunks());
        assert!(chunked.access_by_index(0).is_err());
        assert_eq!(
            Err(ResolveError::Memory(MemoryAccessError::Overflow(usize::MAX - 8))),
            chunked.access_by_index(1)
        );
    }

    #[test]
    fn test_unreadable_chunk_array() {
        let memory = MemoryBuilder::new()
            .zeroed(TABLE, 0x20)
            .ptr(TABLE, 0x90_0000)
            .i32(TABLE + 20, 4)
            .build();
        let names = HashMap::new();
        let chunked = table(&memory, &names, TableLayout::Chunked);
        assert!(matches!(
            chunked.access_by_index(0),
            Err(ResolveError::Memory(MemoryAccessError::OutOfBounds {
                address: 0x90_0000,
                ..
            }))
        ));
        assert!(chunked.objects().is_err());
    }

    #[test]
    fn test_unreadable_table() {
        let memory = MemoryBuilder::new().zeroed(0x10, 8).build();
        let names = HashMap::new();
        let table = table(&memory, &names, TableLayout::Chunked);
        assert!(table.access_by_index(0).is_err());
        assert!(table.find_by_name("x").is_err());
    }
}
