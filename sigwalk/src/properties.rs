//! Resolve `(class, field)` pairs to byte offsets inside instances of the class.

use sigwalk_image::{offset_address, MemoryTrait};
use tracing::{debug, trace, warn};

use crate::{NameHandle, ObjectHandle, ObjectTable, ResolveError, Result, TableLayout};

/// Offset of the internal offset field of a property object
pub const PROPERTY_OFFSET_FIELD: usize = 68;
/// Offset of the first property chain node in a class object
pub const CLASS_PROPERTY_LINK: usize = 80;

pub const NODE_DATA: usize = 8;
pub const NODE_NEXT: usize = 32;
pub const NODE_NAME: usize = 40;
pub const NODE_OFFSET: usize = 76;
const NODE_SIZE: usize = NODE_OFFSET + 4;

/// First version whose chunked table is paired with property chains on classes
pub const PROPERTY_CHAIN_VERSION: i32 = 11794982;

const MAX_CHAIN_LENGTH: usize = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStrategy {
    /// Scan the whole object table for the property object
    Legacy,
    /// Walk the property chain of the class object
    Chain,
}

impl PropertyStrategy {
    pub fn select(layout: TableLayout, version: i32) -> Self {
        match layout {
            TableLayout::Chunked if version >= PROPERTY_CHAIN_VERSION => Self::Chain,
            _ => Self::Legacy,
        }
    }
}

pub struct PropertyResolver<'a, M: MemoryTrait + ?Sized> {
    table: ObjectTable<'a, M>,
    strategy: PropertyStrategy,
}

impl<'a, M: MemoryTrait + ?Sized> PropertyResolver<'a, M> {
    pub fn new(table: ObjectTable<'a, M>, version: i32) -> Self {
        let strategy = PropertyStrategy::select(table.descriptor().layout, version);
        Self { table, strategy }
    }

    pub fn strategy(&self) -> PropertyStrategy {
        self.strategy
    }

    pub fn table(&self) -> &ObjectTable<'a, M> {
        &self.table
    }

    /// Offset of `field_name` in instances of `class_name`
    pub fn resolve_offset(&self, class_name: &str, field_name: &str) -> Result<Option<i32>> {
        let offset = match self.strategy {
            PropertyStrategy::Legacy => self.legacy_scan(class_name, field_name)?,
            PropertyStrategy::Chain => self.chain_walk(class_name, field_name)?,
        };
        match offset {
            Some(offset) => debug!("{class_name}::{field_name} at {offset:#x}"),
            None => warn!("{class_name}::{field_name} not found"),
        }
        Ok(offset)
    }

    /// Full table scan on every call. Objects that cannot be read are skipped.
    fn legacy_scan(&self, class_name: &str, field_name: &str) -> Result<Option<i32>> {
        for object in self.table.objects()? {
            match self.legacy_match(object, class_name, field_name) {
                Ok(Some(offset)) => return Ok(Some(offset)),
                Ok(None) => {}
                Err(err) => trace!("skipping {object}: {err}"),
            }
        }
        Ok(None)
    }

    /// Offset field of `object` if it is `field_name` owned by `class_name`
    fn legacy_match(
        &self,
        object: ObjectHandle,
        class_name: &str,
        field_name: &str,
    ) -> Result<Option<i32>> {
        if self.table.object_name(object)? != field_name {
            return Ok(None);
        }
        let Some(outer) = self.table.outer(object)? else {
            return Ok(None);
        };
        if self.table.object_name(outer)? != class_name {
            return Ok(None);
        }
        let field = offset_address(object.0, PROPERTY_OFFSET_FIELD)?;
        Ok(Some(self.table.memory().i32_le(field)?))
    }

    fn chain_walk(&self, class_name: &str, field_name: &str) -> Result<Option<i32>> {
        let Some(class) = self.table.find_by_name(class_name)? else {
            return Ok(None);
        };
        let memory = self.table.memory();
        let names = self.table.names();

        let link =
            offset_address(class.0, CLASS_PROPERTY_LINK).and_then(|link| memory.ptr(link));
        let mut node = match link {
            Ok(node) => node,
            Err(err) => {
                warn!("property chain of {class_name} unreadable: {err}");
                return Ok(None);
            }
        };
        for _ in 0..MAX_CHAIN_LENGTH {
            if node == 0 {
                return Ok(None);
            }
            if !memory.probe(node, NODE_SIZE) {
                warn!(
                    "aborting property walk of {class_name}: {}",
                    ResolveError::UnsafeMemoryAccess { address: node }
                );
                return Ok(None);
            }
            let next = memory.ptr(node + NODE_NEXT)?;

            let data = memory.ptr(node + NODE_DATA)?;
            if data == 0 || !memory.probe(data, 8) {
                node = next;
                continue;
            }
            let offset = memory.i32_le(node + NODE_OFFSET)?;
            if offset == 0 {
                node = next;
                continue;
            }
            let name = names.resolve(NameHandle(memory.u64_le(node + NODE_NAME)?));
            if name == field_name {
                return Ok(Some(offset));
            }
            node = next;
        }
        warn!("property chain of {} exceeds {MAX_CHAIN_LENGTH} nodes", ObjectHandle(class.0));
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use sigwalk_image::MemoryBuilder;

    use super::*;
    use crate::objects::test::*;
    use crate::{ObjectTableDescriptor, TableGeometry, OBJECT_NAME_OFFSET};

    fn legacy_memory() -> MemoryBuilder {
        // 0: class Pawn, 1: class Actor, 2: Health owned by Actor, 3: Health owned by Pawn
        let mut memory = MemoryBuilder::new();
        memory = put_object(memory, 0, 1, 0);
        memory = put_object(memory, 1, 2, 0);
        memory = put_object(memory, 2, 3, object_address(1));
        memory = put_object(memory, 3, 3, object_address(0));
        memory
            .i32(object_address(2) + PROPERTY_OFFSET_FIELD, 0x120)
            .i32(object_address(3) + PROPERTY_OFFSET_FIELD, 0x2a8)
    }

    fn legacy_names() -> HashMap<NameHandle, String> {
        names(&[(1, "Pawn"), (2, "Actor"), (3, "Health")])
    }

    #[test]
    fn test_strategy() {
        use PropertyStrategy::*;
        assert_eq!(Legacy, PropertyStrategy::select(TableLayout::Flat, 20_000_000));
        assert_eq!(Legacy, PropertyStrategy::select(TableLayout::Chunked, 11794981));
        assert_eq!(Chain, PropertyStrategy::select(TableLayout::Chunked, 11794982));
    }

    #[test]
    fn test_legacy_flat() {
        let memory = flat_table(
            legacy_memory(),
            &(0..4).map(object_address).collect::<Vec<_>>(),
        )
        .build();
        let names = legacy_names();
        let table = ObjectTable::new(
            &memory,
            &names,
            ObjectTableDescriptor {
                layout: TableLayout::Flat,
                address: TABLE,
            },
        );
        let resolver = PropertyResolver::new(table, 4210000);
        assert_eq!(PropertyStrategy::Legacy, resolver.strategy());

        assert_eq!(Ok(Some(0x2a8)), resolver.resolve_offset("Pawn", "Health"));
        assert_eq!(Ok(Some(0x120)), resolver.resolve_offset("Actor", "Health"));
        assert_eq!(Ok(None), resolver.resolve_offset("Controller", "Health"));
        assert_eq!(Ok(None), resolver.resolve_offset("Pawn", "Armor"));
    }

    #[test]
    fn test_legacy_chunked_below_threshold() {
        let objects = (0..4).map(object_address).collect::<Vec<_>>();
        let memory = chunked_table(legacy_memory(), 4, 0, &[objects]).build();
        let names = legacy_names();
        let table = ObjectTable::new(
            &memory,
            &names,
            ObjectTableDescriptor {
                layout: TableLayout::Chunked,
                address: TABLE,
            },
        );
        let resolver = PropertyResolver::new(table, 4300000);
        assert_eq!(PropertyStrategy::Legacy, resolver.strategy());
        assert_eq!(Ok(Some(0x2a8)), resolver.resolve_offset("Pawn", "Health"));
    }

    fn flat_resolver<'a>(
        memory: &'a sigwalk_image::Memory<'static>,
        names: &'a HashMap<NameHandle, String>,
    ) -> PropertyResolver<'a, sigwalk_image::Memory<'static>> {
        let table = ObjectTable::new(
            memory,
            names,
            ObjectTableDescriptor {
                layout: TableLayout::Flat,
                address: TABLE,
            },
        );
        PropertyResolver::new(table, 4210000)
    }

    #[test]
    fn test_legacy_skips_unreadable_objects() {
        let mut slots = vec![0xdead_0000];
        slots.extend((0..4).map(object_address));
        let memory = flat_table(legacy_memory(), &slots).build();
        let names = legacy_names();
        let resolver = flat_resolver(&memory, &names);
        assert_eq!(Ok(Some(0x2a8)), resolver.resolve_offset("Pawn", "Health"));
        assert_eq!(Ok(None), resolver.resolve_offset("Pawn", "Armor"));
    }

    #[test]
    fn test_legacy_owner_must_match() {
        // orphan Health first, then Health owned by Actor, then Health owned by Pawn
        let memory = put_object(legacy_memory(), 4, 3, 0)
            .i32(object_address(4) + PROPERTY_OFFSET_FIELD, 0x10);
        let memory = flat_table(
            memory,
            &[
                object_address(4),
                object_address(2),
                object_address(3),
                object_address(0),
                object_address(1),
            ],
        )
        .build();
        let names = legacy_names();
        let resolver = flat_resolver(&memory, &names);
        assert_eq!(Ok(Some(0x2a8)), resolver.resolve_offset("Pawn", "Health"));
        assert_eq!(Ok(Some(0x120)), resolver.resolve_offset("Actor", "Health"));
        // an ownerless property never matches, not even an empty class name
        assert_eq!(Ok(None), resolver.resolve_offset("", "Health"));
    }

    #[test]
    fn test_chain_class_near_address_space_end() {
        // name readable, property link past the end of the address space
        let class = usize::MAX - 40;
        let memory = MemoryBuilder::new().u64(class + OBJECT_NAME_OFFSET, 1);
        let memory = chunked_table(memory, 1, 0, &[vec![class]]).build();
        assert_eq!(Ok(None), chain_resolve(&memory, "PlayerController", "Pawn"));
    }

    const NODES: usize = 0x50_0000;
    const DATA: usize = 0x60_0000;

    fn node_address(i: usize) -> usize {
        NODES + i * 0x80
    }

    /// Chain of `(name, offset, has_data)` nodes hanging off object 0
    fn chain_memory(nodes: &[(u64, i32, bool)]) -> MemoryBuilder {
        let mut memory = put_object(MemoryBuilder::new(), 0, 1, 0)
            .ptr(object_address(0) + CLASS_PROPERTY_LINK, node_address(0))
            .zeroed(DATA, 8);
        for (i, (name, offset, has_data)) in nodes.iter().enumerate() {
            let node = node_address(i);
            let next = if i + 1 < nodes.len() {
                node_address(i + 1)
            } else {
                0
            };
            memory = memory
                .zeroed(node, 0x80)
                .ptr(node + NODE_NEXT, next)
                .ptr(node + NODE_DATA, if *has_data { DATA } else { 0 })
                .u64(node + NODE_NAME, *name)
                .i32(node + NODE_OFFSET, *offset);
        }
        chunked_table(memory, 1, 0, &[vec![object_address(0)]])
    }

    fn chain_names() -> HashMap<NameHandle, String> {
        names(&[
            (1, "PlayerController"),
            (2, "Pawn"),
            (3, "CheatManager"),
            (4, "Hidden"),
        ])
    }

    fn chain_resolve(
        memory: &sigwalk_image::Memory<'static>,
        class: &str,
        field: &str,
    ) -> Result<Option<i32>> {
        let names = chain_names();
        let table = ObjectTable::new(
            memory,
            &names,
            ObjectTableDescriptor {
                layout: TableLayout::Chunked,
                address: TABLE,
            },
        )
        .with_geometry(TableGeometry::default());
        let resolver = PropertyResolver::new(table, 13000000);
        assert_eq!(PropertyStrategy::Chain, resolver.strategy());
        resolver.resolve_offset(class, field)
    }

    #[test]
    fn test_chain_walk() {
        let memory = chain_memory(&[(2, 0x2a0, true), (4, 0x10, false), (3, 0x330, true)]).build();
        assert_eq!(Ok(Some(0x2a0)), chain_resolve(&memory, "PlayerController", "Pawn"));
        assert_eq!(Ok(Some(0x330)), chain_resolve(&memory, "PlayerController", "CheatManager"));
        // skipped for lacking data
        assert_eq!(Ok(None), chain_resolve(&memory, "PlayerController", "Hidden"));
        assert_eq!(Ok(None), chain_resolve(&memory, "PlayerController", "Missing"));
        assert_eq!(Ok(None), chain_resolve(&memory, "Pawn", "CheatManager"));
    }

    #[test]
    fn test_chain_skips_zero_offset() {
        let memory = chain_memory(&[(2, 0, true), (2, 0x40, true)]).build();
        assert_eq!(Ok(Some(0x40)), chain_resolve(&memory, "PlayerController", "Pawn"));
    }

    #[test]
    fn test_chain_aborts_on_bad_node() {
        let memory = chain_memory(&[(4, 0x10, true), (3, 0x330, true)])
            .ptr(node_address(0) + NODE_NEXT, 0xdead_0000)
            .build();
        assert_eq!(Ok(None), chain_resolve(&memory, "PlayerController", "CheatManager"));
    }

    #[test]
    fn test_chain_unreadable_data_is_skipped() {
        let memory = chain_memory(&[(3, 0x10, true), (3, 0x330, true)])
            .ptr(node_address(0) + NODE_DATA, 0xbad_0000)
            .build();
        assert_eq!(Ok(Some(0x330)), chain_resolve(&memory, "PlayerController", "CheatManager"));
    }

    #[test]
    fn test_chain_cycle_terminates() {
        let memory = chain_memory(&[(4, 0x10, true), (4, 0x20, true)])
            .ptr(node_address(1) + NODE_NEXT, node_address(0))
            .build();
        assert_eq!(Ok(None), chain_resolve(&memory, "PlayerController", "Pawn"));
    }
}
