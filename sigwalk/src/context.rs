use std::{collections::BTreeMap, sync::OnceLock};

use sigwalk_image::MemoryTrait;
use strum::IntoEnumIterator;

use crate::{
    NameResolver, ObjectTable, ObjectTableDescriptor, PropertyResolver, ResolveError, Result,
    Role,
};

/// Address found for each role. Roles that failed to resolve are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolvedAddresses(BTreeMap<Role, usize>);

impl ResolvedAddresses {
    pub fn get(&self, role: Role) -> Option<usize> {
        self.0.get(&role).copied().filter(|a| *a != 0)
    }

    pub fn insert(&mut self, role: Role, address: usize) {
        self.0.insert(role, address);
    }

    /// Roles without a non-null address
    pub fn missing(&self) -> Vec<Role> {
        Role::iter().filter(|r| self.get(*r).is_none()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, usize)> + '_ {
        self.0.iter().map(|(r, a)| (*r, *a))
    }
}

/// Everything one pipeline run produced
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub version: i32,
    pub addresses: ResolvedAddresses,
    pub object_table: Option<ObjectTableDescriptor>,
    /// Failures reported along the way, none of which stopped the run
    pub errors: Vec<ResolveError>,
}

/// Owner of the published [`Resolution`]. Written once by the pipeline, read by everything else.
/// Readers see [`ResolveError::Pending`] until publication.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    published: OnceLock<Resolution>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `resolution`. A second publication is refused and handed back.
    pub fn publish(&self, resolution: Resolution) -> std::result::Result<(), Resolution> {
        self.published.set(resolution)
    }

    pub fn is_published(&self) -> bool {
        self.published.get().is_some()
    }

    pub fn resolution(&self) -> Result<&Resolution> {
        self.published.get().ok_or(ResolveError::Pending)
    }

    pub fn version(&self) -> Result<i32> {
        Ok(self.resolution()?.version)
    }

    pub fn address(&self, role: Role) -> Result<usize> {
        self.resolution()?
            .addresses
            .get(role)
            .ok_or(ResolveError::UnresolvedDependency { role })
    }

    pub fn object_table(&self) -> Result<ObjectTableDescriptor> {
        self.resolution()?
            .object_table
            .ok_or(ResolveError::NoObjectTable)
    }

    /// Current value of the world pointer, 0 while the engine has not created one
    pub fn world<M: MemoryTrait + ?Sized>(&self, memory: &M) -> Result<usize> {
        Ok(memory.ptr(self.address(Role::GWorld)?)?)
    }

    pub fn objects<'a, M: MemoryTrait + ?Sized>(
        &self,
        memory: &'a M,
        names: &'a dyn NameResolver,
    ) -> Result<ObjectTable<'a, M>> {
        Ok(ObjectTable::new(memory, names, self.object_table()?))
    }

    pub fn properties<'a, M: MemoryTrait + ?Sized>(
        &self,
        memory: &'a M,
        names: &'a dyn NameResolver,
    ) -> Result<PropertyResolver<'a, M>> {
        Ok(PropertyResolver::new(
            self.objects(memory, names)?,
            self.version()?,
        ))
    }
}
