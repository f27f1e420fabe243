//! Turn a version number and a module image into a [`Resolution`].

use std::ops::RangeInclusive;

use sigwalk_image::{Image, MemoryTrait};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::{
    ObjectTableDescriptor, ResolveError, ResolvedAddresses, Resolution, Result, Role,
    TableLayout, VersionProfile, VersionRegistry,
};

/// Bytes searched for the table header marker
pub const HEADER_SEARCH_WINDOW: usize = 2048;

/// Versions whose object table address is rediscovered from a marker following the header.
/// Rules are tried in order and the first containing the version applies.
struct HeaderRule {
    versions: RangeInclusive<i32>,
    /// Distance from the marker back to the start of the table
    backoff: usize,
    layout: TableLayout,
}

const HEADER_RULES: [HeaderRule; 3] = [
    HeaderRule {
        versions: 4204761..=4214610,
        backoff: 24,
        layout: TableLayout::Flat,
    },
    HeaderRule {
        versions: 4225813..=4461277,
        backoff: 32,
        layout: TableLayout::Chunked,
    },
    // everything older than 4464155 not claimed above, including the pre-4204761 builds
    HeaderRule {
        versions: i32::MIN..=4464154,
        backoff: 16,
        layout: TableLayout::Chunked,
    },
];

pub struct Pipeline<'a> {
    registry: &'a VersionRegistry,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a VersionRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every role for `version` against `image`.
    ///
    /// Only an unsupported version fails the run. Every other problem is logged, recorded in
    /// [`Resolution::errors`] and leaves the affected role or the object table unresolved.
    pub fn run(&self, image: &Image<'_>, version: i32) -> Result<Resolution> {
        let profile = self.registry.lookup(version)?;
        info!(
            "resolving version {version} with profile {}..={}",
            profile.min, profile.max
        );

        let (mut addresses, mut errors) = resolve_addresses(profile, image);

        if let Err(err) = validate(&addresses) {
            warn!("{err}");
            errors.push(err);
        }

        let object_table = match derive_object_table(image, version, &addresses) {
            Ok(Some(descriptor)) => {
                info!(
                    "object table: {} at {:#x}",
                    descriptor.layout, descriptor.address
                );
                addresses.insert(Role::GObjects, descriptor.address);
                Some(descriptor)
            }
            Ok(None) => {
                info!("no object table layout for version {version}");
                None
            }
            Err(err) => {
                warn!("{err}");
                errors.push(err);
                None
            }
        };

        Ok(Resolution {
            version,
            addresses,
            object_table,
            errors,
        })
    }
}

/// Resolve each role independently, collecting failures instead of stopping at the first
pub fn resolve_addresses(
    profile: &VersionProfile,
    image: &Image<'_>,
) -> (ResolvedAddresses, Vec<ResolveError>) {
    let mut addresses = ResolvedAddresses::default();
    let mut errors = vec![];
    for role in Role::iter() {
        let result = profile
            .signature(role)
            .ok_or(ResolveError::MissingNamedSignature {
                role,
                min: profile.min,
                max: profile.max,
            })
            .and_then(|signature| signature.resolve(image));
        match result {
            Ok(address) => {
                debug!("{role} = {address:#x}");
                addresses.insert(role, address);
            }
            Err(err) => {
                warn!("{err}");
                errors.push(err);
            }
        }
    }
    (addresses, errors)
}

/// Check that every role has a non-null address
pub fn validate(addresses: &ResolvedAddresses) -> Result<()> {
    let missing = addresses.missing();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::Incomplete { missing })
    }
}

/// Locate the object table header for versions that need it. `Ok(None)` means the version has no
/// known table layout.
pub fn derive_object_table<M: MemoryTrait + ?Sized>(
    memory: &M,
    version: i32,
    addresses: &ResolvedAddresses,
) -> Result<Option<ObjectTableDescriptor>> {
    let Some(rule) = HEADER_RULES.iter().find(|r| r.versions.contains(&version)) else {
        return Ok(None);
    };
    let start = addresses
        .get(Role::GObjects)
        .ok_or(ResolveError::UnresolvedDependency {
            role: Role::GObjects,
        })?;

    let marker = (0..HEADER_SEARCH_WINDOW)
        .map_while(|offset| start.checked_add(offset))
        .find(|address| memory.i32_le(*address) == Ok(-1))
        .ok_or(ResolveError::ObjectTableHeaderNotFound { address: start })?;

    let address = marker
        .checked_sub(rule.backoff)
        .ok_or(ResolveError::ObjectTableHeaderNotFound { address: start })?;
    debug!("table marker at {marker:#x}");

    Ok(Some(ObjectTableDescriptor {
        layout: rule.layout,
        address,
    }))
}
