use sigwalk_image::MemoryAccessError;

use crate::Role;

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("no match for {role} signature")]
    SignatureNotFound { role: Role },
    #[error("unsupported engine version {0}")]
    UnsupportedVersion(i32),
    #[error("profile {min}..={max} has no {role} signature")]
    MissingNamedSignature { role: Role, min: i32, max: i32 },
    #[error("{role} address is unavailable")]
    UnresolvedDependency { role: Role },
    #[error("unreadable memory at {address:#x}")]
    UnsafeMemoryAccess { address: usize },
    #[error("addresses have not been published yet")]
    Pending,
    #[error("resolution incomplete, missing {missing:?}")]
    Incomplete { missing: Vec<Role> },
    #[error("object table header not found near {address:#x}")]
    ObjectTableHeaderNotFound { address: usize },
    #[error("object table layout is unknown for this version")]
    NoObjectTable,
    #[error("engine version function not found")]
    VersionFunctionNotFound,
    #[error("invalid engine version string {0:?}")]
    InvalidVersionString(String),
    #[error("profiles {first:?} and {second:?} overlap")]
    OverlappingProfiles { first: (i32, i32), second: (i32, i32) },
    #[error("profile range {min}..={max} is inverted")]
    InvertedRange { min: i32, max: i32 },
    #[error("invalid signature definition: {0}")]
    InvalidSignature(String),
    #[error("timed out waiting for {role}")]
    Timeout { role: Role },
    #[error(transparent)]
    Memory(#[from] MemoryAccessError),
}
