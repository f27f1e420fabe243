//! Services the resolver relies on but does not implement: turning name handles into strings and
//! calling into the foreign process.

use std::collections::HashMap;

use crate::ObjectHandle;

/// Opaque 8-byte name identifier stored inside foreign objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameHandle(pub u64);

impl NameHandle {
    /// Handle for a bare name table index
    pub fn from_index(index: i32) -> Self {
        Self(index as i64 as u64)
    }
}

pub trait NameResolver {
    /// Display string for `handle`, empty if it cannot be resolved
    fn resolve(&self, handle: NameHandle) -> String;

    fn resolve_index(&self, index: i32) -> String {
        self.resolve(NameHandle::from_index(index))
    }
}

impl NameResolver for HashMap<NameHandle, String> {
    fn resolve(&self, handle: NameHandle) -> String {
        self.get(&handle).cloned().unwrap_or_default()
    }
}

impl<F: Fn(NameHandle) -> String> NameResolver for F {
    fn resolve(&self, handle: NameHandle) -> String {
        self(handle)
    }
}

/// Invokes a foreign function on an object. `params` is the function's parameter block and may be
/// written by the callee.
pub trait CallDispatcher {
    fn dispatch(&self, object: ObjectHandle, function: ObjectHandle, params: &mut [u8]);
}

/// Calls the engine version function found during bring-up
pub trait VersionSource {
    /// Version string reported by the function at `function`
    fn engine_version(&self, function: usize) -> Option<String>;
}

impl<F: Fn(usize) -> Option<String>> VersionSource for F {
    fn engine_version(&self, function: usize) -> Option<String> {
        self(function)
    }
}
