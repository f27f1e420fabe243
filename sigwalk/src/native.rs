//! Glue for running inside the target process: engine functions called through the addresses
//! the pipeline resolved.

use anyhow::{Context, Result};
use sigwalk_image::{
    process::internal::{read_image, ProcessMemory},
    MemoryTrait,
};

use crate::{
    BringUp, BringUpConfig, CallDispatcher, NameHandle, NameResolver, ObjectHandle,
    ResolutionContext, Role, VersionRegistry, VersionSource,
};

const MAX_NAME_LENGTH: usize = 1024;

/// Engine string as returned by value: data pointer followed by length fields
#[repr(C)]
#[derive(Default)]
struct FString {
    data: usize,
    len: u64,
}

type FNameToStringFn = unsafe extern "system" fn(name: *const u64, out: *mut FString);
type ProcessEventFn =
    unsafe extern "system" fn(object: usize, function: usize, params: *mut u8, result: usize);
type EngineVersionFn = unsafe extern "system" fn(out: *mut FString) -> *const FString;

fn read_fstring(string: &FString) -> Option<String> {
    (string.data != 0)
        .then(|| ProcessMemory.read_wstring(string.data, MAX_NAME_LENGTH).ok())
        .flatten()
}

pub struct NativeNames {
    fname_to_string: FNameToStringFn,
}

impl NativeNames {
    pub fn new(context: &ResolutionContext) -> crate::Result<Self> {
        let address = context.address(Role::FNameToString)?;
        Ok(Self {
            fname_to_string: unsafe { std::mem::transmute::<usize, FNameToStringFn>(address) },
        })
    }
}

impl NameResolver for NativeNames {
    fn resolve(&self, handle: NameHandle) -> String {
        let mut out = FString::default();
        unsafe { (self.fname_to_string)(&handle.0, &mut out) };
        read_fstring(&out).unwrap_or_default()
    }
}

pub struct NativeDispatcher {
    process_event: ProcessEventFn,
}

impl NativeDispatcher {
    pub fn new(context: &ResolutionContext) -> crate::Result<Self> {
        let address = context.address(Role::ProcessEvent)?;
        Ok(Self {
            process_event: unsafe { std::mem::transmute::<usize, ProcessEventFn>(address) },
        })
    }
}

impl CallDispatcher for NativeDispatcher {
    fn dispatch(&self, object: ObjectHandle, function: ObjectHandle, params: &mut [u8]) {
        if object.0 == 0 || function.0 == 0 {
            return;
        }
        unsafe { (self.process_event)(object.0, function.0, params.as_mut_ptr(), 0) }
    }
}

pub struct NativeVersion;

impl VersionSource for NativeVersion {
    fn engine_version(&self, function: usize) -> Option<String> {
        let function = unsafe { std::mem::transmute::<usize, EngineVersionFn>(function) };
        let mut out = FString::default();
        let result = unsafe { function(&mut out) };
        if result.is_null() {
            return None;
        }
        read_fstring(unsafe { &*result })
    }
}

/// Run the startup sequence against the main module of the current process
pub fn bring_up(config: &BringUpConfig, registry: &VersionRegistry) -> Result<ResolutionContext> {
    let image = read_image()?;
    let context = ResolutionContext::new();
    BringUp {
        config,
        registry,
        image: &image,
        memory: &ProcessMemory,
    }
    .run(&context, &NativeVersion)
    .context("bring-up failed")?;
    Ok(context)
}
