//! The startup sequence: wait for the engine, discover its version, resolve every role and wait
//! for the world to exist.

use std::{
    thread,
    time::{Duration, Instant},
};

use sigwalk_image::{Image, MemoryTrait};
use sigwalk_scanner::Pattern;
use tracing::{debug, error, info, trace, warn};

use crate::{
    BringUpConfig, Pipeline, ResolutionContext, ResolveError, Result, Role, VersionRegistry,
    VersionSource,
};

/// Function returning the engine version string
pub const ENGINE_VERSION_SIGNATURE: &str =
    "40 53 48 83 EC 20 48 8B D9 E8 ? ? ? ? 48 8B C8 41 B8 04 ? ? ? 48 8B D3";

/// Extract the changelist from a version string such as `4.21.0-4204761+++Fortnite+Release`.
///
/// The string is split on `-` with empty pieces dropped and the leading decimal integer of the
/// second piece is the version. Leading whitespace and a sign are accepted.
pub fn parse_version_string(version: &str) -> Result<i32> {
    let invalid = || ResolveError::InvalidVersionString(version.to_string());

    let piece = version
        .split('-')
        .filter(|p| !p.is_empty())
        .nth(1)
        .ok_or_else(invalid)?
        .trim_start();

    let (negative, digits) = match piece.as_bytes().first() {
        Some(b'-') => (true, &piece[1..]),
        Some(b'+') => (false, &piece[1..]),
        _ => (false, piece),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(invalid());
    }
    let value: i64 = digits[..end].parse().map_err(|_| invalid())?;
    let value = if negative { -value } else { value };
    i32::try_from(value).map_err(|_| invalid())
}

/// Address of the engine version function
pub fn locate_version_function(image: &Image<'_>) -> Result<usize> {
    image
        .find(&Pattern::new(ENGINE_VERSION_SIGNATURE))
        .ok_or(ResolveError::VersionFunctionNotFound)
}

/// Poll until the world pointer is non-zero.
///
/// Without a configured timeout this retries forever. An unresolved world address fails at once
/// since no amount of waiting can fix it.
pub fn wait_for_root<M: MemoryTrait + ?Sized>(
    context: &ResolutionContext,
    memory: &M,
    config: &BringUpConfig,
) -> Result<usize> {
    let start = Instant::now();
    loop {
        match context.world(memory) {
            Ok(0) => trace!("world not created yet"),
            Ok(world) => return Ok(world),
            Err(ResolveError::Memory(err)) => trace!("world unreadable: {err}"),
            Err(err) => return Err(err),
        }
        if let Some(timeout) = config.poll_timeout() {
            if start.elapsed() >= timeout {
                return Err(ResolveError::Timeout { role: Role::GWorld });
            }
        }
        thread::sleep(config.poll_interval());
    }
}

/// Runs the startup sequence once on the calling thread
pub struct BringUp<'a, M: MemoryTrait + ?Sized> {
    pub config: &'a BringUpConfig,
    pub registry: &'a VersionRegistry,
    pub image: &'a Image<'a>,
    /// Memory the world pointer is read from, usually the whole process
    pub memory: &'a M,
}

impl<M: MemoryTrait + ?Sized> BringUp<'_, M> {
    /// Resolve and publish into `context`, then wait for the world. Returns the world pointer.
    pub fn run(&self, context: &ResolutionContext, versions: &dyn VersionSource) -> Result<usize> {
        thread::sleep(self.config.initial_delay());

        let function = locate_version_function(self.image).inspect_err(|err| error!("{err}"))?;
        debug!("version function at {function:#x}");

        let version_string = versions
            .engine_version(function)
            .ok_or_else(|| ResolveError::InvalidVersionString(String::new()))?;
        let version = parse_version_string(&version_string).inspect_err(|err| error!("{err}"))?;
        info!("engine version {version} ({version_string})");

        let resolution = Pipeline::new(self.registry)
            .run(self.image, version)
            .inspect_err(|err| error!("{err}"))?;
        if !resolution.errors.is_empty() {
            warn!(
                "resolution finished with {} error(s)",
                resolution.errors.len()
            );
        }
        if context.publish(resolution).is_err() {
            warn!("addresses were already published, keeping the earlier set");
        }

        let world = wait_for_root(context, self.memory, self.config)?;
        info!("world at {world:#x}");
        thread::sleep(self.config.settle_delay());
        Ok(world)
    }
}
