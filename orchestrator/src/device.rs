//! Resolution of `--gpu` style device requests into concrete device ids.

use std::{fmt, num::NonZeroUsize, thread};

use crate::{OrchestratorError, Result};

/// Properties of one compute device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: u32,
    pub name: String,
    pub cores: usize,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}: {} ({} cores)", self.id, self.name, self.cores)
    }
}

/// The primitives needed to enumerate and describe devices.
pub trait DevicePlatform {
    /// The amount of devices physically available.
    fn device_count(&self) -> usize;

    /// Describes the device `id`, which must be lower than `device_count`.
    fn describe(&self, id: u32) -> DeviceInfo;
}

/// The host machine, where every hardware thread is a logical device.
pub struct HostPlatform;

impl DevicePlatform for HostPlatform {
    fn device_count(&self) -> usize {
        thread::available_parallelism().map_or(1, NonZeroUsize::get)
    }

    fn describe(&self, id: u32) -> DeviceInfo {
        DeviceInfo {
            id,
            name: format!("host thread {id}"),
            cores: 1,
        }
    }
}

/// Parses a device request into an ordered list of device ids.
///
/// # Arguments
/// * `spec` - `""` for host only execution, `"all"` for every available
///   device, or a comma separated list of ids.
/// * `platform` - The platform to query the device count from.
///
/// # Returns
/// The requested device ids, or an error if a token isn't a non negative
/// integer, an id isn't available or an id is repeated.
pub fn resolve(spec: &str, platform: &impl DevicePlatform) -> Result<Vec<u32>> {
    let spec = spec.trim();
    let count = platform.device_count();

    if spec.is_empty() {
        return Ok(Vec::new());
    }

    if spec == "all" {
        return Ok((0..count as u32).collect());
    }

    let mut devices = Vec::new();
    for token in spec.split(',').map(str::trim) {
        let id: u32 = token.parse().map_err(|_| {
            OrchestratorError::InvalidConfig(format!("invalid device id \"{token}\" in \"{spec}\""))
        })?;

        if id as usize >= count {
            return Err(OrchestratorError::InvalidConfig(format!(
                "device {id} requested but only {count} devices are available"
            )));
        }

        if devices.contains(&id) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "device {id} requested twice"
            )));
        }

        devices.push(id);
    }

    Ok(devices)
}
