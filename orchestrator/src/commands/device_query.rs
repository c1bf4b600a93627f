use log::info;

use crate::{
    OrchestratorError, Result,
    cli::Flags,
    device::{self, DevicePlatform, HostPlatform},
};

/// Logs the properties of every device requested by `--gpu`.
pub fn device_query(flags: &Flags) -> Result<()> {
    let platform = HostPlatform;
    let devices = device::resolve(&flags.gpu, &platform)?;
    if devices.is_empty() {
        return Err(OrchestratorError::InvalidConfig("need a device id to query".into()));
    }

    info!("querying devices {}", flags.gpu);
    for id in devices {
        info!("{}", platform.describe(id));
    }

    Ok(())
}
