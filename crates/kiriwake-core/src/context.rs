//! # Execution Context
//!
//! Owns the devices a classifier is built and trained on. Constructed once
//! by the caller, passed to the classifier, and torn down on drop; no global
//! device state exists anywhere in the crate.

use candle_core::Device;

use crate::error::{KiriwakeError, Result};

/// Environment variable holding the comma-separated device list.
///
/// Integer tokens are accelerator ordinals, the literal `cpu` is host
/// placement. There is no default: the variable must be set before a model
/// can be built.
pub const DEVICES_ENV_VAR: &str = "KIRIWAKE_DEVICES";

/// The devices a training or prediction run executes on.
///
/// With exactly one device the model lives on that device. With several,
/// the canonical model lives on the CPU and each listed device carries a
/// training replica; the canonical weights are what get persisted.
#[derive(Debug, Clone)]
pub struct RunContext {
    devices: Vec<Device>,
    canonical: Device,
}

impl RunContext {
    /// Resolves the device list from [`DEVICES_ENV_VAR`].
    ///
    /// # Errors
    ///
    /// Returns [`KiriwakeError::MissingDeviceList`] when the variable is
    /// unset, or a parse/availability error for a bad token.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(DEVICES_ENV_VAR)
            .map_err(|_| KiriwakeError::MissingDeviceList(DEVICES_ENV_VAR))?;
        Self::from_list(&raw)
    }

    /// Parses a comma-separated device list such as `"0,1"` or `"cpu"`.
    pub fn from_list(list: &str) -> Result<Self> {
        let mut devices = Vec::new();
        for token in list.split(',') {
            devices.push(parse_device(token.trim())?);
        }
        Self::from_devices(devices)
    }

    /// Builds a context from already-constructed devices.
    pub fn from_devices(devices: Vec<Device>) -> Result<Self> {
        if devices.is_empty() {
            return Err(KiriwakeError::InvalidOptions("device list is empty".into()));
        }
        let canonical = if devices.len() == 1 {
            devices[0].clone()
        } else {
            Device::Cpu
        };
        Ok(Self { devices, canonical })
    }

    /// All devices designated for this run, in listed order.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Where the canonical model lives: the single designated device, or the
    /// CPU when training is replicated.
    #[must_use]
    pub fn canonical_device(&self) -> &Device {
        &self.canonical
    }

    /// Whether training shards batches across several device replicas.
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        self.devices.len() > 1
    }
}

fn parse_device(token: &str) -> Result<Device> {
    if token.eq_ignore_ascii_case("cpu") {
        return Ok(Device::Cpu);
    }
    let ordinal: usize = token.parse().map_err(|_| KiriwakeError::InvalidDevice {
        spec: token.to_string(),
    })?;
    Device::new_cuda(ordinal)
        .map_err(|e| KiriwakeError::Engine(format!("device {ordinal} unavailable: {e}")))
}
