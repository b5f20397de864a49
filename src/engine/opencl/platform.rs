// src/engine/opencl/platform.rs
//! OpenCL platform and device selection

use crate::config::OpenClConfig;
use crate::engine::device::DeviceCapabilities;
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use log::{debug, info};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{Context, Device, Platform, Queue};

/// Buffers bound per kernel
///
/// Kernels take up to six fixed parameters besides the DAG buffers; sixteen
/// DAG buffers keeps every kernel well under common parameter limits.
pub const CL_MAX_BUFFERS: usize = 16;

/// Selected device with its context and in-order queue
#[derive(Clone)]
pub struct ClContext {
    /// Platform the device belongs to
    pub platform: Platform,
    /// Selected device
    pub device: Device,
    /// Context over that device
    pub context: Context,
    /// In-order command queue
    pub queue: Queue,
}

fn cl_err(what: &str) -> impl Fn(ocl::Error) -> MinerError + '_ {
    move |e| MinerError::UnsupportedDevice(format!("{}: {}", what, e))
}

fn device_u64(device: &Device, info: DeviceInfo) -> Result<u64, MinerError> {
    let result = device
        .info(info)
        .map_err(|e| MinerError::UnsupportedDevice(format!("device info: {}", e)))?;
    match result {
        DeviceInfoResult::GlobalMemSize(v) | DeviceInfoResult::MaxMemAllocSize(v) => Ok(v),
        other => Err(MinerError::UnsupportedDevice(format!(
            "unexpected device info {:?}",
            other
        ))),
    }
}

fn compute_units(device: &Device) -> usize {
    match device.info(DeviceInfo::MaxComputeUnits) {
        Ok(DeviceInfoResult::MaxComputeUnits(v)) => v as usize,
        _ => 1,
    }
}

/// Lists `(platform, device)` pairs on every platform
pub fn list_devices() -> Result<Vec<(Platform, Device)>, MinerError> {
    let mut found = Vec::new();
    for platform in Platform::list() {
        let devices = Device::list_all(platform)
            .map_err(|e| MinerError::UnsupportedDevice(format!("listing devices: {}", e)))?;
        for device in devices {
            found.push((platform, device));
        }
    }
    Ok(found)
}

/// Picks the configured device and creates its context and queue
///
/// # Arguments
/// * `config` - Platform name filter (substring, case-insensitive) and device index
/// * `max_allocation` - Optional override lowering the device's allocation ceiling
pub fn select(
    config: &OpenClConfig,
    max_allocation: Option<u64>,
) -> Result<(ClContext, DeviceCapabilities), MinerError> {
    let candidates: Vec<(Platform, Device)> = list_devices()?
        .into_iter()
        .filter(|(platform, _)| match &config.platform {
            Some(wanted) => platform
                .name()
                .map(|name| name.to_lowercase().contains(&wanted.to_lowercase()))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    debug!("{} OpenCL device(s) match the platform filter", candidates.len());

    let (platform, device) = candidates.get(config.device).cloned().ok_or_else(|| {
        MinerError::UnsupportedDevice(format!(
            "no OpenCL device #{} (found {})",
            config.device,
            candidates.len()
        ))
    })?;

    let name = device
        .name()
        .map_err(|e| MinerError::UnsupportedDevice(format!("device name: {}", e)))?;
    let global_memory = device_u64(&device, DeviceInfo::GlobalMemSize)?;
    let device_max = device_u64(&device, DeviceInfo::MaxMemAllocSize)?;
    let max_allocation = max_allocation.map_or(device_max, |cap| cap.min(device_max));

    let context = Context::builder()
        .platform(platform)
        .devices(device)
        .build()
        .map_err(cl_err("creating context"))?;
    let queue = Queue::new(&context, device, None).map_err(cl_err("creating queue"))?;

    info!(
        "OpenCL device: {} ({} MiB, {} MiB per allocation)",
        name,
        global_memory >> 20,
        max_allocation >> 20
    );

    let capabilities = DeviceCapabilities {
        name,
        backend: BackendKind::OpenCl,
        global_memory,
        max_allocation,
        max_buffers: CL_MAX_BUFFERS,
        compute_units: compute_units(&device),
    };
    Ok((
        ClContext {
            platform,
            device,
            context,
            queue,
        },
        capabilities,
    ))
}
