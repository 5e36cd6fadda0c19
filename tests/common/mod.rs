#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dist_hal::gfx::{SoftwareBackend, SoftwareBackendConfig};
use dist_hal::renderer::{Device, DeviceDescriptor};

pub fn software_device(config: SoftwareBackendConfig) -> (Arc<SoftwareBackend>, Device) {
    let backend = Arc::new(SoftwareBackend::new(config));
    let device = Device::new(DeviceDescriptor::new().with_name("Test Device"), backend.clone())
        .expect("software device");
    (backend, device)
}

pub fn default_device() -> (Arc<SoftwareBackend>, Device) {
    software_device(SoftwareBackendConfig::default())
}

pub fn manual_device() -> (Arc<SoftwareBackend>, Device) {
    software_device(SoftwareBackendConfig {
        native_render_pass: false,
        ..SoftwareBackendConfig::default()
    })
}

pub fn slow_device(latency: Duration) -> (Arc<SoftwareBackend>, Device) {
    software_device(SoftwareBackendConfig::default().with_latency(latency))
}
