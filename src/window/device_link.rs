// Weak link from a window to the device that renders into it
//
// The window never owns the device. It keeps the raw handle plus the
// vkDeviceWaitIdle entry point, which is all the resize path needs.

use anyhow::{Context, Result};
use ash::vk;

/// What the window needs from a device.
pub trait PresentDevice {
    fn physical_device(&self) -> vk::PhysicalDevice;

    /// Block until all queues are idle. Old swapchain images may still be
    /// in flight when a resize is handled.
    fn wait_idle(&self) -> Result<()>;
}

pub struct DeviceLink {
    device: vk::Device,
    physical_device: vk::PhysicalDevice,
    device_wait_idle: vk::PFN_vkDeviceWaitIdle,
}

impl DeviceLink {
    /// The caller keeps `device` alive for as long as the window renders.
    pub fn new(device: &ash::Device, physical_device: vk::PhysicalDevice) -> Self {
        Self {
            device: device.handle(),
            physical_device,
            device_wait_idle: device.fp_v1_0().device_wait_idle,
        }
    }

    pub fn handle(&self) -> vk::Device {
        self.device
    }
}

impl PresentDevice for DeviceLink {
    fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { (self.device_wait_idle)(self.device) }
            .result()
            .context("vkDeviceWaitIdle failed")
    }
}
