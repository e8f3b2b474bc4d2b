// Error types
//
// Fallible calls return anyhow::Result like the rest of the crate; the
// variants below are the conditions callers may want to tell apart
// (downcast with `err.downcast_ref::<WindowError>()`).

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// The platform layer was never initialized or has been finalized.
    #[error("platform layer is not initialized")]
    PlatformNotInitialized,

    /// The native handle kind has no Vulkan surface path.
    #[error("unsupported window/display handle: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to create presentation surface: {0}")]
    SurfaceCreation(vk::Result),

    /// A native window system call failed.
    #[error("window system error: {0}")]
    Os(String),

    #[error("event loop error: {0}")]
    EventLoop(String),

    /// A fence wait ran past its deadline. The device is unresponsive.
    #[error("GPU hang: fence wait timed out")]
    GpuHang,

    #[error("Vulkan call failed: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for WindowError {
    fn from(result: vk::Result) -> Self {
        WindowError::Vulkan(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_hang_survives_anyhow_round_trip() {
        let err: anyhow::Error = WindowError::GpuHang.into();
        let err = err.context("frame 12");
        assert_eq!(err.downcast_ref::<WindowError>(), Some(&WindowError::GpuHang));
    }

    #[test]
    fn vk_result_converts_to_vulkan_variant() {
        let err = WindowError::from(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err, WindowError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        assert!(err.to_string().contains("Vulkan call failed"));
    }
}
