// Backend module - Vulkan helpers for whoever renders into a window
//
// Thin wrappers around ash. Nothing here knows about windows or scheduling;
// the window hands the renderer a surface and a resolved extent.

pub mod depth;
pub mod device;
pub mod swapchain;
pub mod sync;

pub use depth::DepthBuffer;
pub use device::VulkanDevice;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::FrameSync;
