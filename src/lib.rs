//! Vulkan window, surface and frame-presentation core.
//!
//! ```text
//! Context (platform backend + pending-window registry)
//!   └── VulkanWindow
//!         ├── PlatformSurface   native window + VkSurfaceKHR
//!         ├── FrameScheduler    NotPending / Pending / TentativePending
//!         └── ResizeCoordinator stale swapchain -> one recreation
//! ```
//!
//! Everything runs on the thread that owns the [`Context`]. The `backend`
//! module holds the Vulkan helpers the demo renderer builds on.

pub mod backend;
pub mod config;
pub mod config_watch;
pub mod error;
pub mod input;
pub mod platform;
pub mod window;

pub use error::WindowError;
pub use platform::{Platform, PlatformEvent, PlatformSurface, PumpMode, PumpStatus, WindowKey};
pub use window::context::Context;
pub use window::device_link::{DeviceLink, PresentDevice};
pub use window::scheduler::FramePendingState;
pub use window::VulkanWindow;

/// The window type of the default (winit) backend.
pub type Window = VulkanWindow<platform::WinitSurface>;
