// Platform layer - native windows, presentation surfaces, event pumps
//
// One `Platform` implementation per windowing backend. The frame scheduler
// and resize coordinator are written once against these two traits.
//
// Teardown order is part of the contract: `destroy_surface()` is always
// called before `destroy_native_handle()`, because on some backends the
// surface depends on the window's connection staying alive.

pub mod surface;
pub mod winit_backend;

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;

use crate::input::{ButtonState, KeyCode, KeyState, MouseButton, MouseState, ScanCode, WindowState};

pub use winit_backend::{VulkanLoader, WinitBackendKind, WinitPlatform, WinitSurface};

/// Backend-assigned window identity, stable for the window's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    /// Block in the native wait until at least one event arrives.
    Wait,
    /// Drain what is queued and return immediately.
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Continue,
    /// The native loop terminated on its own (e.g. the display went away).
    Exit,
}

/// Normalized window event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformEvent {
    /// The window system wants the window's contents redrawn.
    Expose,
    /// New drawable size in physical pixels.
    Resized(vk::Extent2D),
    StateChanged(WindowState),
    CloseRequested,
    MouseMove(MouseState),
    MouseButton {
        button: MouseButton,
        state: ButtonState,
        mouse: MouseState,
    },
    MouseWheel {
        dx: f32,
        dy: f32,
        mouse: MouseState,
    },
    Key {
        state: KeyState,
        scan_code: ScanCode,
        key: Option<KeyCode>,
    },
}

/// Native window plus the Vulkan surface bound to it.
pub trait PlatformSurface {
    fn key(&self) -> WindowKey;

    /// Null once `destroy_surface` ran.
    fn surface(&self) -> vk::SurfaceKHR;

    /// False when an embedding toolkit owns the surface; `destroy_surface`
    /// must then leave it alone.
    fn owns_surface(&self) -> bool {
        true
    }

    /// Fresh query, never cached: extents move under concurrent resizes.
    fn surface_capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR>;

    /// Live drawable size in physical pixels.
    fn drawable_size(&self) -> vk::Extent2D;

    /// Ask the window system to wake the loop with an expose notification.
    fn request_repaint(&self) -> Result<()>;

    fn set_visible(&mut self, visible: bool) -> Result<()>;

    fn set_title(&mut self, title: &str);

    /// Idempotent.
    fn destroy_surface(&mut self);

    /// Idempotent. Only valid after `destroy_surface`.
    fn destroy_native_handle(&mut self);
}

pub trait Platform {
    type Surface: PlatformSurface;

    /// Whatever the backend needs to create a surface (instance, entry...).
    type Loader;

    /// Instance extensions the surfaces of this backend need.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    fn create_window(
        &mut self,
        loader: &Self::Loader,
        extent_hint: vk::Extent2D,
        title: &str,
    ) -> Result<Self::Surface>;

    /// Deliver pending native events to `sink`, blocking first in `Wait` mode.
    fn pump_events(
        &mut self,
        mode: PumpMode,
        sink: &mut dyn FnMut(WindowKey, PlatformEvent),
    ) -> Result<PumpStatus>;

    /// Best-effort teardown, must not fail.
    fn finalize(&mut self);
}
