// winit backend
//
// winit already wraps Win32, Xlib/XCB, Wayland and AppKit. We drive it with
// `pump_app_events` so the frame core owns the loop instead of winit's
// `run_app`: a zero timeout polls, no timeout blocks in the native wait.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use glam::Vec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::ffi::CStr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{self, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus as WinitPumpStatus},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use super::{surface, Platform, PlatformEvent, PlatformSurface, PumpMode, PumpStatus, WindowKey};
use crate::error::WindowError;
use crate::input::{
    ButtonState, KeyCode, KeyState, Modifiers, MouseButton, MouseState, ScanCode, WindowState,
};

/// Pixel-precise wheel deltas (touchpads) are reported in lines.
const PIXELS_PER_LINE: f32 = 20.0;

/// Which native backend winit should pick on Linux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WinitBackendKind {
    #[default]
    Auto,
    X11,
    Wayland,
}

impl FromStr for WinitBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(WinitBackendKind::Auto),
            "x11" | "xlib" => Ok(WinitBackendKind::X11),
            "wayland" => Ok(WinitBackendKind::Wayland),
            other => Err(format!("unknown windowing backend '{}' (expected auto, x11 or wayland)", other)),
        }
    }
}

/// Instance-level objects surface creation needs.
#[derive(Clone)]
pub struct VulkanLoader {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
}

impl VulkanLoader {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> Self {
        Self {
            entry: entry.clone(),
            instance: instance.clone(),
        }
    }
}

/// Per-window input bookkeeping used to normalize events.
#[derive(Debug, Default)]
struct InputTracking {
    mouse: MouseState,
    minimized: bool,
}

pub struct WinitPlatform {
    event_loop: Option<EventLoop<()>>,
    tracking: HashMap<WindowKey, InputTracking>,
}

impl WinitPlatform {
    /// Process defaults.
    pub fn new() -> Result<Self> {
        Self::with_backend(WinitBackendKind::Auto)
    }

    pub fn with_backend(kind: WinitBackendKind) -> Result<Self> {
        let mut builder = EventLoop::builder();

        #[cfg(target_os = "linux")]
        match kind {
            WinitBackendKind::X11 => {
                use winit::platform::x11::EventLoopBuilderExtX11;
                builder.with_x11();
            }
            WinitBackendKind::Wayland => {
                use winit::platform::wayland::EventLoopBuilderExtWayland;
                builder.with_wayland();
            }
            WinitBackendKind::Auto => {}
        }
        #[cfg(not(target_os = "linux"))]
        if kind != WinitBackendKind::Auto {
            log::warn!("Backend {:?} only applies on Linux, using platform default", kind);
        }

        let event_loop = builder
            .build()
            .map_err(|e| WindowError::EventLoop(e.to_string()))
            .context("Failed to connect to the window system")?;
        Ok(Self::from_event_loop(event_loop))
    }

    /// Adopt an event loop (display connection) created elsewhere.
    pub fn from_event_loop(event_loop: EventLoop<()>) -> Self {
        event_loop.set_control_flow(ControlFlow::Wait);
        Self {
            event_loop: Some(event_loop),
            tracking: HashMap::new(),
        }
    }

    fn event_loop(&self) -> Result<&EventLoop<()>> {
        Ok(self.event_loop.as_ref().ok_or(WindowError::PlatformNotInitialized)?)
    }
}

impl Platform for WinitPlatform {
    type Surface = WinitSurface;
    type Loader = VulkanLoader;

    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display = self
            .event_loop()?
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        surface::required_extensions(display)
    }

    fn create_window(
        &mut self,
        loader: &VulkanLoader,
        extent_hint: vk::Extent2D,
        title: &str,
    ) -> Result<WinitSurface> {
        let attributes = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(extent_hint.width, extent_hint.height))
            .with_visible(false);

        // Windows are created outside of `resumed`; desktop backends allow it.
        #[allow(deprecated)]
        let window = self
            .event_loop()?
            .create_window(attributes)
            .map_err(|e| WindowError::Os(e.to_string()))
            .context("Failed to create window")?;
        let window = Arc::new(window);

        let surface = unsafe {
            let display = window.display_handle().context("Failed to get display handle")?.as_raw();
            let handle = window.window_handle().context("Failed to get window handle")?.as_raw();
            surface::create_surface(&loader.entry, &loader.instance, display, handle)?
        };

        let key = WindowKey(u64::from(window.id()));
        self.tracking.insert(key, InputTracking::default());
        log::info!("Created window {:?} '{}' ({}x{})", key, title, extent_hint.width, extent_hint.height);

        Ok(WinitSurface {
            key,
            window: Some(window),
            surface,
            surface_loader: khr::Surface::new(&loader.entry, &loader.instance),
        })
    }

    fn pump_events(
        &mut self,
        mode: PumpMode,
        sink: &mut dyn FnMut(WindowKey, PlatformEvent),
    ) -> Result<PumpStatus> {
        let event_loop = self.event_loop.as_mut().ok_or(WindowError::PlatformNotInitialized)?;
        let timeout = match mode {
            PumpMode::Wait => None,
            PumpMode::Poll => Some(Duration::ZERO),
        };

        let mut dispatch = Dispatch {
            sink,
            tracking: &mut self.tracking,
        };
        match event_loop.pump_app_events(timeout, &mut dispatch) {
            WinitPumpStatus::Continue => Ok(PumpStatus::Continue),
            WinitPumpStatus::Exit(code) => {
                log::info!("Native event loop exited with code {}", code);
                Ok(PumpStatus::Exit)
            }
        }
    }

    fn finalize(&mut self) {
        if self.event_loop.take().is_some() {
            log::info!("Closed window system connection");
        }
        self.tracking.clear();
    }
}

struct Dispatch<'a, 's> {
    sink: &'a mut (dyn FnMut(WindowKey, PlatformEvent) + 's),
    tracking: &'a mut HashMap<WindowKey, InputTracking>,
}

impl ApplicationHandler for Dispatch<'_, '_> {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let key = WindowKey(u64::from(id));

        if let WindowEvent::Destroyed = event {
            self.tracking.remove(&key);
            return;
        }
        let Some(tracking) = self.tracking.get_mut(&key) else {
            return;
        };

        for normalized in translate(tracking, event) {
            (self.sink)(key, normalized);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
    }
}

fn translate(tracking: &mut InputTracking, event: WindowEvent) -> Vec<PlatformEvent> {
    match event {
        WindowEvent::RedrawRequested => vec![PlatformEvent::Expose],

        WindowEvent::CloseRequested => vec![PlatformEvent::CloseRequested],

        WindowEvent::Resized(size) if size.width == 0 || size.height == 0 => {
            // Win32 reports minimize as a zero-sized resize
            tracking.minimized = true;
            vec![PlatformEvent::StateChanged(WindowState::Minimized)]
        }
        WindowEvent::Resized(size) => {
            let resized = PlatformEvent::Resized(vk::Extent2D {
                width: size.width,
                height: size.height,
            });
            if std::mem::take(&mut tracking.minimized) {
                vec![PlatformEvent::StateChanged(WindowState::Normal), resized]
            } else {
                vec![resized]
            }
        }
        WindowEvent::Occluded(occluded) => {
            tracking.minimized = occluded;
            let state = if occluded { WindowState::Minimized } else { WindowState::Normal };
            vec![PlatformEvent::StateChanged(state)]
        }

        WindowEvent::ModifiersChanged(modifiers) => {
            let state = modifiers.state();
            let mut mods = Modifiers::empty();
            mods.set(Modifiers::SHIFT, state.shift_key());
            mods.set(Modifiers::CTRL, state.control_key());
            mods.set(Modifiers::ALT, state.alt_key());
            mods.set(Modifiers::META, state.super_key());
            tracking.mouse.modifiers = mods;
            Vec::new()
        }

        WindowEvent::CursorMoved { position, .. } => {
            tracking.mouse = tracking
                .mouse
                .moved_to(Vec2::new(position.x as f32, position.y as f32));
            vec![PlatformEvent::MouseMove(tracking.mouse)]
        }
        WindowEvent::MouseInput { state, button, .. } => {
            let button = map_mouse_button(button);
            let state = match state {
                ElementState::Pressed => ButtonState::Pressed,
                ElementState::Released => ButtonState::Released,
            };
            tracking.mouse = tracking.mouse.with_button(button, state);
            vec![PlatformEvent::MouseButton {
                button,
                state,
                mouse: tracking.mouse,
            }]
        }
        WindowEvent::MouseWheel { delta, .. } => {
            let (dx, dy) = match delta {
                MouseScrollDelta::LineDelta(x, y) => (x, y),
                MouseScrollDelta::PixelDelta(p) => {
                    (p.x as f32 / PIXELS_PER_LINE, p.y as f32 / PIXELS_PER_LINE)
                }
            };
            vec![PlatformEvent::MouseWheel {
                dx,
                dy,
                mouse: tracking.mouse,
            }]
        }

        WindowEvent::KeyboardInput { event, .. } => {
            let state = match (event.state, event.repeat) {
                (ElementState::Pressed, false) => KeyState::Pressed,
                (ElementState::Pressed, true) => KeyState::Repeated,
                (ElementState::Released, _) => KeyState::Released,
            };
            let key = match event.physical_key {
                PhysicalKey::Code(code) => map_winit_key(code),
                PhysicalKey::Unidentified(_) => None,
            };
            vec![PlatformEvent::Key {
                state,
                scan_code: scan_code(event.physical_key),
                key,
            }]
        }

        _ => Vec::new(),
    }
}

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
fn scan_code(key: PhysicalKey) -> ScanCode {
    use winit::platform::scancode::PhysicalKeyExtScancode;
    ScanCode(key.to_scancode().unwrap_or(0))
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
fn scan_code(_key: PhysicalKey) -> ScanCode {
    ScanCode(0)
}

fn map_mouse_button(button: winit::event::MouseButton) -> MouseButton {
    match button {
        winit::event::MouseButton::Left => MouseButton::Left,
        winit::event::MouseButton::Right => MouseButton::Right,
        winit::event::MouseButton::Middle => MouseButton::Middle,
        winit::event::MouseButton::Back => MouseButton::Back,
        winit::event::MouseButton::Forward => MouseButton::Forward,
        winit::event::MouseButton::Other(id) => MouseButton::Other(id),
    }
}

fn map_winit_key(key: keyboard::KeyCode) -> Option<KeyCode> {
    Some(match key {
        // Letters
        keyboard::KeyCode::KeyA => KeyCode::A,
        keyboard::KeyCode::KeyB => KeyCode::B,
        keyboard::KeyCode::KeyC => KeyCode::C,
        keyboard::KeyCode::KeyD => KeyCode::D,
        keyboard::KeyCode::KeyE => KeyCode::E,
        keyboard::KeyCode::KeyF => KeyCode::F,
        keyboard::KeyCode::KeyG => KeyCode::G,
        keyboard::KeyCode::KeyH => KeyCode::H,
        keyboard::KeyCode::KeyI => KeyCode::I,
        keyboard::KeyCode::KeyJ => KeyCode::J,
        keyboard::KeyCode::KeyK => KeyCode::K,
        keyboard::KeyCode::KeyL => KeyCode::L,
        keyboard::KeyCode::KeyM => KeyCode::M,
        keyboard::KeyCode::KeyN => KeyCode::N,
        keyboard::KeyCode::KeyO => KeyCode::O,
        keyboard::KeyCode::KeyP => KeyCode::P,
        keyboard::KeyCode::KeyQ => KeyCode::Q,
        keyboard::KeyCode::KeyR => KeyCode::R,
        keyboard::KeyCode::KeyS => KeyCode::S,
        keyboard::KeyCode::KeyT => KeyCode::T,
        keyboard::KeyCode::KeyU => KeyCode::U,
        keyboard::KeyCode::KeyV => KeyCode::V,
        keyboard::KeyCode::KeyW => KeyCode::W,
        keyboard::KeyCode::KeyX => KeyCode::X,
        keyboard::KeyCode::KeyY => KeyCode::Y,
        keyboard::KeyCode::KeyZ => KeyCode::Z,

        // Digits
        keyboard::KeyCode::Digit0 => KeyCode::Digit0,
        keyboard::KeyCode::Digit1 => KeyCode::Digit1,
        keyboard::KeyCode::Digit2 => KeyCode::Digit2,
        keyboard::KeyCode::Digit3 => KeyCode::Digit3,
        keyboard::KeyCode::Digit4 => KeyCode::Digit4,
        keyboard::KeyCode::Digit5 => KeyCode::Digit5,
        keyboard::KeyCode::Digit6 => KeyCode::Digit6,
        keyboard::KeyCode::Digit7 => KeyCode::Digit7,
        keyboard::KeyCode::Digit8 => KeyCode::Digit8,
        keyboard::KeyCode::Digit9 => KeyCode::Digit9,

        // Function keys
        keyboard::KeyCode::F1 => KeyCode::F1,
        keyboard::KeyCode::F2 => KeyCode::F2,
        keyboard::KeyCode::F3 => KeyCode::F3,
        keyboard::KeyCode::F4 => KeyCode::F4,
        keyboard::KeyCode::F5 => KeyCode::F5,
        keyboard::KeyCode::F6 => KeyCode::F6,
        keyboard::KeyCode::F7 => KeyCode::F7,
        keyboard::KeyCode::F8 => KeyCode::F8,
        keyboard::KeyCode::F9 => KeyCode::F9,
        keyboard::KeyCode::F10 => KeyCode::F10,
        keyboard::KeyCode::F11 => KeyCode::F11,
        keyboard::KeyCode::F12 => KeyCode::F12,

        // Modifiers
        keyboard::KeyCode::ShiftLeft => KeyCode::ShiftLeft,
        keyboard::KeyCode::ShiftRight => KeyCode::ShiftRight,
        keyboard::KeyCode::ControlLeft => KeyCode::ControlLeft,
        keyboard::KeyCode::ControlRight => KeyCode::ControlRight,
        keyboard::KeyCode::AltLeft => KeyCode::AltLeft,
        keyboard::KeyCode::AltRight => KeyCode::AltRight,
        keyboard::KeyCode::SuperLeft => KeyCode::SuperLeft,
        keyboard::KeyCode::SuperRight => KeyCode::SuperRight,

        // Navigation
        keyboard::KeyCode::ArrowUp => KeyCode::ArrowUp,
        keyboard::KeyCode::ArrowDown => KeyCode::ArrowDown,
        keyboard::KeyCode::ArrowLeft => KeyCode::ArrowLeft,
        keyboard::KeyCode::ArrowRight => KeyCode::ArrowRight,
        keyboard::KeyCode::Home => KeyCode::Home,
        keyboard::KeyCode::End => KeyCode::End,
        keyboard::KeyCode::PageUp => KeyCode::PageUp,
        keyboard::KeyCode::PageDown => KeyCode::PageDown,

        // Editing
        keyboard::KeyCode::Space => KeyCode::Space,
        keyboard::KeyCode::Enter => KeyCode::Enter,
        keyboard::KeyCode::Escape => KeyCode::Escape,
        keyboard::KeyCode::Tab => KeyCode::Tab,
        keyboard::KeyCode::Backspace => KeyCode::Backspace,
        keyboard::KeyCode::Delete => KeyCode::Delete,
        keyboard::KeyCode::Insert => KeyCode::Insert,

        _ => return None,
    })
}

/// A winit window with its Vulkan surface.
pub struct WinitSurface {
    key: WindowKey,
    window: Option<Arc<Window>>,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
}

impl WinitSurface {
    /// The underlying winit window, until the native handle is destroyed.
    pub fn winit_window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    pub fn surface_loader(&self) -> &khr::Surface {
        &self.surface_loader
    }

    /// Switch between borderless fullscreen on the current monitor and windowed.
    pub fn set_fullscreen(&self, fullscreen: bool) {
        if let Some(window) = &self.window {
            window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.window
            .as_ref()
            .is_some_and(|w| w.fullscreen().is_some())
    }
}

impl PlatformSurface for WinitSurface {
    fn key(&self) -> WindowKey {
        self.key
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn surface_capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")?;
        Ok(caps)
    }

    fn drawable_size(&self) -> vk::Extent2D {
        match &self.window {
            Some(window) => {
                let size = window.inner_size();
                vk::Extent2D {
                    width: size.width,
                    height: size.height,
                }
            }
            None => vk::Extent2D::default(),
        }
    }

    fn request_repaint(&self) -> Result<()> {
        let window = self
            .window
            .as_ref()
            .ok_or_else(|| WindowError::Os("repaint requested for a destroyed window".into()))?;
        window.request_redraw();
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        let window = self
            .window
            .as_ref()
            .ok_or_else(|| WindowError::Os("window handle already destroyed".into()))?;
        window.set_visible(visible);
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        if let Some(window) = &self.window {
            window.set_title(title);
        }
    }

    fn destroy_surface(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.surface_loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
            log::debug!("Destroyed surface of window {:?}", self.key);
        }
    }

    fn destroy_native_handle(&mut self) {
        debug_assert_eq!(self.surface, vk::SurfaceKHR::null(), "surface must go first");
        if self.window.take().is_some() {
            log::debug!("Destroyed native window {:?}", self.key);
        }
    }
}

impl Drop for WinitSurface {
    fn drop(&mut self) {
        self.destroy_surface();
        self.destroy_native_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("auto".parse::<WinitBackendKind>(), Ok(WinitBackendKind::Auto));
        assert_eq!("X11".parse::<WinitBackendKind>(), Ok(WinitBackendKind::X11));
        assert_eq!("wayland".parse::<WinitBackendKind>(), Ok(WinitBackendKind::Wayland));
        assert!("sdl".parse::<WinitBackendKind>().is_err());
    }

    #[test]
    fn zero_resize_reports_minimize_then_restore() {
        let mut tracking = InputTracking::default();
        let events = translate(&mut tracking, WindowEvent::Resized(PhysicalSize::new(0, 0)));
        assert_eq!(events, vec![PlatformEvent::StateChanged(WindowState::Minimized)]);

        let events = translate(&mut tracking, WindowEvent::Resized(PhysicalSize::new(640, 480)));
        assert_eq!(
            events,
            vec![
                PlatformEvent::StateChanged(WindowState::Normal),
                PlatformEvent::Resized(vk::Extent2D { width: 640, height: 480 }),
            ]
        );
    }

    #[test]
    fn key_mapping_covers_controls() {
        assert_eq!(map_winit_key(keyboard::KeyCode::Escape), Some(KeyCode::Escape));
        assert_eq!(map_winit_key(keyboard::KeyCode::F11), Some(KeyCode::F11));
        assert_eq!(map_winit_key(keyboard::KeyCode::NumpadAdd), None);
    }
}
