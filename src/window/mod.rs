// VulkanWindow - native window + surface + frame scheduling
//
// LIFECYCLE:
//   new -> create -> set_device -> set callbacks -> show -> main_loop
//   hide / destroy at any point after create (destroy is idempotent)
//
// FRAME FLOW (driven by Context::main_loop):
//   schedule_frame ──> Pending ──> deliver_frame ──> render_frame
//                                                     ├─ resize step
//                                                     └─ frame callback

pub mod context;
pub mod device_link;
pub mod registry;
pub mod resize;
pub mod scheduler;

use anyhow::Result;
use ash::vk;
use std::rc::Rc;

use crate::input::{ButtonState, KeyCode, KeyState, MouseButton, MouseState, ScanCode, WindowState};
use crate::platform::{Platform, PlatformEvent, PlatformSurface, WindowKey};
use context::{Context, Shared};
use device_link::{DeviceLink, PresentDevice};
use resize::{ResizeCoordinator, ResizeStep};
use scheduler::{FramePendingState, FrameScheduler};

pub type RecreateCallback<S> =
    Box<dyn FnMut(&mut VulkanWindow<S>, &vk::SurfaceCapabilitiesKHR, vk::Extent2D) -> Result<()>>;
pub type FrameCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>) -> Result<()>>;
pub type MouseMoveCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>, MouseState)>;
pub type MouseButtonCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>, MouseButton, ButtonState, MouseState)>;
pub type MouseWheelCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>, f32, f32, MouseState)>;
pub type KeyCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>, KeyState, ScanCode, Option<KeyCode>)>;
pub type CloseCallback<S> = Box<dyn FnMut(&mut VulkanWindow<S>)>;

struct Callbacks<S: PlatformSurface> {
    recreate: Option<RecreateCallback<S>>,
    frame: Option<FrameCallback<S>>,
    mouse_move: Option<MouseMoveCallback<S>>,
    mouse_button: Option<MouseButtonCallback<S>>,
    mouse_wheel: Option<MouseWheelCallback<S>>,
    key: Option<KeyCallback<S>>,
    close: Option<CloseCallback<S>>,
}

impl<S: PlatformSurface> Default for Callbacks<S> {
    fn default() -> Self {
        Self {
            recreate: None,
            frame: None,
            mouse_move: None,
            mouse_button: None,
            mouse_wheel: None,
            key: None,
            close: None,
        }
    }
}

/// Call a stored callback with the window itself. The callback is taken out
/// for the duration of the call; if it installed a replacement, that wins.
macro_rules! invoke {
    ($window:expr, $slot:ident $(, $arg:expr)*) => {{
        match $window.callbacks.$slot.take() {
            Some(mut callback) => {
                let result = callback(&mut *$window $(, $arg)*);
                if $window.callbacks.$slot.is_none() {
                    $window.callbacks.$slot = Some(callback);
                }
                Some(result)
            }
            None => None,
        }
    }};
}

pub struct VulkanWindow<S: PlatformSurface> {
    shared: Rc<Shared>,
    surface: Option<S>,
    device: Option<Box<dyn PresentDevice>>,
    scheduler: FrameScheduler,
    resize: ResizeCoordinator,
    visible: bool,
    minimized: bool,
    /// Extent of the current swapchain, as handed to the recreation callback.
    extent: vk::Extent2D,
    callbacks: Callbacks<S>,
}

impl<S: PlatformSurface> VulkanWindow<S> {
    /// An empty window bound to `ctx`; nothing native exists until `create`.
    pub fn new<P: Platform<Surface = S>>(ctx: &Context<P>) -> Self {
        Self {
            shared: Rc::clone(&ctx.shared),
            surface: None,
            device: None,
            scheduler: FrameScheduler::new(),
            resize: ResizeCoordinator::new(),
            visible: false,
            minimized: false,
            extent: vk::Extent2D::default(),
            callbacks: Callbacks::default(),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Create the native window (hidden) and its presentation surface.
    ///
    /// Calling it again destroys the previous window first.
    pub fn create<P: Platform<Surface = S>>(
        &mut self,
        ctx: &mut Context<P>,
        loader: &P::Loader,
        extent_hint: vk::Extent2D,
        title: &str,
    ) -> Result<vk::SurfaceKHR> {
        debug_assert!(Rc::ptr_eq(&self.shared, &ctx.shared), "window belongs to another context");
        self.destroy();
        ctx.ensure_initialized()?;

        let surface = ctx.platform.create_window(loader, extent_hint, title)?;
        let handle = surface.surface();
        self.surface = Some(surface);
        self.shared.live_windows.set(self.shared.live_windows.get() + 1);

        // First render builds the swapchain
        self.resize.schedule_resize();
        Ok(handle)
    }

    /// Release the surface, then the native window. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        let Some(mut surface) = self.surface.take() else {
            return;
        };
        let key = surface.key();
        self.scheduler.cancel(key, &mut self.shared.registry.borrow_mut());

        if surface.owns_surface() {
            surface.destroy_surface();
        }
        surface.destroy_native_handle();

        self.device = None;
        self.visible = false;
        self.minimized = false;
        self.extent = vk::Extent2D::default();
        self.shared.live_windows.set(self.shared.live_windows.get().saturating_sub(1));
        log::info!("Destroyed window {:?}", key);
    }

    /// Link the device that renders into this window. The window does not
    /// own it; keep it alive until the window is destroyed.
    pub fn set_device(&mut self, device: &ash::Device, physical_device: vk::PhysicalDevice) {
        self.set_present_device(DeviceLink::new(device, physical_device));
    }

    pub fn set_present_device(&mut self, device: impl PresentDevice + 'static) {
        assert!(self.surface.is_some(), "set_device called before create");
        self.device = Some(Box::new(device));
    }

    pub fn show(&mut self) -> Result<()> {
        assert!(
            self.callbacks.recreate.is_some(),
            "show called before the swapchain recreation callback was set"
        );
        assert!(self.callbacks.frame.is_some(), "show called before the frame callback was set");
        let surface = self.surface.as_mut().expect("show called before create");

        surface.set_visible(true)?;
        self.visible = true;
        self.resize.schedule_resize();
        self.schedule_frame()
    }

    /// Hide the window and drop any queued frame without rendering it.
    pub fn hide(&mut self) -> Result<()> {
        let Some(surface) = self.surface.as_mut() else {
            return Ok(());
        };
        self.scheduler.cancel(surface.key(), &mut self.shared.registry.borrow_mut());
        surface.set_visible(false)?;
        self.visible = false;
        Ok(())
    }

    // =========================================================================
    // SCHEDULING
    // =========================================================================

    /// Queue one frame. Repeated calls before it renders are no-ops; a call
    /// from inside the frame callback queues exactly one more frame.
    ///
    /// Hidden, minimized or uncreated windows ignore the request.
    pub fn schedule_frame(&mut self) -> Result<()> {
        let Some(surface) = self.surface.as_ref() else {
            return Ok(());
        };
        if !self.visible || self.minimized {
            return Ok(());
        }
        let repaint = self
            .scheduler
            .schedule(surface.key(), &mut self.shared.registry.borrow_mut());
        if repaint {
            surface.request_repaint()?;
        }
        Ok(())
    }

    /// Mark the swapchain stale. It is rebuilt once, before the next frame.
    pub fn schedule_resize(&mut self) {
        self.resize.schedule_resize();
    }

    /// Stop `Context::main_loop` after the current dispatch step.
    pub fn exit_main_loop(&self) {
        self.shared.exit_requested.set(true);
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Bring the swapchain up to date, then run the frame callback once.
    ///
    /// Returns early, without calling back, while the surface is zero-sized.
    pub fn render_frame(&mut self) -> Result<()> {
        let surface = self.surface.as_ref().expect("render_frame called before create");
        let device = self.device.as_deref().expect("render_frame called before set_device");

        match self.resize.prepare(device, surface)? {
            ResizeStep::Current => {}
            ResizeStep::Deferred => return Ok(()),
            ResizeStep::Recreate { capabilities, extent } => {
                self.extent = extent;
                invoke!(self, recreate, &capabilities, extent)
                    .expect("swapchain recreation callback not set")?;
            }
        }

        invoke!(self, frame).expect("frame callback not set")
    }

    /// Render if a frame is queued. Called by the main loop.
    pub(crate) fn deliver_frame(&mut self) -> Result<()> {
        let Some(key) = self.key() else {
            return Ok(());
        };
        if !self
            .scheduler
            .begin_render(key, &mut self.shared.registry.borrow_mut())
        {
            return Ok(());
        }

        let result = if self.visible && !self.minimized {
            self.render_frame()
        } else {
            Ok(())
        };

        self.scheduler.end_render(key, &mut self.shared.registry.borrow_mut());
        result
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    pub(crate) fn handle_event(&mut self, event: PlatformEvent) -> Result<()> {
        let Some(key) = self.key() else {
            return Ok(());
        };

        match event {
            PlatformEvent::Expose => {
                // The window system already woke us; no repaint request needed
                if self.visible && !self.minimized {
                    self.scheduler.schedule(key, &mut self.shared.registry.borrow_mut());
                }
            }
            PlatformEvent::Resized(extent) => {
                log::debug!("Window {:?} resized to {}x{}", key, extent.width, extent.height);
                self.resize.schedule_resize();
                self.schedule_frame()?;
            }
            PlatformEvent::StateChanged(WindowState::Minimized) => {
                log::debug!("Window {:?} minimized", key);
                self.minimized = true;
                self.scheduler.cancel(key, &mut self.shared.registry.borrow_mut());
            }
            PlatformEvent::StateChanged(state) => {
                if std::mem::take(&mut self.minimized) {
                    log::debug!("Window {:?} restored ({:?})", key, state);
                }
                self.resize.schedule_resize();
                self.schedule_frame()?;
            }
            PlatformEvent::CloseRequested => {
                if invoke!(self, close).is_none() {
                    self.hide()?;
                    self.exit_main_loop();
                }
            }
            PlatformEvent::MouseMove(mouse) => {
                invoke!(self, mouse_move, mouse);
            }
            PlatformEvent::MouseButton { button, state, mouse } => {
                invoke!(self, mouse_button, button, state, mouse);
            }
            PlatformEvent::MouseWheel { dx, dy, mouse } => {
                invoke!(self, mouse_wheel, dx, dy, mouse);
            }
            PlatformEvent::Key { state, scan_code, key: code } => {
                invoke!(self, key, state, scan_code, code);
            }
        }
        Ok(())
    }

    // =========================================================================
    // CALLBACKS
    // =========================================================================

    /// Rebuild swapchain, depth buffer and framebuffers for a new extent.
    pub fn set_recreate_swapchain_callback(
        &mut self,
        callback: impl FnMut(&mut VulkanWindow<S>, &vk::SurfaceCapabilitiesKHR, vk::Extent2D) -> Result<()> + 'static,
    ) {
        self.callbacks.recreate = Some(Box::new(callback));
    }

    /// Record, submit and present one frame.
    pub fn set_frame_callback(&mut self, callback: impl FnMut(&mut VulkanWindow<S>) -> Result<()> + 'static) {
        self.callbacks.frame = Some(Box::new(callback));
    }

    pub fn set_mouse_move_callback(&mut self, callback: impl FnMut(&mut VulkanWindow<S>, MouseState) + 'static) {
        self.callbacks.mouse_move = Some(Box::new(callback));
    }

    pub fn set_mouse_button_callback(
        &mut self,
        callback: impl FnMut(&mut VulkanWindow<S>, MouseButton, ButtonState, MouseState) + 'static,
    ) {
        self.callbacks.mouse_button = Some(Box::new(callback));
    }

    pub fn set_mouse_wheel_callback(
        &mut self,
        callback: impl FnMut(&mut VulkanWindow<S>, f32, f32, MouseState) + 'static,
    ) {
        self.callbacks.mouse_wheel = Some(Box::new(callback));
    }

    pub fn set_key_callback(
        &mut self,
        callback: impl FnMut(&mut VulkanWindow<S>, KeyState, ScanCode, Option<KeyCode>) + 'static,
    ) {
        self.callbacks.key = Some(Box::new(callback));
    }

    /// Replaces the default close behavior (hide + exit main loop).
    pub fn set_close_callback(&mut self, callback: impl FnMut(&mut VulkanWindow<S>) + 'static) {
        self.callbacks.close = Some(Box::new(callback));
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn key(&self) -> Option<WindowKey> {
        self.surface.as_ref().map(|s| s.key())
    }

    /// Null until `create`, and again after `destroy`.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
            .as_ref()
            .map_or(vk::SurfaceKHR::null(), |s| s.surface())
    }

    pub fn platform_surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn platform_surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    pub fn set_title(&mut self, title: &str) {
        if let Some(surface) = self.surface.as_mut() {
            surface.set_title(title);
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn frame_state(&self) -> FramePendingState {
        self.scheduler.state()
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }
}

impl<S: PlatformSurface> Drop for VulkanWindow<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
