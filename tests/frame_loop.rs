// Frame scheduling, resize and teardown driven through Context::main_loop
// with a scripted platform in place of a real window system.

use anyhow::Result;
use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::CStr;
use std::rc::Rc;

use vk_window::input::{KeyCode, KeyState, MouseState, ScanCode, WindowState};
use vk_window::{
    Context, FramePendingState, Platform, PlatformEvent, PlatformSurface, PresentDevice, PumpMode,
    PumpStatus, VulkanWindow, WindowError, WindowKey,
};

// =============================================================================
// SCRIPTED PLATFORM
// =============================================================================

enum Step {
    /// Change what the surface reports as its current extent.
    Extent(vk::Extent2D),
    Event(WindowKey, PlatformEvent),
}

#[derive(Default)]
struct Native {
    current_extent: vk::Extent2D,
    owns_surfaces: bool,
    /// One batch per pump call. An empty script in Wait mode ends the loop,
    /// since a real backend would block forever.
    script: VecDeque<Vec<Step>>,
    modes: Vec<PumpMode>,
    repaints: usize,
    teardown: Vec<(WindowKey, &'static str)>,
    finalized: usize,
}

type NativeHandle = Rc<RefCell<Native>>;

struct ScriptedPlatform {
    native: NativeHandle,
    next_key: u64,
}

struct ScriptedSurface {
    key: WindowKey,
    native: NativeHandle,
    surface: vk::SurfaceKHR,
    alive: bool,
    owns: bool,
}

impl Platform for ScriptedPlatform {
    type Surface = ScriptedSurface;
    type Loader = ();

    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        Ok(vec![c"VK_KHR_surface"])
    }

    fn create_window(&mut self, _loader: &(), _extent_hint: vk::Extent2D, _title: &str) -> Result<ScriptedSurface> {
        self.next_key += 1;
        Ok(ScriptedSurface {
            key: WindowKey(self.next_key),
            native: Rc::clone(&self.native),
            surface: vk::SurfaceKHR::from_raw(self.next_key),
            alive: true,
            owns: self.native.borrow().owns_surfaces,
        })
    }

    fn pump_events(
        &mut self,
        mode: PumpMode,
        sink: &mut dyn FnMut(WindowKey, PlatformEvent),
    ) -> Result<PumpStatus> {
        let batch = {
            let mut native = self.native.borrow_mut();
            native.modes.push(mode);
            native.script.pop_front()
        };
        let Some(batch) = batch else {
            return Ok(match mode {
                PumpMode::Wait => PumpStatus::Exit,
                PumpMode::Poll => PumpStatus::Continue,
            });
        };
        for step in batch {
            match step {
                Step::Extent(extent) => self.native.borrow_mut().current_extent = extent,
                Step::Event(key, event) => sink(key, event),
            }
        }
        Ok(PumpStatus::Continue)
    }

    fn finalize(&mut self) {
        self.native.borrow_mut().finalized += 1;
    }
}

impl PlatformSurface for ScriptedSurface {
    fn key(&self) -> WindowKey {
        self.key
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn owns_surface(&self) -> bool {
        self.owns
    }

    fn surface_capabilities(&self, _physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            current_extent: self.native.borrow().current_extent,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        })
    }

    fn drawable_size(&self) -> vk::Extent2D {
        self.native.borrow().current_extent
    }

    fn request_repaint(&self) -> Result<()> {
        self.native.borrow_mut().repaints += 1;
        Ok(())
    }

    fn set_visible(&mut self, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn set_title(&mut self, _title: &str) {}

    fn destroy_surface(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            self.native.borrow_mut().teardown.push((self.key, "surface"));
            self.surface = vk::SurfaceKHR::null();
        }
    }

    fn destroy_native_handle(&mut self) {
        if std::mem::take(&mut self.alive) {
            self.native.borrow_mut().teardown.push((self.key, "native"));
        }
    }
}

struct FakeDevice {
    idle_waits: Rc<Cell<usize>>,
}

impl PresentDevice for FakeDevice {
    fn physical_device(&self) -> vk::PhysicalDevice {
        vk::PhysicalDevice::null()
    }

    fn wait_idle(&self) -> Result<()> {
        self.idle_waits.set(self.idle_waits.get() + 1);
        Ok(())
    }
}

// =============================================================================
// HARNESS
// =============================================================================

type TestWindow = VulkanWindow<ScriptedSurface>;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn context(current_extent: vk::Extent2D) -> (Context<ScriptedPlatform>, NativeHandle) {
    let native = Rc::new(RefCell::new(Native {
        current_extent,
        owns_surfaces: true,
        ..Default::default()
    }));
    let platform = ScriptedPlatform {
        native: Rc::clone(&native),
        next_key: 0,
    };
    (Context::with_platform(platform), native)
}

#[derive(Clone, Default)]
struct Counters {
    frames: Rc<Cell<usize>>,
    recreates: Rc<RefCell<Vec<vk::Extent2D>>>,
    idle_waits: Rc<Cell<usize>>,
}

/// Created window with a device and counting callbacks, not yet shown.
fn create_window(ctx: &mut Context<ScriptedPlatform>) -> (TestWindow, Counters) {
    let counters = Counters::default();
    let mut window = TestWindow::new(ctx);
    window.create(ctx, &(), extent(800, 600), "test").unwrap();
    window.set_present_device(FakeDevice {
        idle_waits: Rc::clone(&counters.idle_waits),
    });

    let recreates = Rc::clone(&counters.recreates);
    window.set_recreate_swapchain_callback(move |_window, _caps, extent| {
        recreates.borrow_mut().push(extent);
        Ok(())
    });
    let frames = Rc::clone(&counters.frames);
    window.set_frame_callback(move |_window| {
        frames.set(frames.get() + 1);
        Ok(())
    });
    (window, counters)
}

fn script(native: &NativeHandle, batches: Vec<Vec<Step>>) {
    native.borrow_mut().script = batches.into();
}

// =============================================================================
// SCHEDULING
// =============================================================================

#[test]
fn shown_window_renders_once_then_waits() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    assert_eq!(window.frame_state(), FramePendingState::Pending);
    assert_eq!(ctx.pending_windows(), vec![key]);
    assert_eq!(native.borrow().repaints, 1);

    // Expose while already pending does not queue a second frame
    script(&native, vec![vec![Step::Event(key, PlatformEvent::Expose)]]);
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(counters.frames.get(), 1);
    assert_eq!(*counters.recreates.borrow(), vec![extent(800, 600)]);
    assert_eq!(counters.idle_waits.get(), 1);
    assert_eq!(window.extent(), extent(800, 600));
    assert_eq!(window.frame_state(), FramePendingState::NotPending);
    assert!(ctx.pending_windows().is_empty());
    assert_eq!(native.borrow().modes, vec![PumpMode::Poll, PumpMode::Wait]);
    assert_eq!(native.borrow().repaints, 1);

    // Scheduling again renders without touching the swapchain
    window.schedule_frame().unwrap();
    window.schedule_frame().unwrap();
    assert_eq!(native.borrow().repaints, 2);
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(counters.frames.get(), 2);
    assert_eq!(counters.recreates.borrow().len(), 1);
    assert_eq!(counters.idle_waits.get(), 1);
}

#[test]
fn schedule_from_frame_callback_renders_exactly_once_more() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);

    let frames = Rc::clone(&counters.frames);
    window.set_frame_callback(move |window| {
        frames.set(frames.get() + 1);
        assert_eq!(window.frame_state(), FramePendingState::TentativePending);
        if frames.get() < 3 {
            window.schedule_frame()?;
            window.schedule_frame()?;
            assert_eq!(window.frame_state(), FramePendingState::Pending);
        } else {
            window.exit_main_loop();
        }
        Ok(())
    });

    window.show().unwrap();
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(counters.frames.get(), 3);
    // One frame per loop iteration, never blocking while re-armed
    assert_eq!(native.borrow().modes, vec![PumpMode::Poll; 3]);
    // show + one per re-arm
    assert_eq!(native.borrow().repaints, 3);
    assert_eq!(window.frame_state(), FramePendingState::NotPending);
}

#[test]
fn two_windows_render_independently() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut first, first_counters) = create_window(&mut ctx);
    let (mut second, second_counters) = create_window(&mut ctx);
    let second_key = second.key().unwrap();
    assert_ne!(first.key(), second.key());

    first.show().unwrap();
    second.show().unwrap();
    script(
        &native,
        vec![vec![], vec![Step::Event(second_key, PlatformEvent::Expose)]],
    );
    ctx.main_loop(&mut [&mut first, &mut second]).unwrap();

    assert_eq!(first_counters.frames.get(), 1);
    assert_eq!(second_counters.frames.get(), 2);
}

#[test]
fn hidden_window_drops_queued_frame() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    window.hide().unwrap();
    assert_eq!(window.frame_state(), FramePendingState::NotPending);
    assert!(ctx.pending_windows().is_empty());

    window.schedule_frame().unwrap();
    assert_eq!(window.frame_state(), FramePendingState::NotPending);

    script(&native, vec![vec![Step::Event(key, PlatformEvent::Expose)]]);
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(counters.frames.get(), 0);
    assert_eq!(native.borrow().modes, vec![PumpMode::Wait, PumpMode::Wait]);
}

#[test]
fn minimized_window_resumes_on_restore() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    script(
        &native,
        vec![
            vec![Step::Event(key, PlatformEvent::StateChanged(WindowState::Minimized))],
            vec![Step::Event(key, PlatformEvent::StateChanged(WindowState::Normal))],
        ],
    );
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert!(!window.is_minimized());
    assert_eq!(counters.frames.get(), 1);
    assert_eq!(counters.recreates.borrow().len(), 1);
    assert_eq!(
        native.borrow().modes,
        vec![PumpMode::Poll, PumpMode::Wait, PumpMode::Wait]
    );
}

// =============================================================================
// RESIZE
// =============================================================================

#[test]
fn repeated_resize_requests_recreate_once_with_latest_extent() {
    let (mut ctx, native) = context(extent(640, 480));
    let (mut window, counters) = create_window(&mut ctx);

    window.show().unwrap();
    for size in [extent(700, 500), extent(900, 700), extent(1024, 768)] {
        native.borrow_mut().current_extent = size;
        window.schedule_resize();
        window.schedule_frame().unwrap();
    }
    assert!(window.is_resize_pending());

    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(*counters.recreates.borrow(), vec![extent(1024, 768)]);
    assert_eq!(counters.idle_waits.get(), 1);
    assert_eq!(counters.frames.get(), 1);
    assert!(!window.is_resize_pending());
}

#[test]
fn resize_requested_by_frame_callback_applies_to_next_frame() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);

    // Acts like a renderer that hit an out-of-date swapchain
    let frames = Rc::clone(&counters.frames);
    let surface_state = Rc::clone(&native);
    window.set_frame_callback(move |window| {
        frames.set(frames.get() + 1);
        if frames.get() == 1 {
            surface_state.borrow_mut().current_extent = extent(1280, 720);
            window.schedule_resize();
            window.schedule_frame()?;
        } else {
            window.exit_main_loop();
        }
        Ok(())
    });

    window.show().unwrap();
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(
        *counters.recreates.borrow(),
        vec![extent(800, 600), extent(1280, 720)]
    );
    assert_eq!(window.extent(), extent(1280, 720));
}

#[test]
fn zero_sized_surface_defers_without_spinning() {
    let (mut ctx, native) = context(extent(0, 0));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    script(
        &native,
        vec![
            vec![],
            vec![
                Step::Extent(extent(800, 600)),
                Step::Event(key, PlatformEvent::Resized(extent(800, 600))),
            ],
        ],
    );
    ctx.main_loop(&mut [&mut window]).unwrap();

    // Deferred frame leaves nothing queued, so the loop blocks until the resize
    assert_eq!(
        native.borrow().modes,
        vec![PumpMode::Poll, PumpMode::Wait, PumpMode::Wait]
    );
    assert_eq!(*counters.recreates.borrow(), vec![extent(800, 600)]);
    assert_eq!(counters.frames.get(), 1);
    assert!(!window.is_resize_pending());
    assert!(ctx.pending_windows().is_empty());
}

#[test]
fn zero_sized_surface_keeps_resize_pending() {
    let (mut ctx, _native) = context(extent(0, 0));
    let (mut window, counters) = create_window(&mut ctx);

    window.show().unwrap();
    window.render_frame().unwrap();
    window.render_frame().unwrap();

    assert!(window.is_resize_pending());
    assert!(counters.recreates.borrow().is_empty());
    assert_eq!(counters.frames.get(), 0);
    assert_eq!(counters.idle_waits.get(), 2);
}

#[test]
fn recreate_failure_propagates_and_clears_pending_state() {
    let (mut ctx, _native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    window.set_recreate_swapchain_callback(|_window, _caps, _extent| Err(WindowError::GpuHang.into()));

    window.show().unwrap();
    let err = ctx.main_loop(&mut [&mut window]).unwrap_err();

    assert_eq!(err.downcast_ref::<WindowError>(), Some(&WindowError::GpuHang));
    assert_eq!(counters.frames.get(), 0);
    assert_eq!(window.frame_state(), FramePendingState::NotPending);
    assert!(ctx.pending_windows().is_empty());
}

// =============================================================================
// EVENTS
// =============================================================================

#[test]
fn default_close_hides_and_exits() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    script(&native, vec![vec![Step::Event(key, PlatformEvent::CloseRequested)]]);
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert!(!window.is_visible());
    assert_eq!(counters.frames.get(), 0);
    assert_eq!(native.borrow().modes, vec![PumpMode::Poll]);
    assert!(ctx.pending_windows().is_empty());
}

#[test]
fn close_callback_replaces_default() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    let closes = Rc::new(Cell::new(0));
    let seen = Rc::clone(&closes);
    window.set_close_callback(move |_window| seen.set(seen.get() + 1));

    window.show().unwrap();
    script(&native, vec![vec![Step::Event(key, PlatformEvent::CloseRequested)]]);
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(closes.get(), 1);
    assert!(window.is_visible());
    assert_eq!(counters.frames.get(), 1);
}

#[test]
fn input_events_reach_callbacks() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, _counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    let keys = Rc::new(RefCell::new(Vec::new()));
    let wheel = Rc::new(Cell::new(0.0f32));
    {
        let keys = Rc::clone(&keys);
        window.set_key_callback(move |_window, state, scan_code, code| {
            keys.borrow_mut().push((state, scan_code, code));
        });
        let wheel = Rc::clone(&wheel);
        window.set_mouse_wheel_callback(move |_window, _dx, dy, _mouse| wheel.set(wheel.get() + dy));
    }

    script(
        &native,
        vec![vec![
            Step::Event(
                key,
                PlatformEvent::Key {
                    state: KeyState::Pressed,
                    scan_code: ScanCode(57),
                    key: Some(KeyCode::Space),
                },
            ),
            Step::Event(
                key,
                PlatformEvent::MouseWheel {
                    dx: 0.0,
                    dy: 1.5,
                    mouse: MouseState::default(),
                },
            ),
            // Unknown windows are ignored
            Step::Event(WindowKey(999), PlatformEvent::CloseRequested),
        ]],
    );
    ctx.main_loop(&mut [&mut window]).unwrap();

    assert_eq!(
        *keys.borrow(),
        vec![(KeyState::Pressed, ScanCode(57), Some(KeyCode::Space))]
    );
    assert_eq!(wheel.get(), 1.5);
}

// =============================================================================
// TEARDOWN
// =============================================================================

#[test]
fn destroy_releases_surface_before_native_handle_once() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, _counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.show().unwrap();
    window.destroy();
    window.destroy();

    assert_eq!(
        native.borrow().teardown,
        vec![(key, "surface"), (key, "native")]
    );
    assert_eq!(window.surface(), vk::SurfaceKHR::null());
    assert_eq!(window.key(), None);
    assert!(ctx.pending_windows().is_empty());

    // Requests on a destroyed window are ignored
    window.schedule_frame().unwrap();
    assert!(ctx.pending_windows().is_empty());
}

#[test]
fn borrowed_surface_is_left_alone() {
    let (mut ctx, native) = context(extent(800, 600));
    native.borrow_mut().owns_surfaces = false;
    let (mut window, _counters) = create_window(&mut ctx);
    let key = window.key().unwrap();

    window.destroy();

    assert_eq!(native.borrow().teardown, vec![(key, "native")]);
}

#[test]
fn create_again_replaces_previous_window() {
    let (mut ctx, native) = context(extent(800, 600));
    let (mut window, _counters) = create_window(&mut ctx);
    let first = window.key().unwrap();

    window.create(&mut ctx, &(), extent(320, 200), "again").unwrap();
    let second = window.key().unwrap();

    assert_ne!(first, second);
    assert_eq!(
        native.borrow().teardown,
        vec![(first, "surface"), (first, "native")]
    );
}

#[test]
fn finalize_is_idempotent_and_blocks_further_use() {
    let (mut ctx, native) = context(extent(800, 600));
    {
        let (mut window, _counters) = create_window(&mut ctx);
        window.destroy();
    }

    ctx.finalize();
    ctx.finalize();
    assert!(ctx.is_finalized());
    assert_eq!(native.borrow().finalized, 1);

    let mut window = TestWindow::new(&ctx);
    let err = window.create(&mut ctx, &(), extent(800, 600), "late").unwrap_err();
    assert_eq!(
        err.downcast_ref::<WindowError>(),
        Some(&WindowError::PlatformNotInitialized)
    );
    assert!(ctx.required_extensions().is_err());

    let mut none: [&mut TestWindow; 0] = [];
    assert!(ctx.main_loop(&mut none).is_err());
    drop(window);
    drop(ctx);
    assert_eq!(native.borrow().finalized, 1);
}

#[test]
#[should_panic(expected = "swapchain recreation callback")]
fn show_without_callbacks_panics() {
    let (mut ctx, _native) = context(extent(800, 600));
    let mut window = TestWindow::new(&ctx);
    window.create(&mut ctx, &(), extent(800, 600), "bare").unwrap();
    let _ = window.show();
}
