// =============================================================================
// VK-WINDOW DEMO - clears one window with a configurable color
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Context (winit backend, pending-window registry)               │
// │    └── Window (surface, frame scheduler, resize coordinator)    │
// │          └── Renderer (callbacks)                               │
// │                └── Swapchain + depth buffer + command buffers   │
// │                      └── Synchronization (fences, semaphores)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one frame callback):
// 1. Wait for the fence of this frame slot
// 2. Acquire swapchain image (out of date -> schedule resize, retry)
// 3. Submit pre-recorded commands to GPU
// 4. Present rendered image to screen
// 5. Schedule the next frame when animating
//
// =============================================================================

use anyhow::{Context as _, Result};
use ash::extensions::khr;
use ash::vk;
use clap::Parser;
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use vk_window::backend::{AcquireOutcome, DepthBuffer, FrameSync, PresentOutcome, Swapchain, VulkanDevice};
use vk_window::config::{Config, DEFAULT_CONFIG_PATH};
use vk_window::config_watch::ConfigWatcher;
use vk_window::input::{KeyCode, KeyState};
use vk_window::platform::{VulkanLoader, WinitBackendKind, WinitPlatform};
use vk_window::{Context, Window};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "vk-window-demo", about = "Clears a Vulkan window, redrawing on demand")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Windowing backend: auto, x11 or wayland (overrides the config file)
    #[arg(long)]
    backend: Option<WinitBackendKind>,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, falling back to defaults on any error
    let config = Config::load_from_path(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load {:?}: {:#}. Using defaults.", cli.config, e);
        Config::default()
    });

    init_logging(&config);
    log::info!("Starting vk-window demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    run(cli, config).inspect_err(|e| log::error!("{:#}", e))
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== vk-window Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let backend = cli.backend.unwrap_or_else(|| config.get_backend());
    let mut ctx = Context::with_platform(WinitPlatform::with_backend(backend)?);

    // ─────────────────────────────────────────────────────────────────────────
    // Device with the extensions this windowing backend needs
    // ─────────────────────────────────────────────────────────────────────────
    let extensions = ctx.required_extensions()?;
    let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
    let device = VulkanDevice::new(&config.window.title, enable_validation, &extensions)?;
    let loader = VulkanLoader::new(&device.entry, &device.instance);

    // ─────────────────────────────────────────────────────────────────────────
    // Window + surface
    // ─────────────────────────────────────────────────────────────────────────
    let mut window = Window::new(&ctx);
    let surface = window.create(
        &mut ctx,
        &loader,
        vk::Extent2D {
            width: config.window.width,
            height: config.window.height,
        },
        &config.window.title,
    )?;
    let surface_loader = window
        .platform_surface()
        .context("Window has no surface")?
        .surface_loader()
        .clone();

    if !device.supports_presentation(&surface_loader, surface)? {
        anyhow::bail!("Selected GPU cannot present to this window");
    }
    window.set_device(&device.device, device.physical_device);

    if config.window.fullscreen {
        if let Some(native) = window.platform_surface() {
            native.set_fullscreen(true);
        }
    }

    let watcher = if config.debug.hot_reload {
        ConfigWatcher::new(&cli.config)
            .inspect_err(|e| log::warn!("Config hot reload disabled: {:#}", e))
            .ok()
    } else {
        None
    };

    let renderer = Rc::new(RefCell::new(Renderer::new(
        config,
        Arc::clone(&device),
        surface,
        surface_loader,
        watcher,
    )?));

    // ─────────────────────────────────────────────────────────────────────────
    // Callbacks
    // ─────────────────────────────────────────────────────────────────────────
    window.set_recreate_swapchain_callback({
        let renderer = Rc::clone(&renderer);
        move |_window, caps, extent| renderer.borrow_mut().recreate(caps, extent)
    });
    window.set_frame_callback({
        let renderer = Rc::clone(&renderer);
        move |window| renderer.borrow_mut().draw(window)
    });
    window.set_key_callback({
        let renderer = Rc::clone(&renderer);
        move |window, state, _scan_code, key| {
            if let (KeyState::Pressed, Some(key)) = (state, key) {
                if let Err(e) = renderer.borrow().on_key(window, key) {
                    log::warn!("Key handling failed: {:#}", e);
                }
            }
        }
    });

    // Teardown below runs even if the loop failed
    let result = window
        .show()
        .and_then(|()| ctx.main_loop(&mut [&mut window]));

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown: GPU idle, swapchain before surface, windows before platform
    // ─────────────────────────────────────────────────────────────────────────
    if let Err(e) = device.wait_idle() {
        log::warn!("wait_idle during shutdown failed: {:#}", e);
    }
    renderer.borrow_mut().destroy();
    window.destroy();
    ctx.finalize();

    log::info!("Cleanup complete");
    result
}

// =============================================================================
// RENDERER STATE
// =============================================================================

/// Everything the window callbacks render with.
///
/// Swapchain-sized resources are rebuilt by `recreate`; the window decides
/// when and with which extent.
struct Renderer {
    config: Config,
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,

    swapchain: Option<Swapchain>,
    depth: Option<DepthBuffer>,

    command_pool: vk::CommandPool,
    /// One command buffer per swapchain image (pre-recorded)
    command_buffers: Vec<vk::CommandBuffer>,

    /// Sync objects for each frame in flight
    frame_sync: Vec<FrameSync>,
    current_frame: usize,
    wait_stages: [vk::PipelineStageFlags; 1],

    watcher: Option<ConfigWatcher>,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl Renderer {
    fn new(
        config: Config,
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        surface_loader: khr::Surface,
        watcher: Option<ConfigWatcher>,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let frames_in_flight = config.graphics.max_frames_in_flight.max(1);
        let frame_sync = (0..frames_in_flight)
            .map(|_| FrameSync::new(&device.device))
            .collect::<Result<Vec<_>>>()?;

        let now = Instant::now();
        Ok(Self {
            config,
            device,
            surface,
            surface_loader,
            swapchain: None,
            depth: None,
            command_pool,
            command_buffers: Vec::new(),
            frame_sync,
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::TRANSFER],
            watcher,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        })
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Rebuild swapchain, depth buffer and command buffers. The device is
    /// already idle when the window calls this.
    fn recreate(&mut self, caps: &vk::SurfaceCapabilitiesKHR, extent: vk::Extent2D) -> Result<()> {
        let old = self.swapchain.take();
        let swapchain = Swapchain::new(
            Arc::clone(&self.device),
            self.surface,
            &self.surface_loader,
            caps,
            extent,
            self.config.get_present_mode(),
            old.as_ref().map_or(vk::SwapchainKHR::null(), |s| s.swapchain),
        )?;
        drop(old);

        if let Some(mut depth) = self.depth.take() {
            depth.destroy(&self.device);
        }
        let depth = DepthBuffer::new(&self.device, extent)?;

        self.free_command_buffers();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(swapchain.images.len() as u32);
        let command_buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?;
        self.record_command_buffers(&swapchain, &depth, &command_buffers)?;
        log::info!("Created {} pre-recorded command buffers", command_buffers.len());

        self.swapchain = Some(swapchain);
        self.depth = Some(depth);
        self.command_buffers = command_buffers;
        Ok(())
    }

    fn free_command_buffers(&mut self) {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.command_buffers.clear();
        }
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    /// Content is static (clear color + depth clear), so record once per
    /// swapchain and resubmit every frame.
    fn record_command_buffers(
        &self,
        swapchain: &Swapchain,
        depth: &DepthBuffer,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let device = &self.device.device;
        let clear_color = vk::ClearColorValue {
            float32: self.config.graphics.clear_color,
        };
        let clear_depth = vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        };

        let color_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let depth_range = DepthBuffer::subresource_range();

        for (&cmd, &image) in command_buffers.iter().zip(&swapchain.images) {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                // UNDEFINED -> TRANSFER_DST for both images; old contents are discarded
                let to_transfer = [
                    layout_barrier(
                        image,
                        color_range,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::empty(),
                        vk::AccessFlags::TRANSFER_WRITE,
                    ),
                    layout_barrier(
                        depth.image,
                        depth_range,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::TRANSFER_WRITE,
                    ),
                ];
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &to_transfer,
                );

                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[color_range],
                );
                device.cmd_clear_depth_stencil_image(
                    cmd,
                    depth.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_depth,
                    &[depth_range],
                );

                // TRANSFER_DST -> PRESENT_SRC
                let to_present = [layout_barrier(
                    image,
                    color_range,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::empty(),
                )];
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &to_present,
                );

                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// One frame, called by the window when its frame is due.
    fn draw(&mut self, window: &mut Window) -> Result<()> {
        let device = Arc::clone(&self.device);
        let Some(swapchain) = self.swapchain.as_ref() else {
            // Nothing to draw into until the first recreation
            window.schedule_resize();
            return window.schedule_frame();
        };
        let sync = &self.frame_sync[self.current_frame];

        // STEP 1: Wait for the previous frame that used this slot
        sync.wait(&device.device, self.config.fence_timeout_ns())?;

        // STEP 2: Acquire next swapchain image
        let (image_index, suboptimal) = match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                // Fence is still signaled; the retry will not block on it
                log::debug!("Swapchain out of date, retrying after resize");
                window.schedule_resize();
                return window.schedule_frame();
            }
        };

        // STEP 3: Submit
        sync.reset(&device.device)?;
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], sync.in_flight_fence)
        }
        .context("vkQueueSubmit failed")?;

        // STEP 4: Present
        let presented = swapchain.present(device.graphics_queue, image_index, &signal_semaphores)?;
        if suboptimal || presented == PresentOutcome::Stale {
            window.schedule_resize();
            window.schedule_frame()?;
        }

        // STEP 5: Advance to next frame slot
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        self.update_fps(window);
        self.apply_reloaded_config(window)?;

        if self.config.graphics.animate {
            window.schedule_frame()?;
        }
        Ok(())
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    fn on_key(&self, window: &mut Window, key: KeyCode) -> Result<()> {
        if Some(key) == self.config.quit_key() {
            log::info!("Quit requested");
            window.exit_main_loop();
        } else if Some(key) == self.config.fullscreen_key() {
            if let Some(native) = window.platform_surface() {
                let fullscreen = !native.is_fullscreen();
                native.set_fullscreen(fullscreen);
                log::info!("{} fullscreen mode", if fullscreen { "Entered" } else { "Exited" });
            }
            window.schedule_resize();
            window.schedule_frame()?;
        }
        Ok(())
    }

    // =========================================================================
    // FPS + HOT RELOAD
    // =========================================================================

    fn update_fps(&mut self, window: &mut Window) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            let fullscreen = window.platform_surface().is_some_and(|s| s.is_fullscreen());
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title,
                fps,
                frame_time * 1000.0,
                if fullscreen { "fullscreen" } else { "windowed" }
            ));

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    /// Graphics changes go through a swapchain rebuild, which re-records the
    /// command buffers with the new clear color and present mode.
    fn apply_reloaded_config(&mut self, window: &mut Window) -> Result<()> {
        let Some(config) = self.watcher.as_ref().and_then(ConfigWatcher::take_reloaded) else {
            return Ok(());
        };

        if config.graphics.max_frames_in_flight != self.config.graphics.max_frames_in_flight {
            log::warn!("max_frames_in_flight changes take effect after a restart");
        }
        if config.window.title != self.config.window.title && !config.debug.show_fps {
            window.set_title(&config.window.title);
        }

        let max_frames_in_flight = self.config.graphics.max_frames_in_flight;
        self.config = config;
        self.config.graphics.max_frames_in_flight = max_frames_in_flight;

        window.schedule_resize();
        window.schedule_frame()
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Release GPU resources. The device must be idle. Safe to call twice.
    fn destroy(&mut self) {
        if self.command_pool == vk::CommandPool::null() {
            return;
        }
        log::info!("Cleaning up Vulkan resources...");

        self.free_command_buffers();
        self.swapchain = None;
        if let Some(mut depth) = self.depth.take() {
            depth.destroy(&self.device);
        }

        unsafe {
            for sync in &self.frame_sync {
                sync.destroy(&self.device.device);
            }
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
        self.frame_sync.clear();
        self.command_pool = vk::CommandPool::null();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.destroy();
    }
}

fn layout_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build()
}
