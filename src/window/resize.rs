// Swapchain resize coordination
//
// Any number of resize requests between two frames collapse into one
// recreation, performed at the start of the next render with the extent
// the surface has *then*, not when the first request came in.

use anyhow::Result;
use ash::vk;

use super::device_link::PresentDevice;
use crate::platform::PlatformSurface;

/// Value of `current_extent` meaning "the window decides".
pub const SENTINEL_EXTENT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub enum ResizeStep {
    /// Swapchain is up to date.
    Current,
    /// Surface is zero-sized right now; try again after the next resize.
    Deferred,
    /// Rebuild the swapchain with these values.
    Recreate {
        capabilities: vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
    },
}

#[derive(Debug, Default)]
pub struct ResizeCoordinator {
    resize_pending: bool,
}

impl ResizeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_resize(&mut self) {
        self.resize_pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.resize_pending
    }

    /// Run before every frame.
    pub fn prepare<S>(&mut self, device: &dyn PresentDevice, surface: &S) -> Result<ResizeStep>
    where
        S: PlatformSurface + ?Sized,
    {
        if !self.resize_pending {
            return Ok(ResizeStep::Current);
        }

        device.wait_idle()?;
        let capabilities = surface.surface_capabilities(device.physical_device())?;
        let extent = resolve_extent(&capabilities, surface.drawable_size());

        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface of window {:?} is zero-sized, deferring swapchain", surface.key());
            return Ok(ResizeStep::Deferred);
        }

        self.resize_pending = false;
        log::info!(
            "Recreating swapchain for window {:?}: {}x{}",
            surface.key(),
            extent.width,
            extent.height
        );
        Ok(ResizeStep::Recreate { capabilities, extent })
    }
}

/// `current_extent` unless it is the sentinel, else the live drawable size
/// clamped to what the surface supports.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != SENTINEL_EXTENT && caps.current_extent.height != SENTINEL_EXTENT {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::WindowKey;
    use std::cell::Cell;

    struct CountingDevice {
        idle_waits: Cell<u32>,
    }

    impl PresentDevice for CountingDevice {
        fn physical_device(&self) -> vk::PhysicalDevice {
            vk::PhysicalDevice::null()
        }

        fn wait_idle(&self) -> Result<()> {
            self.idle_waits.set(self.idle_waits.get() + 1);
            Ok(())
        }
    }

    struct FixedSurface {
        current: Cell<vk::Extent2D>,
        drawable: vk::Extent2D,
    }

    impl PlatformSurface for FixedSurface {
        fn key(&self) -> WindowKey {
            WindowKey(1)
        }
        fn surface(&self) -> vk::SurfaceKHR {
            vk::SurfaceKHR::null()
        }
        fn surface_capabilities(&self, _: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
            Ok(caps(self.current.get()))
        }
        fn drawable_size(&self) -> vk::Extent2D {
            self.drawable
        }
        fn request_repaint(&self) -> Result<()> {
            Ok(())
        }
        fn set_visible(&mut self, _: bool) -> Result<()> {
            Ok(())
        }
        fn set_title(&mut self, _: &str) {}
        fn destroy_surface(&mut self) {}
        fn destroy_native_handle(&mut self) {}
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        }
    }

    fn surface(current: vk::Extent2D) -> FixedSurface {
        FixedSurface {
            current: Cell::new(current),
            drawable: extent(1024, 768),
        }
    }

    fn device() -> CountingDevice {
        CountingDevice { idle_waits: Cell::new(0) }
    }

    #[test]
    fn current_extent_wins_unless_sentinel() {
        assert_eq!(resolve_extent(&caps(extent(800, 600)), extent(10, 10)), extent(800, 600));
        let sentinel = extent(SENTINEL_EXTENT, SENTINEL_EXTENT);
        assert_eq!(resolve_extent(&caps(sentinel), extent(1024, 768)), extent(1024, 768));
    }

    #[test]
    fn sentinel_falls_back_to_clamped_drawable_size() {
        let sentinel = extent(SENTINEL_EXTENT, SENTINEL_EXTENT);
        assert_eq!(resolve_extent(&caps(sentinel), extent(9000, 0)), extent(4096, 1));
    }

    #[test]
    fn nothing_to_do_without_request() {
        let mut coordinator = ResizeCoordinator::new();
        let device = device();
        let step = coordinator.prepare(&device, &surface(extent(800, 600))).unwrap();
        assert!(matches!(step, ResizeStep::Current));
        assert_eq!(device.idle_waits.get(), 0);
    }

    #[test]
    fn repeated_requests_recreate_once_with_latest_extent() {
        let mut coordinator = ResizeCoordinator::new();
        let device = device();
        let surface = surface(extent(800, 600));

        coordinator.schedule_resize();
        surface.current.set(extent(900, 700));
        coordinator.schedule_resize();
        surface.current.set(extent(1000, 800));
        coordinator.schedule_resize();

        match coordinator.prepare(&device, &surface).unwrap() {
            ResizeStep::Recreate { extent: e, .. } => assert_eq!(e, extent(1000, 800)),
            other => panic!("expected recreate, got {:?}", other),
        }
        assert!(matches!(coordinator.prepare(&device, &surface).unwrap(), ResizeStep::Current));
        assert_eq!(device.idle_waits.get(), 1);
    }

    #[test]
    fn zero_extent_defers_and_keeps_request() {
        let mut coordinator = ResizeCoordinator::new();
        let device = device();
        let surface = surface(extent(0, 0));

        coordinator.schedule_resize();
        assert!(matches!(coordinator.prepare(&device, &surface).unwrap(), ResizeStep::Deferred));
        assert!(coordinator.is_pending());

        surface.current.set(extent(320, 240));
        assert!(matches!(
            coordinator.prepare(&device, &surface).unwrap(),
            ResizeStep::Recreate { .. }
        ));
        assert!(!coordinator.is_pending());
    }
}
