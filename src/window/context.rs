// Process-wide windowing context
//
// Owns the platform backend and the pending-window registry. Windows keep a
// shared handle to the registry and exit flag; the loop and every callback
// run on the thread that owns the context.

use anyhow::Result;
use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::rc::Rc;

use super::registry::PendingRegistry;
use super::VulkanWindow;
use crate::error::WindowError;
use crate::platform::{Platform, PlatformEvent, PumpMode, PumpStatus, WindowKey, WinitBackendKind, WinitPlatform};

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) registry: RefCell<PendingRegistry>,
    pub(crate) exit_requested: Cell<bool>,
    pub(crate) live_windows: Cell<usize>,
}

pub struct Context<P: Platform> {
    pub(crate) platform: P,
    pub(crate) shared: Rc<Shared>,
    finalized: bool,
}

impl Context<WinitPlatform> {
    /// Platform layer with process defaults.
    pub fn init() -> Result<Self> {
        Ok(Self::with_platform(WinitPlatform::new()?))
    }

    /// Bootstrap from command-line arguments. Understands `--backend <name>`
    /// and `--backend=<name>`; everything else is left to the application.
    pub fn init_from_args<I, A>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        let mut kind = WinitBackendKind::Auto;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let value = if arg == "--backend" {
                args.next().map(|v| v.as_ref().to_owned())
            } else {
                arg.strip_prefix("--backend=").map(str::to_owned)
            };
            if let Some(value) = value {
                kind = value.parse().map_err(anyhow::Error::msg)?;
            }
        }
        Ok(Self::with_platform(WinitPlatform::with_backend(kind)?))
    }
}

impl<P: Platform> Context<P> {
    /// Adopt an already connected backend.
    pub fn with_platform(platform: P) -> Self {
        Self {
            platform,
            shared: Rc::new(Shared::default()),
            finalized: false,
        }
    }

    /// Instance extensions to enable before creating windows.
    pub fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        self.ensure_initialized()?;
        self.platform.required_extensions()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Windows with a frame queued, in render order.
    pub fn pending_windows(&self) -> Vec<WindowKey> {
        self.shared.registry.borrow().snapshot()
    }

    pub fn exit_main_loop(&self) {
        self.shared.exit_requested.set(true);
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.finalized {
            return Err(WindowError::PlatformNotInitialized.into());
        }
        Ok(())
    }

    /// Pump events and render pending windows until `exit_main_loop`.
    ///
    /// Blocks in the platform wait whenever none of `windows` has a frame
    /// queued, so a window stuck at zero size costs nothing.
    pub fn main_loop(&mut self, windows: &mut [&mut VulkanWindow<P::Surface>]) -> Result<()> {
        self.ensure_initialized()?;
        self.shared.exit_requested.set(false);
        log::info!("Entering main loop with {} window(s)", windows.len());

        while !self.shared.exit_requested.get() {
            let mode = if self.has_pending_frame(windows) {
                PumpMode::Poll
            } else {
                PumpMode::Wait
            };

            let mut queued: Vec<(WindowKey, PlatformEvent)> = Vec::new();
            let status = self
                .platform
                .pump_events(mode, &mut |key, event| queued.push((key, event)))?;

            for (key, event) in queued {
                if let Some(window) = find_window(windows, key) {
                    window.handle_event(event)?;
                }
            }

            if status == PumpStatus::Exit {
                break;
            }

            // Every pending window gets exactly one frame per iteration
            let pending = self.shared.registry.borrow().snapshot();
            for key in pending {
                if self.shared.exit_requested.get() {
                    break;
                }
                if let Some(window) = find_window(windows, key) {
                    window.deliver_frame()?;
                }
            }
        }

        log::info!("Left main loop");
        Ok(())
    }

    fn has_pending_frame(&self, windows: &[&mut VulkanWindow<P::Surface>]) -> bool {
        let registry = self.shared.registry.borrow();
        windows
            .iter()
            .filter_map(|w| w.key())
            .any(|key| registry.contains(key))
    }

    /// Tear down the platform layer. Idempotent and infallible; all windows
    /// must be destroyed first.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        let live = self.shared.live_windows.get();
        if !std::thread::panicking() {
            debug_assert_eq!(live, 0, "finalize called with {} window(s) still alive", live);
        }
        if live != 0 {
            log::warn!("Finalizing platform with {} live window(s)", live);
        }
        self.shared.registry.borrow_mut().clear();
        self.platform.finalize();
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl<P: Platform> Drop for Context<P> {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn find_window<'w, S>(
    windows: &'w mut [&mut VulkanWindow<S>],
    key: WindowKey,
) -> Option<&'w mut VulkanWindow<S>>
where
    S: crate::platform::PlatformSurface,
{
    windows
        .iter_mut()
        .find(|w| w.key() == Some(key))
        .map(|w| &mut **w)
}
