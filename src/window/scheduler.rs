// Frame scheduler - per-window "is a frame queued" state machine
//
// STATES:
// ┌────────────┐ schedule ┌─────────┐ begin_render ┌──────────────────┐
// │ NotPending │ ───────> │ Pending │ ───────────> │ TentativePending │
// └────────────┘          └─────────┘ <─────────── └──────────────────┘
//       ^                              schedule            │
//       └───────────────────── end_render ─────────────────┘
//
// TentativePending only exists while the frame callback runs. It makes
// "did anybody ask for another frame during this render" observable once
// the callback has returned. Collapsing it into a bool reintroduces either
// endless repaint requests or dropped animation frames.

use super::registry::PendingRegistry;
use crate::platform::WindowKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePendingState {
    #[default]
    NotPending,
    Pending,
    TentativePending,
}

impl FramePendingState {
    /// Registered windows are exactly the ones in one of these states.
    pub fn is_registered(self) -> bool {
        !matches!(self, FramePendingState::NotPending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// `schedule_frame()` from anywhere, including the frame callback.
    Schedule,
    /// Right before the frame callback is invoked.
    BeginRender,
    /// Right after the frame callback returned (or failed).
    EndRender,
    /// `hide()`, minimize, destroy.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOp {
    Keep,
    Insert,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: FramePendingState,
    pub registry: RegistryOp,
    /// Ask the backend to wake the loop with a repaint/expose notification.
    pub request_repaint: bool,
}

impl Transition {
    const fn to(next: FramePendingState, registry: RegistryOp, request_repaint: bool) -> Self {
        Self { next, registry, request_repaint }
    }
}

/// Transition table.
pub fn transition(state: FramePendingState, event: FrameEvent) -> Transition {
    use FrameEvent::*;
    use FramePendingState::*;
    use RegistryOp::*;

    match (state, event) {
        (NotPending, Schedule) => Transition::to(Pending, Insert, true),
        (Pending, Schedule) => Transition::to(Pending, Keep, false),
        (TentativePending, Schedule) => Transition::to(Pending, Keep, true),

        (Pending, BeginRender) => Transition::to(TentativePending, Keep, false),
        (NotPending, BeginRender) => Transition::to(NotPending, Keep, false),
        (TentativePending, BeginRender) => Transition::to(TentativePending, Keep, false),

        (TentativePending, EndRender) => Transition::to(NotPending, Remove, false),
        // Re-armed by the callback
        (Pending, EndRender) => Transition::to(Pending, Keep, false),
        // Cancelled by the callback
        (NotPending, EndRender) => Transition::to(NotPending, Keep, false),

        (NotPending, Cancel) => Transition::to(NotPending, Keep, false),
        (Pending | TentativePending, Cancel) => Transition::to(NotPending, Remove, false),
    }
}

/// Applies [`transition`] to one window and keeps the registry in step.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    state: FramePendingState,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FramePendingState {
        self.state
    }

    /// Returns true when the caller must ask the backend for a repaint.
    pub fn schedule(&mut self, key: WindowKey, registry: &mut PendingRegistry) -> bool {
        self.apply(FrameEvent::Schedule, key, registry)
    }

    /// Returns true if a frame was actually pending and the callback should run.
    pub fn begin_render(&mut self, key: WindowKey, registry: &mut PendingRegistry) -> bool {
        let was_pending = self.state == FramePendingState::Pending;
        self.apply(FrameEvent::BeginRender, key, registry);
        was_pending
    }

    /// Returns true if the callback re-armed the window.
    pub fn end_render(&mut self, key: WindowKey, registry: &mut PendingRegistry) -> bool {
        self.apply(FrameEvent::EndRender, key, registry);
        self.state == FramePendingState::Pending
    }

    pub fn cancel(&mut self, key: WindowKey, registry: &mut PendingRegistry) {
        self.apply(FrameEvent::Cancel, key, registry);
    }

    fn apply(&mut self, event: FrameEvent, key: WindowKey, registry: &mut PendingRegistry) -> bool {
        let t = transition(self.state, event);
        match t.registry {
            RegistryOp::Insert => {
                registry.insert(key);
            }
            RegistryOp::Remove => {
                registry.remove(key);
            }
            RegistryOp::Keep => {}
        }
        if t.next != self.state {
            log::debug!("window {:?}: {:?} -> {:?} ({:?})", key, self.state, t.next, event);
        }
        self.state = t.next;
        debug_assert_eq!(registry.contains(key), self.state.is_registered());
        t.request_repaint
    }
}
