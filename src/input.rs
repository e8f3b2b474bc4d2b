//! Backend-independent input values.
//!
//! Every backend converts its native events into these types before they
//! reach user callbacks: positions are physical pixels relative to the
//! window's top-left corner, scan codes are the raw hardware codes.

use bitflags::bitflags;
use glam::Vec2;

bitflags! {
    /// Mouse buttons currently held down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct MouseButtons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const MIDDLE = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

bitflags! {
    /// Keyboard modifiers active when the event was generated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const META = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

impl MouseButton {
    /// Bit in [`MouseButtons`]; buttons without one are not tracked.
    pub fn flag(self) -> MouseButtons {
        match self {
            MouseButton::Left => MouseButtons::LEFT,
            MouseButton::Right => MouseButtons::RIGHT,
            MouseButton::Middle => MouseButtons::MIDDLE,
            MouseButton::Back => MouseButtons::BACK,
            MouseButton::Forward => MouseButtons::FORWARD,
            MouseButton::Other(_) => MouseButtons::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Pressed,
    Repeated,
    Released,
}

/// Raw hardware scan code. Zero when the platform does not report one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScanCode(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    Normal,
    Minimized,
    Maximized,
    Fullscreen,
}

/// Mouse snapshot attached to every mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseState {
    pub position: Vec2,
    /// Movement since the previous mouse event of the same window.
    pub delta: Vec2,
    pub buttons: MouseButtons,
    pub modifiers: Modifiers,
}

impl MouseState {
    /// Next snapshot after the cursor moved to `position`.
    pub fn moved_to(&self, position: Vec2) -> Self {
        Self {
            position,
            delta: position - self.position,
            ..*self
        }
    }

    /// Next snapshot after `button` changed; the delta resets.
    pub fn with_button(&self, button: MouseButton, state: ButtonState) -> Self {
        let mut buttons = self.buttons;
        buttons.set(button.flag(), state == ButtonState::Pressed);
        Self {
            buttons,
            delta: Vec2::ZERO,
            ..*self
        }
    }
}

/// Logical key, when the backend can identify one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Digit0, Digit1, Digit2, Digit3, Digit4,
    Digit5, Digit6, Digit7, Digit8, Digit9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    ShiftLeft, ShiftRight, ControlLeft, ControlRight,
    AltLeft, AltRight, SuperLeft, SuperRight,
    ArrowUp, ArrowDown, ArrowLeft, ArrowRight,
    Space, Enter, Escape, Tab, Backspace, Delete, Insert,
    Home, End, PageUp, PageDown,
}

impl KeyCode {
    /// Parse a key name as written in config files ("F11", "Escape", "q").
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let key = match upper.as_str() {
            "ESC" | "ESCAPE" => KeyCode::Escape,
            "ENTER" | "RETURN" => KeyCode::Enter,
            "SPACE" => KeyCode::Space,
            "TAB" => KeyCode::Tab,
            "BACKSPACE" => KeyCode::Backspace,
            "DELETE" => KeyCode::Delete,
            "INSERT" => KeyCode::Insert,
            "HOME" => KeyCode::Home,
            "END" => KeyCode::End,
            "PAGEUP" => KeyCode::PageUp,
            "PAGEDOWN" => KeyCode::PageDown,
            "UP" => KeyCode::ArrowUp,
            "DOWN" => KeyCode::ArrowDown,
            "LEFT" => KeyCode::ArrowLeft,
            "RIGHT" => KeyCode::ArrowRight,
            "F1" => KeyCode::F1,
            "F2" => KeyCode::F2,
            "F3" => KeyCode::F3,
            "F4" => KeyCode::F4,
            "F5" => KeyCode::F5,
            "F6" => KeyCode::F6,
            "F7" => KeyCode::F7,
            "F8" => KeyCode::F8,
            "F9" => KeyCode::F9,
            "F10" => KeyCode::F10,
            "F11" => KeyCode::F11,
            "F12" => KeyCode::F12,
            s if s.len() == 1 => return Self::from_char(s.chars().next()?),
            _ => return None,
        };
        Some(key)
    }

    fn from_char(c: char) -> Option<Self> {
        const LETTERS: [KeyCode; 26] = [
            KeyCode::A, KeyCode::B, KeyCode::C, KeyCode::D, KeyCode::E, KeyCode::F,
            KeyCode::G, KeyCode::H, KeyCode::I, KeyCode::J, KeyCode::K, KeyCode::L,
            KeyCode::M, KeyCode::N, KeyCode::O, KeyCode::P, KeyCode::Q, KeyCode::R,
            KeyCode::S, KeyCode::T, KeyCode::U, KeyCode::V, KeyCode::W, KeyCode::X,
            KeyCode::Y, KeyCode::Z,
        ];
        const DIGITS: [KeyCode; 10] = [
            KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3,
            KeyCode::Digit4, KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7,
            KeyCode::Digit8, KeyCode::Digit9,
        ];
        match c {
            'A'..='Z' => Some(LETTERS[(c as u8 - b'A') as usize]),
            '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
            _ => None,
        }
    }
}
