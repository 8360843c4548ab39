//! Keyboard and game controller mapping.

use sdl2::controller::{Axis, Button};
use sdl2::keyboard::Keycode;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Abstract navigation action shared by every input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nav {
    Up,
    Down,
    Left,
    Right,
    Activate,
    Back,
    PrevTab,
    NextTab,
    PanUp,
    PanDown,
    PanLeft,
    PanRight,
}

impl Nav {
    pub fn is_pan(self) -> bool {
        matches!(self, Nav::PanUp | Nav::PanDown | Nav::PanLeft | Nav::PanRight)
    }
}

/// A stick counts as pushed beyond half of its travel.
pub const AXIS_THRESHOLD: i16 = 16384;

pub fn key_to_nav(key: Keycode) -> Option<Nav> {
    match key {
        Keycode::Escape => Some(Nav::Back),
        Keycode::Up | Keycode::Kp8 => Some(Nav::Up),
        Keycode::Down | Keycode::Kp2 => Some(Nav::Down),
        Keycode::Left | Keycode::Kp4 => Some(Nav::Left),
        Keycode::Right | Keycode::Kp6 => Some(Nav::Right),
        Keycode::Return | Keycode::KpEnter | Keycode::Space => Some(Nav::Activate),
        Keycode::PageUp => Some(Nav::PrevTab),
        Keycode::PageDown => Some(Nav::NextTab),
        _ => None,
    }
}

pub fn button_to_nav(button: Button) -> Option<Nav> {
    match button {
        Button::A => Some(Nav::Activate),
        Button::B | Button::Start | Button::Back => Some(Nav::Back),
        Button::DPadUp => Some(Nav::Up),
        Button::DPadDown => Some(Nav::Down),
        Button::DPadLeft => Some(Nav::Left),
        Button::DPadRight => Some(Nav::Right),
        Button::LeftShoulder => Some(Nav::PrevTab),
        Button::RightShoulder => Some(Nav::NextTab),
        _ => None,
    }
}

fn axis_nav(axis: Axis, dir: i8) -> Option<Nav> {
    match (axis, dir) {
        (Axis::LeftX, -1) => Some(Nav::Left),
        (Axis::LeftX, 1) => Some(Nav::Right),
        (Axis::LeftY, -1) => Some(Nav::Up),
        (Axis::LeftY, 1) => Some(Nav::Down),
        (Axis::RightX, -1) => Some(Nav::PanLeft),
        (Axis::RightX, 1) => Some(Nav::PanRight),
        (Axis::RightY, -1) => Some(Nav::PanUp),
        (Axis::RightY, 1) => Some(Nav::PanDown),
        _ => None,
    }
}

/// Turns raw stick positions into edge-triggered navigation.
#[derive(Debug, Default)]
pub struct AxisTracker {
    state: HashMap<(u32, Axis), i8>,
}

impl AxisTracker {
    /// Returns the action to fire when the axis leaves the neutral zone or
    /// flips to the other side.
    pub fn update(&mut self, which: u32, axis: Axis, value: i16) -> Option<Nav> {
        let dir: i8 = if value > AXIS_THRESHOLD {
            1
        } else if value < -AXIS_THRESHOLD {
            -1
        } else {
            0
        };
        let prev = self.state.insert((which, axis), dir).unwrap_or(0);
        if dir != 0 && dir != prev {
            axis_nav(axis, dir)
        } else {
            None
        }
    }

    /// Actions whose axis is currently held away from neutral.
    pub fn held(&self) -> Vec<Nav> {
        self.state
            .iter()
            .filter_map(|((_, axis), dir)| axis_nav(*axis, *dir))
            .collect()
    }

    /// Forget a disconnected controller.
    pub fn remove(&mut self, which: u32) {
        self.state.retain(|(w, _), _| *w != which);
    }
}

/// Fires held actions at a per-action rate.
#[derive(Debug, Default)]
pub struct Repeater {
    last: HashMap<Nav, Instant>,
}

impl Repeater {
    pub fn due(&mut self, nav: Nav, interval: Duration, now: Instant) -> bool {
        match self.last.get(&nav) {
            Some(t) if now.saturating_duration_since(*t) < interval => false,
            _ => {
                self.last.insert(nav, now);
                true
            }
        }
    }

    /// Start counting from `now` so a press and its first repeat do not
    /// fire together.
    pub fn arm(&mut self, nav: Nav, now: Instant) {
        self.last.insert(nav, now);
    }

    pub fn release(&mut self, nav: Nav) {
        self.last.remove(&nav);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keyboard_mapping() {
        assert_eq!(key_to_nav(Keycode::Escape), Some(Nav::Back));
        assert_eq!(key_to_nav(Keycode::Kp8), Some(Nav::Up));
        assert_eq!(key_to_nav(Keycode::KpEnter), Some(Nav::Activate));
        assert_eq!(key_to_nav(Keycode::Space), Some(Nav::Activate));
        assert_eq!(key_to_nav(Keycode::PageDown), Some(Nav::NextTab));
        assert_eq!(key_to_nav(Keycode::F1), None);
    }

    #[test]
    fn controller_buttons() {
        assert_eq!(button_to_nav(Button::A), Some(Nav::Activate));
        for b in [Button::B, Button::Start, Button::Back] {
            assert_eq!(button_to_nav(b), Some(Nav::Back));
        }
        assert_eq!(button_to_nav(Button::DPadLeft), Some(Nav::Left));
        assert_eq!(button_to_nav(Button::RightShoulder), Some(Nav::NextTab));
        assert_eq!(button_to_nav(Button::Guide), None);
    }

    #[test]
    fn axes_fire_on_edges_only() {
        let mut t = AxisTracker::default();
        assert_eq!(t.update(0, Axis::LeftY, 8000), None);
        assert_eq!(t.update(0, Axis::LeftY, 30000), Some(Nav::Down));
        assert_eq!(t.update(0, Axis::LeftY, 32000), None);
        assert_eq!(t.held(), vec![Nav::Down]);
        assert_eq!(t.update(0, Axis::LeftY, -30000), Some(Nav::Up));
        assert_eq!(t.update(0, Axis::LeftY, 0), None);
        assert_eq!(t.update(0, Axis::LeftY, -30000), Some(Nav::Up));
        // another pad has its own state
        assert_eq!(t.update(1, Axis::RightX, 20000), Some(Nav::PanRight));
        assert_eq!(t.update(0, Axis::TriggerLeft, 32000), None);
        t.remove(0);
        assert_eq!(t.held(), vec![Nav::PanRight]);
    }

    #[test]
    fn repeater_spaces_actions() {
        let mut r = Repeater::default();
        let t0 = Instant::now();
        let iv = Duration::from_millis(100);
        r.arm(Nav::PanLeft, t0);
        assert!(!r.due(Nav::PanLeft, iv, t0 + Duration::from_millis(50)));
        assert!(r.due(Nav::PanLeft, iv, t0 + Duration::from_millis(100)));
        assert!(!r.due(Nav::PanLeft, iv, t0 + Duration::from_millis(150)));
        assert!(r.due(Nav::Up, iv, t0));
        r.release(Nav::PanLeft);
        assert!(r.due(Nav::PanLeft, iv, t0 + Duration::from_millis(151)));
    }
}
