//! Keyboard teleoperation.
//!
//! [`KeyboardController`] remembers when each drive key was last pressed and
//! turns the recent presses into a body-frame [`Twist`]:
//!
//! | Key | linear.x (m/s) | linear.y (m/s) | angular.z (rad/s) |
//! | --- | -------------- | -------------- | ----------------- |
//! | W   | +0.5           |                |                   |
//! | S   | −0.5           |                |                   |
//! | A   |                | +0.5           |                   |
//! | D   |                | −0.5           |                   |
//! | Q   |                |                | +0.25             |
//! | E   |                |                | −0.25             |
//!
//! Contributions add, so opposite keys cancel.  Only presses within the last
//! 100 ms count; with no recent press the twist is zero.  Lower-case letters
//! are accepted as well.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use groundtex_types::{Twist, Vec3};
use tracing::trace;

/// How long a single key press keeps contributing to the twist.
pub const PRESS_WINDOW: Duration = Duration::from_millis(100);
pub const LINEAR_SPEED: f64 = 0.5;
pub const ANGULAR_SPEED: f64 = 0.25;

/// Sentinel for "never pressed".
const NEVER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveKey {
    Forward,
    Back,
    Left,
    Right,
    CounterClockwise,
    Clockwise,
}

impl DriveKey {
    const ALL: [DriveKey; 6] = [
        DriveKey::Forward,
        DriveKey::Back,
        DriveKey::Left,
        DriveKey::Right,
        DriveKey::CounterClockwise,
        DriveKey::Clockwise,
    ];

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'W' => Some(DriveKey::Forward),
            'S' => Some(DriveKey::Back),
            'A' => Some(DriveKey::Left),
            'D' => Some(DriveKey::Right),
            'Q' => Some(DriveKey::CounterClockwise),
            'E' => Some(DriveKey::Clockwise),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// `(linear.x, linear.y, angular.z)` contribution.
    fn contribution(self) -> (f64, f64, f64) {
        match self {
            DriveKey::Forward => (LINEAR_SPEED, 0.0, 0.0),
            DriveKey::Back => (-LINEAR_SPEED, 0.0, 0.0),
            DriveKey::Left => (0.0, LINEAR_SPEED, 0.0),
            DriveKey::Right => (0.0, -LINEAR_SPEED, 0.0),
            DriveKey::CounterClockwise => (0.0, 0.0, ANGULAR_SPEED),
            DriveKey::Clockwise => (0.0, 0.0, -ANGULAR_SPEED),
        }
    }
}

/// Turns key presses into velocity commands.
///
/// Press times are stored as atomics, so one thread may register presses
/// while another builds twists.
pub struct KeyboardController {
    epoch: Instant,
    /// Milliseconds since `epoch`, indexed by [`DriveKey::index`].
    pressed_at: [AtomicU64; 6],
}

impl KeyboardController {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            pressed_at: std::array::from_fn(|_| AtomicU64::new(NEVER)),
        }
    }

    /// Record a press of the key with character code `code` (e.g. `'W' as u32`).
    /// Codes that are not drive keys are ignored.
    pub fn register_keypress(&self, code: u32) {
        self.register_keypress_at(code, Instant::now());
    }

    /// Record a press of `key`. Non-drive keys are ignored.
    pub fn register_key(&self, key: char) {
        self.register_keypress(key as u32);
    }

    pub fn register_keypress_at(&self, code: u32, at: Instant) {
        let Some(key) = char::from_u32(code).and_then(DriveKey::from_char) else {
            trace!(code, "ignoring non-drive key");
            return;
        };
        self.pressed_at[key.index()].store(self.millis_since_epoch(at), Ordering::Release);
    }

    /// Velocity command from the keys pressed within [`PRESS_WINDOW`].
    pub fn twist(&self) -> Twist {
        self.twist_at(Instant::now())
    }

    pub fn twist_at(&self, now: Instant) -> Twist {
        let now_ms = self.millis_since_epoch(now);
        let window_ms = PRESS_WINDOW.as_millis() as u64;

        let (mut x, mut y, mut yaw_rate) = (0.0, 0.0, 0.0);
        for key in DriveKey::ALL {
            let pressed = self.pressed_at[key.index()].load(Ordering::Acquire);
            if pressed == NEVER || pressed > now_ms || now_ms - pressed > window_ms {
                continue;
            }
            let (dx, dy, dyaw) = key.contribution();
            x += dx;
            y += dy;
            yaw_rate += dyaw;
        }

        Twist {
            linear: Vec3::new(x, y, 0.0),
            angular: Vec3::new(0.0, 0.0, yaw_rate),
        }
    }

    fn millis_since_epoch(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(twist: Twist, x: f64, y: f64, yaw_rate: f64) {
        assert_eq!(twist.linear, Vec3::new(x, y, 0.0));
        assert_eq!(twist.angular, Vec3::new(0.0, 0.0, yaw_rate));
    }

    #[test]
    fn zero_without_presses() {
        let controller = KeyboardController::new();
        check(controller.twist(), 0.0, 0.0, 0.0);
    }

    #[test]
    fn each_key_drives_its_axis() {
        let cases = [
            ('W', 0.5, 0.0, 0.0),
            ('S', -0.5, 0.0, 0.0),
            ('A', 0.0, 0.5, 0.0),
            ('D', 0.0, -0.5, 0.0),
            ('Q', 0.0, 0.0, 0.25),
            ('E', 0.0, 0.0, -0.25),
        ];
        for (key, x, y, yaw_rate) in cases {
            let controller = KeyboardController::new();
            let now = Instant::now();
            controller.register_keypress_at(key as u32, now);
            check(controller.twist_at(now), x, y, yaw_rate);
        }
    }

    #[test]
    fn lower_case_is_accepted() {
        let controller = KeyboardController::new();
        let now = Instant::now();
        controller.register_keypress_at('w' as u32, now);
        check(controller.twist_at(now), 0.5, 0.0, 0.0);
    }

    #[test]
    fn opposite_keys_cancel() {
        let controller = KeyboardController::new();
        let now = Instant::now();
        for key in ['W', 'S', 'Q', 'E'] {
            controller.register_keypress_at(key as u32, now);
        }
        check(controller.twist_at(now), 0.0, 0.0, 0.0);
    }

    #[test]
    fn combined_keys_add_up() {
        let controller = KeyboardController::new();
        let now = Instant::now();
        for key in ['W', 'A', 'E'] {
            controller.register_keypress_at(key as u32, now);
        }
        check(controller.twist_at(now), 0.5, 0.5, -0.25);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let controller = KeyboardController::new();
        let now = Instant::now();
        for key in ['X', ' ', '1'] {
            controller.register_keypress_at(key as u32, now);
        }
        controller.register_keypress_at(0xD800, now); // not a char
        check(controller.twist_at(now), 0.0, 0.0, 0.0);
    }

    #[test]
    fn press_expires_after_window() {
        let controller = KeyboardController::new();
        let pressed = Instant::now();
        controller.register_keypress_at('W' as u32, pressed);

        check(controller.twist_at(pressed + Duration::from_millis(50)), 0.5, 0.0, 0.0);
        check(controller.twist_at(pressed + PRESS_WINDOW), 0.5, 0.0, 0.0);
        check(controller.twist_at(pressed + Duration::from_millis(150)), 0.0, 0.0, 0.0);
    }

    #[test]
    fn presses_from_another_thread_are_seen() {
        let controller = std::sync::Arc::new(KeyboardController::new());
        let writer = std::sync::Arc::clone(&controller);
        std::thread::spawn(move || writer.register_key('D'))
            .join()
            .unwrap();
        check(controller.twist(), 0.0, -0.5, 0.0);
    }
}
