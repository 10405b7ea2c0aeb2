/// Platform-agnostic input handling
use std::collections::HashSet;

use tracing::{debug, trace};

use crate::config::InputConfig;
use crate::model::{InputState, Store};

/// Platform-independent input events
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    // Keyboard events, keyed by physical code (`KeyW`, `ArrowUp`, ...)
    KeyDown(String),
    KeyUp(String),

    // Virtual joystick displacement, +y is forward
    Joystick { x: f32, y: f32 },
    JoystickReleased,

    // Pointer events for the orbit camera
    PointerDrag { dx: f32, dy: f32 },
    Wheel { delta_y: f32 },

    // Window events
    FocusLost,
    VisibilityChanged { visible: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

impl Direction {
    fn apply(self, state: &mut InputState, pressed: bool) {
        match self {
            Direction::Forward => state.forward = pressed,
            Direction::Backward => state.backward = pressed,
            Direction::Left => state.left = pressed,
            Direction::Right => state.right = pressed,
        }
    }
}

/// Key code to direction mapping
#[derive(Debug, Clone)]
pub struct KeyBindings {
    config: InputConfig,
}

impl KeyBindings {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    pub fn direction(&self, code: &str) -> Option<Direction> {
        let hit = |codes: &[String]| codes.iter().any(|c| c == code);
        if hit(&self.config.forward) {
            Some(Direction::Forward)
        } else if hit(&self.config.backward) {
            Some(Direction::Backward)
        } else if hit(&self.config.left) {
            Some(Direction::Left)
        } else if hit(&self.config.right) {
            Some(Direction::Right)
        } else {
            None
        }
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self::new(InputConfig::default())
    }
}

/// Turns keyboard and joystick events into `InputState` writes.
///
/// Tracks pressed codes so OS key-repeat never produces a second write.
pub struct InputSource {
    bindings: KeyBindings,
    threshold: f32,
    max_range: f32,
    pressed: HashSet<String>,
    store: Store<InputState>,
}

impl InputSource {
    pub fn new(config: InputConfig, store: Store<InputState>) -> Self {
        Self {
            threshold: config.joystick_threshold,
            max_range: config.joystick_max_range,
            bindings: KeyBindings::new(config),
            pressed: HashSet::new(),
            store,
        }
    }

    /// Process an input event and update the store. Pointer events are
    /// ignored here; the orbit camera consumes them.
    pub fn process_event(&mut self, event: &InputEvent) {
        match event {
            InputEvent::KeyDown(code) => {
                if self.pressed.contains(code) {
                    return;
                }
                self.pressed.insert(code.clone());
                if let Some(direction) = self.bindings.direction(code) {
                    trace!(%code, ?direction, "key down");
                    self.store.set_state(|s| direction.apply(s, true));
                }
            }
            InputEvent::KeyUp(code) => {
                self.pressed.remove(code);
                if let Some(direction) = self.bindings.direction(code) {
                    trace!(%code, ?direction, "key up");
                    self.store.set_state(|s| direction.apply(s, false));
                }
            }
            InputEvent::Joystick { x, y } => {
                let state = self.joystick_state(*x, *y);
                self.store.replace(state);
            }
            InputEvent::JoystickReleased => {
                let state = self.keyboard_state();
                self.store.replace(state);
            }
            InputEvent::FocusLost | InputEvent::VisibilityChanged { visible: false } => {
                self.release_all();
            }
            _ => {}
        }
    }

    /// Dead-zone mapping of a joystick displacement, clamped to its range.
    pub fn joystick_state(&self, x: f32, y: f32) -> InputState {
        let x = x.clamp(-self.max_range, self.max_range);
        let y = y.clamp(-self.max_range, self.max_range);
        let t = self.threshold;
        InputState {
            forward: y > t,
            backward: y < -t,
            left: x < -t,
            right: x > t,
        }
    }

    /// State implied by the keys currently held.
    fn keyboard_state(&self) -> InputState {
        let mut state = InputState::default();
        for direction in self.pressed.iter().filter_map(|code| self.bindings.direction(code)) {
            direction.apply(&mut state, true);
        }
        state
    }

    pub fn is_pressed(&self, code: &str) -> bool {
        self.pressed.contains(code)
    }

    pub fn max_range(&self) -> f32 {
        self.max_range
    }

    /// Forget held keys, e.g. when the window loses focus mid-press.
    fn release_all(&mut self) {
        let held = !self.pressed.is_empty() || self.store.get().is_moving();
        self.pressed.clear();
        if held {
            debug!("focus lost, releasing held input");
            self.store.replace(InputState::default());
        }
    }

    pub fn dispose(&mut self) {
        self.pressed.clear();
        self.store.replace(InputState::default());
    }
}

pub mod wasm {
    use super::*;
    use web_sys::{KeyboardEvent, MouseEvent, WheelEvent};

    pub fn keyboard_event_to_input(e: &KeyboardEvent, is_down: bool) -> InputEvent {
        let code = e.code();
        if is_down {
            InputEvent::KeyDown(code)
        } else {
            InputEvent::KeyUp(code)
        }
    }

    pub fn mouse_drag_to_input(e: &MouseEvent) -> Option<InputEvent> {
        // primary button held
        if e.buttons() & 1 == 0 {
            return None;
        }
        Some(InputEvent::PointerDrag {
            dx: e.movement_x() as f32,
            dy: e.movement_y() as f32,
        })
    }

    pub fn wheel_to_input(e: &WheelEvent) -> InputEvent {
        InputEvent::Wheel { delta_y: e.delta_y() as f32 }
    }

    /// Touch offset from where the finger went down. Screen y grows
    /// downward, joystick y grows forward.
    pub fn touch_to_joystick(origin: (f32, f32), current: (f32, f32)) -> InputEvent {
        InputEvent::Joystick {
            x: current.0 - origin.0,
            y: origin.1 - current.1,
        }
    }
}
