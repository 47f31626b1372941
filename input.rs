//! Driver input: keyboard adapter binding and on-screen directional buttons.

use std::cell::RefCell;
use std::rc::Rc;

use minifb::{Key, Window};

use crate::engine::EngineError;

/// Directional buttons supplied by an on-screen control layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectionalInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub boost: bool,
}

impl InputState {
    /// Logical OR with the on-screen buttons.
    pub fn merged(self, touch: DirectionalInput) -> Self {
        Self {
            up: self.up || touch.up,
            down: self.down || touch.down,
            left: self.left || touch.left,
            right: self.right || touch.right,
            boost: self.boost,
        }
    }
}

#[derive(Debug, Default)]
struct KeyboardSlot {
    bound: bool,
    keys: InputState,
}

/// Engine-side end of the keyboard binding.
#[derive(Debug, Default)]
pub struct InputHub {
    keyboard: Rc<RefCell<KeyboardSlot>>,
    touch: DirectionalInput,
}

impl InputHub {
    /// Binds the single keyboard adapter. A second bind fails until the first
    /// adapter is dropped.
    pub fn bind(&self) -> Result<KeyboardAdapter, EngineError> {
        let mut slot = self.keyboard.borrow_mut();
        if slot.bound {
            return Err(EngineError::AdapterAlreadyBound);
        }
        slot.bound = true;
        slot.keys = InputState::default();
        tracing::debug!("Keyboard adapter bound");
        Ok(KeyboardAdapter {
            slot: Rc::clone(&self.keyboard),
        })
    }

    pub fn set_touch(&mut self, touch: DirectionalInput) {
        self.touch = touch;
    }

    /// Keyboard and touch input combined.
    pub fn current(&self) -> InputState {
        self.keyboard.borrow().keys.merged(self.touch)
    }

    pub fn is_bound(&self) -> bool {
        self.keyboard.borrow().bound
    }

    /// Forgets held keys and buttons and detaches the adapter; later adapter
    /// writes are ignored.
    pub fn release(&mut self) {
        let mut slot = self.keyboard.borrow_mut();
        slot.bound = false;
        slot.keys = InputState::default();
        self.touch = DirectionalInput::default();
        // a fresh slot keeps a stale adapter from reaching this hub
        drop(slot);
        self.keyboard = Rc::new(RefCell::new(KeyboardSlot::default()));
    }
}

/// Feeds key state into an engine. Dropping it releases the binding.
pub struct KeyboardAdapter {
    slot: Rc<RefCell<KeyboardSlot>>,
}

impl KeyboardAdapter {
    pub fn set(&self, keys: InputState) {
        let mut slot = self.slot.borrow_mut();
        if slot.bound {
            slot.keys = keys;
        }
    }

    /// Arrows or WASD steer and drive, Q fires the boost.
    pub fn poll_window(&self, window: &Window) {
        self.set(InputState {
            up: window.is_key_down(Key::Up) || window.is_key_down(Key::W),
            down: window.is_key_down(Key::Down) || window.is_key_down(Key::S),
            left: window.is_key_down(Key::Left) || window.is_key_down(Key::A),
            right: window.is_key_down(Key::Right) || window.is_key_down(Key::D),
            boost: window.is_key_down(Key::Q),
        });
    }
}

impl Drop for KeyboardAdapter {
    fn drop(&mut self) {
        let mut slot = self.slot.borrow_mut();
        slot.bound = false;
        slot.keys = InputState::default();
    }
}
