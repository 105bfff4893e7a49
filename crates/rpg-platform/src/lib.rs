// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::info;
use winit::{
    dpi::LogicalSize,
    event::{ElementState, KeyEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

pub fn create_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = window.inner_size();
    info!("window created ({}x{})", size.width, size.height);
    Ok(window)
}

/// Polled keyboard state.
///
/// Fed from window events, queried by the game loop once per tick. Edge
/// queries (`just_pressed`) are valid until the next `end_tick`.
#[derive(Debug, Default)]
pub struct KeyboardState {
    down: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
}

impl KeyboardState {
    pub fn handle_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.handle_key(code, event.state);
        }
    }

    pub fn handle_key(&mut self, code: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.down.insert(code) {
                    self.pressed.insert(code);
                }
            }
            ElementState::Released => {
                self.down.remove(&code);
            }
        }
    }

    pub fn is_down(&self, code: KeyCode) -> bool {
        self.down.contains(&code)
    }

    pub fn any_down(&self, codes: &[KeyCode]) -> bool {
        codes.iter().any(|c| self.down.contains(c))
    }

    pub fn just_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    pub fn end_tick(&mut self) {
        self.pressed.clear();
    }

    /// Drops all held keys; used on focus loss so nothing stays stuck.
    pub fn clear(&mut self) {
        self.down.clear();
        self.pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_sets_down_and_edge() {
        let mut keys = KeyboardState::default();
        keys.handle_key(KeyCode::KeyW, ElementState::Pressed);
        assert!(keys.is_down(KeyCode::KeyW));
        assert!(keys.just_pressed(KeyCode::KeyW));

        keys.end_tick();
        assert!(keys.is_down(KeyCode::KeyW));
        assert!(!keys.just_pressed(KeyCode::KeyW));
    }

    #[test]
    fn key_repeat_is_not_a_new_press() {
        let mut keys = KeyboardState::default();
        keys.handle_key(KeyCode::Space, ElementState::Pressed);
        keys.end_tick();
        keys.handle_key(KeyCode::Space, ElementState::Pressed);
        assert!(!keys.just_pressed(KeyCode::Space));
    }

    #[test]
    fn release_and_clear() {
        let mut keys = KeyboardState::default();
        keys.handle_key(KeyCode::KeyA, ElementState::Pressed);
        keys.handle_key(KeyCode::KeyD, ElementState::Pressed);
        keys.handle_key(KeyCode::KeyA, ElementState::Released);
        assert!(!keys.is_down(KeyCode::KeyA));
        assert!(keys.any_down(&[KeyCode::KeyA, KeyCode::KeyD]));

        keys.clear();
        assert!(!keys.any_down(&[KeyCode::KeyA, KeyCode::KeyD]));
    }
}
