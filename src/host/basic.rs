use std::collections::HashMap;

use smithay::backend::input::KeyState;
use smithay::input::keyboard::{Keysym, ModifiersState};
use smithay::utils::{Physical, Point, Rectangle};
use tracing::{debug, info};

use super::{ActivityState, CompositorHost, OutputDescriptor, OutputId};
use crate::keybindings::{KeyAction, KeyBinding, KeyBindings};

/// A minimal compositor core: tracks registered outputs, accumulated damage,
/// activity and focus, and the key binding table.
///
/// Outputs are all placed at the origin, so one damage region covers them.
#[derive(Debug)]
pub struct BasicHost {
    outputs: Vec<OutputDescriptor>,
    damage: Vec<Rectangle<i32, Physical>>,
    activity: ActivityState,
    focused: bool,
    key_bindings: KeyBindings,
    last_frame: HashMap<OutputId, u32>,
    shut_down: bool,
}

impl Default for BasicHost {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicHost {
    pub fn new() -> Self {
        Self {
            outputs: Vec::new(),
            damage: Vec::new(),
            activity: ActivityState::Active,
            focused: false,
            key_bindings: KeyBindings::default(),
            last_frame: HashMap::new(),
            shut_down: false,
        }
    }

    pub fn outputs(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    pub fn damage(&self) -> &[Rectangle<i32, Physical>] {
        &self.damage
    }

    pub fn has_damage(&self) -> bool {
        !self.damage.is_empty()
    }

    pub fn add_damage(&mut self, rect: Rectangle<i32, Physical>) {
        if rect.size.w > 0 && rect.size.h > 0 {
            self.damage.push(rect);
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn key_bindings(&self) -> &KeyBindings {
        &self.key_bindings
    }

    /// Run a key event through the binding table. Nothing triggers while the
    /// host is unfocused.
    pub fn process_key(
        &self,
        modifiers: &ModifiersState,
        raw_keysym: Keysym,
        state: KeyState,
    ) -> Option<KeyAction> {
        if !self.focused {
            return None;
        }
        self.key_bindings.process(modifiers, raw_keysym, state)
    }

    pub fn frame_finished(&mut self, output: OutputId, time_msec: u32) {
        if !self.outputs.iter().any(|o| o.id == output) {
            debug!(%output, "Frame finished for an output that is gone");
            return;
        }
        self.last_frame.insert(output, time_msec);
    }

    /// Wall-clock time of the last completed frame on `output`.
    pub fn last_frame(&self, output: OutputId) -> Option<u32> {
        self.last_frame.get(&output).copied()
    }
}

impl CompositorHost for BasicHost {
    fn register_output(&mut self, output: &OutputDescriptor) {
        info!(output = %output.id, device = %output.device.display(), "Output registered");
        self.outputs.push(output.clone());
        self.add_damage(Rectangle::new(Point::from((0, 0)), output.logical_size));
    }

    fn unregister_output(&mut self, output: OutputId) {
        info!(%output, "Output unregistered");
        self.outputs.retain(|o| o.id != output);
        self.last_frame.remove(&output);
    }

    fn subtract_damage(&mut self, damage: &[Rectangle<i32, Physical>]) {
        self.damage =
            Rectangle::subtract_rects_many_in_place(std::mem::take(&mut self.damage), damage.iter().copied());
    }

    fn damage_all(&mut self) {
        self.damage = self
            .outputs
            .iter()
            .map(|o| Rectangle::new(Point::from((0, 0)), o.logical_size))
            .collect();
    }

    fn enter_offscreen(&mut self) {
        debug!("Host going offscreen");
        self.activity = ActivityState::Offscreen;
    }

    fn activity(&self) -> ActivityState {
        self.activity
    }

    fn set_activity(&mut self, state: ActivityState) {
        self.activity = state;
    }

    fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
    }

    fn add_key_binding(&mut self, binding: KeyBinding) {
        self.key_bindings.add(binding);
    }

    fn shutdown(&mut self) {
        info!("Shutting down compositor core");
        self.outputs.clear();
        self.damage.clear();
        self.key_bindings.clear();
        self.last_frame.clear();
        self.shut_down = true;
    }
}
