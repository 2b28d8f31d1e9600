use smithay::{
    backend::input::KeyState,
    input::keyboard::{keysyms, Keysym, ModifiersState},
};
use tracing::debug;
use xkbcommon::xkb;

use crate::error::{FbdevError, FbdevResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Quit the compositor
    Quit,
    /// Switch to a VT
    VtSwitch(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: Keysym,
    pub modifiers: ModifiersState,
    pub action: KeyAction,
}

/// Ctrl+Alt held, nothing else.
pub fn ctrl_alt() -> ModifiersState {
    ModifiersState {
        ctrl: true,
        alt: true,
        ..ModifiersState::default()
    }
}

/// Ctrl+Alt+F1..F8 switching to VT 1..8.
pub fn vt_switch_bindings() -> impl Iterator<Item = KeyBinding> {
    (1..=8u32).map(|vt| KeyBinding {
        key: Keysym::from(keysyms::KEY_F1 + vt - 1),
        modifiers: ctrl_alt(),
        action: KeyAction::VtSwitch(vt as i32),
    })
}

fn modifiers_match(current: &ModifiersState, required: &ModifiersState) -> bool {
    current.ctrl == required.ctrl
        && current.alt == required.alt
        && current.shift == required.shift
        && current.logo == required.logo
}

#[derive(Debug, Default)]
pub struct KeyBindings {
    bindings: Vec<KeyBinding>,
}

impl KeyBindings {
    pub fn add(&mut self, binding: KeyBinding) {
        self.bindings.push(binding);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Match a key press against the table. `raw_keysym` is the keysym of the
    /// key without any modifier applied, so Ctrl+Alt+F1 is still `F1`.
    pub fn process(
        &self,
        modifiers: &ModifiersState,
        raw_keysym: Keysym,
        state: KeyState,
    ) -> Option<KeyAction> {
        if state != KeyState::Pressed {
            return None;
        }

        let action = self
            .bindings
            .iter()
            .find(|binding| binding.key == raw_keysym && modifiers_match(modifiers, &binding.modifiers))
            .map(|binding| binding.action);
        if let Some(action) = action {
            debug!(
                keysym = xkb::keysym_get_name(raw_keysym),
                ?modifiers,
                ?action,
                "Key binding triggered"
            );
        }
        action
    }
}

/// Keyboard state for a seat: the default xkb keymap and the modifiers it
/// derives from the keys held down.
pub struct XkbKeyboard {
    state: xkb::State,
}

impl std::fmt::Debug for XkbKeyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XkbKeyboard")
            .field("modifiers", &self.modifiers())
            .finish_non_exhaustive()
    }
}

impl XkbKeyboard {
    /// Compile the keymap named by the `XKB_DEFAULT_*` environment, or the
    /// system default.
    pub fn new() -> FbdevResult<Self> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            "",
            "",
            "",
            "",
            None,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| FbdevError::Backend("Failed to compile the default xkb keymap".into()))?;

        Ok(Self {
            state: xkb::State::new(&keymap),
        })
    }

    pub fn modifiers(&self) -> ModifiersState {
        let active = |name: &str| self.state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE);
        ModifiersState {
            ctrl: active(xkb::MOD_NAME_CTRL),
            alt: active(xkb::MOD_NAME_ALT),
            shift: active(xkb::MOD_NAME_SHIFT),
            caps_lock: active(xkb::MOD_NAME_CAPS),
            logo: active(xkb::MOD_NAME_LOGO),
            num_lock: active(xkb::MOD_NAME_NUM),
            ..ModifiersState::default()
        }
    }

    /// Feed a key event. Returns the modifiers in effect afterwards and the
    /// key's unmodified keysym.
    pub fn input(&mut self, keycode: xkb::Keycode, state: KeyState) -> (ModifiersState, Option<Keysym>) {
        let direction = match state {
            KeyState::Pressed => xkb::KeyDirection::Down,
            KeyState::Released => xkb::KeyDirection::Up,
        };
        self.state.update_key(keycode, direction);

        let layout = self.state.key_get_layout(keycode);
        let raw = self
            .state
            .get_keymap()
            .key_get_syms_by_level(keycode, layout, 0)
            .first()
            .copied();
        (self.modifiers(), raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vt_table() -> KeyBindings {
        let mut bindings = KeyBindings::default();
        vt_switch_bindings().for_each(|b| bindings.add(b));
        bindings
    }

    fn f(n: u32) -> Keysym {
        Keysym::from(keysyms::KEY_F1 + n - 1)
    }

    #[test]
    fn registers_eight_vt_bindings() {
        let bindings: Vec<_> = vt_switch_bindings().collect();
        assert_eq!(bindings.len(), 8);
        assert_eq!(bindings[0].key, f(1));
        assert_eq!(bindings[0].action, KeyAction::VtSwitch(1));
        assert_eq!(bindings[7].key, f(8));
        assert_eq!(bindings[7].action, KeyAction::VtSwitch(8));
    }

    #[test]
    fn ctrl_alt_function_key_switches_vt() {
        let bindings = vt_table();
        assert_eq!(
            bindings.process(&ctrl_alt(), f(3), KeyState::Pressed),
            Some(KeyAction::VtSwitch(3))
        );
        // release does not trigger again
        assert_eq!(bindings.process(&ctrl_alt(), f(3), KeyState::Released), None);
    }

    #[test]
    fn modifiers_must_match_exactly() {
        let bindings = vt_table();
        let ctrl = ModifiersState {
            ctrl: true,
            ..ModifiersState::default()
        };
        assert_eq!(bindings.process(&ctrl, f(1), KeyState::Pressed), None);

        let with_shift = ModifiersState {
            shift: true,
            ..ctrl_alt()
        };
        assert_eq!(bindings.process(&with_shift, f(1), KeyState::Pressed), None);
    }

    #[test]
    fn lock_modifiers_are_ignored() {
        let bindings = vt_table();
        let locked = ModifiersState {
            caps_lock: true,
            num_lock: true,
            ..ctrl_alt()
        };
        assert_eq!(
            bindings.process(&locked, f(2), KeyState::Pressed),
            Some(KeyAction::VtSwitch(2))
        );
    }

    #[test]
    fn xkb_keyboard_tracks_held_modifiers() {
        // needs xkeyboard-config on the machine
        let Ok(mut keyboard) = XkbKeyboard::new() else {
            return;
        };
        // evdev codes offset by 8
        let ctrl = xkb::Keycode::new(29 + 8);
        let alt = xkb::Keycode::new(56 + 8);
        let f3 = xkb::Keycode::new(61 + 8);

        keyboard.input(ctrl, KeyState::Pressed);
        keyboard.input(alt, KeyState::Pressed);
        let (modifiers, raw) = keyboard.input(f3, KeyState::Pressed);
        assert!(modifiers.ctrl && modifiers.alt);
        assert_eq!(raw, Some(f(3)));
        assert_eq!(
            vt_table().process(&modifiers, f(3), KeyState::Pressed),
            Some(KeyAction::VtSwitch(3))
        );

        keyboard.input(alt, KeyState::Released);
        assert!(!keyboard.modifiers().alt);
    }
}
