//! The compositor side of the backend: what the fbdev backend needs from the
//! host it drives, and what it reports back.

mod basic;

pub use basic::BasicHost;

use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::Serialize;
use smithay::utils::{Physical, Rectangle, Size, Transform};

use crate::keybindings::KeyBinding;
use crate::tty::VtEvent;

/// Identity of an output, stable for the lifetime of one output instance.
///
/// A rebuilt output gets a fresh id even when it drives the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OutputId(NonZeroU32);

impl OutputId {
    pub(crate) fn new(id: NonZeroU32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fbdev-{}", self.0)
    }
}

/// Host activity, saved across a VT switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    #[default]
    Active,
    Idle,
    Offscreen,
    Sleeping,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModeFlags: u32 {
        const CURRENT = 1 << 0;
        const PREFERRED = 1 << 1;
    }
}

bitflags! {
    /// What an output can do beyond being painted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputCaps: u32 {
        const REPAINT = 1 << 0;
        const DESTROY = 1 << 1;
        const PLANES = 1 << 2;
        const BACKLIGHT = 1 << 3;
        const DPMS = 1 << 4;
        const SWITCH_MODE = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub size: Size<i32, Physical>,
    /// Refresh rate in mHz
    pub refresh: u32,
    pub flags: ModeFlags,
}

/// Everything the host needs to register an output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    pub id: OutputId,
    pub device: PathBuf,
    pub make: String,
    pub model: String,
    /// Physical size in millimetres
    pub physical_size: (u32, u32),
    pub mode: OutputMode,
    pub transform: Transform,
    /// Size of the output in its transformed orientation
    pub logical_size: Size<i32, Physical>,
    pub caps: OutputCaps,
}

/// Operations the backend performs on the compositor that owns it.
pub trait CompositorHost {
    fn register_output(&mut self, output: &OutputDescriptor);

    fn unregister_output(&mut self, output: OutputId);

    /// Remove repainted rectangles from the accumulated damage.
    fn subtract_damage(&mut self, damage: &[Rectangle<i32, Physical>]);

    /// Mark every output as needing a full repaint.
    fn damage_all(&mut self);

    fn enter_offscreen(&mut self);

    fn activity(&self) -> ActivityState;

    fn set_activity(&mut self, state: ActivityState);

    fn set_focus(&mut self, focused: bool);

    fn add_key_binding(&mut self, binding: KeyBinding);

    fn shutdown(&mut self);
}

/// Callbacks delivered through the event loop's shared data.
pub trait FbdevHandler: 'static {
    /// A frame on `output` has completed. `time_msec` is wall-clock time since
    /// the Unix epoch in milliseconds, truncated to 32 bits.
    fn frame_finished(&mut self, output: OutputId, time_msec: u32);

    fn vt_event(&mut self, event: VtEvent);
}
