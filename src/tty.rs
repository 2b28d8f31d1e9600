//! Virtual terminal control

use crate::error::FbdevResult;

/// A VT switch delivered to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtEvent {
    /// The process regained the display terminal
    Enter,
    /// The process is losing the display terminal
    Leave,
}

/// Handle on the terminal the compositor runs on.
///
/// VT enter/leave notifications are delivered separately, through
/// [`FbdevHandler::vt_event`](crate::host::FbdevHandler::vt_event).
pub trait Tty {
    /// Ask the kernel to switch to VT `vt`.
    fn activate_vt(&mut self, vt: i32) -> FbdevResult<()>;

    /// Put the terminal back into text mode. Used on abnormal exit.
    fn reset(&mut self);
}
