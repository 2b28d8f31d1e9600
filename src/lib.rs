//! stilch-fbdev - Linux framebuffer output backend
//!
//! Drives a compositor output on a raw `/dev/fbN` device and keeps it usable
//! across virtual terminal switches:
//!
//! - [`device`]: opening the node, reading its mode, resolving the pixel
//!   layout and mapping its memory
//! - [`backend`]: outputs with their shadow surfaces, frame pacing, the VT
//!   enter/leave state machine and backend lifetime
//! - [`host`]: what the backend needs from the compositor it serves, plus a
//!   small reference implementation
//! - [`fbdev`]: a runner on top of a libseat session and libinput

#![warn(rust_2018_idioms)]

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
#[cfg(feature = "session")]
pub mod fbdev;
pub mod host;
pub mod input;
pub mod keybindings;
pub mod render;
pub mod tty;

pub use backend::{FbdevBackend, FbdevOutput, Platform};
pub use config::FbdevConfig;
pub use error::{FbdevError, FbdevResult};
pub use host::{CompositorHost, FbdevHandler, OutputId};
