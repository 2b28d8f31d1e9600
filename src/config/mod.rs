//! Backend configuration: built once from the command line and environment,
//! then passed by reference to every constructor.

use std::path::Path;
use std::sync::Arc;

use smithay::utils::Transform;

use crate::error::{FbdevError, FbdevResult};

pub mod parser;

pub const DEFAULT_DEVICE: &str = "/dev/fb0";
pub const DEFAULT_SEAT: &str = "seat0";

/// Overrides the framebuffer device when `--device` is not given.
pub const DEVICE_ENV: &str = "STILCH_FBDEV_DEVICE";
/// Overrides the VT when `--tty` is not given.
pub const TTY_ENV: &str = "STILCH_FBDEV_TTY";

#[derive(Debug, Clone, PartialEq)]
pub struct FbdevConfig {
    /// VT to switch to at startup; 0 keeps the current one
    pub tty: u32,
    /// Framebuffer device node, shared with every output created for it
    pub device: Arc<Path>,
    /// Input seat name
    pub seat: String,
    /// Output rotation
    pub transform: Transform,
    /// Print the device mode and exit instead of running
    pub query: bool,
}

impl Default for FbdevConfig {
    fn default() -> Self {
        Self {
            tty: 0,
            device: Arc::from(Path::new(DEFAULT_DEVICE)),
            seat: DEFAULT_SEAT.to_owned(),
            transform: Transform::Normal,
            query: false,
        }
    }
}

impl FbdevConfig {
    /// Build from command-line arguments (without the program name), falling
    /// back to the environment for anything not given.
    pub fn from_args<I>(args: I) -> FbdevResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        Self::from_sources(args, |key| std::env::var(key).ok())
    }

    /// Like [`FbdevConfig::from_args`] with an explicit environment lookup.
    pub fn from_sources<I, E>(args: I, env: E) -> FbdevResult<Self>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let options = parser::parse_args(args)?;
        let mut config = Self::default();

        match options.tty {
            Some(tty) => config.tty = tty,
            None => {
                if let Some(value) = env(TTY_ENV) {
                    config.tty = parser::parse_tty(&value)?;
                }
            }
        }

        if let Some(device) = options.device.or_else(|| env(DEVICE_ENV)) {
            if device.is_empty() {
                return Err(FbdevError::Config("device path is empty".into()));
            }
            config.device = Arc::from(Path::new(&device));
        }

        if let Some(seat) = options.seat {
            config.seat = seat;
        }
        if let Some(transform) = options.transform {
            config.transform = transform;
        }
        config.query = options.query;

        Ok(config)
    }
}
