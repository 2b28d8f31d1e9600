//! Framebuffer device access: opening the node, querying and forcing its
//! mode, and mapping its memory.

pub mod mapping;
pub mod pixel_format;
pub mod screen_info;
pub mod sys;

use std::fs::File;
use std::io;
use std::os::unix::io::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};

use rustix::fs::{Mode, OFlags};
use tracing::{debug, error, info};

use crate::backend::surface::HardwareSurface;
use crate::error::{FbdevError, FbdevResult};

pub use mapping::{DeviceMemory, HeapMemory, MmapRegion};
pub use pixel_format::{ChannelOrder, Channels, PixelFormat, RawFormat};
pub use screen_info::ScreenInfo;
use sys::{FbBitfield, FbFixScreeninfo, FbVarScreeninfo};

/// An open framebuffer device.
pub trait FramebufferDevice {
    fn path(&self) -> &Path;

    fn fix_screen_info(&self) -> io::Result<FbFixScreeninfo>;

    fn var_screen_info(&self) -> io::Result<FbVarScreeninfo>;

    fn put_var_screen_info(&mut self, info: &FbVarScreeninfo) -> io::Result<()>;

    /// Map `len` bytes of device memory. The device is closed afterwards,
    /// whatever the outcome.
    fn map_memory(self: Box<Self>, len: usize) -> io::Result<Box<dyn DeviceMemory>>;
}

/// Opens framebuffer devices by path.
pub trait DeviceOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>>;
}

/// A `/dev/fbN` node.
#[derive(Debug)]
pub struct FbdevNode {
    file: File,
    path: PathBuf,
}

impl FbdevNode {
    pub fn open(path: &Path) -> io::Result<Self> {
        let fd = rustix::fs::open(path, OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY, Mode::empty())?;
        Ok(Self::from_fd(fd, path))
    }

    /// Wrap a descriptor somebody else opened, a session for instance.
    pub fn from_fd(fd: OwnedFd, path: &Path) -> Self {
        Self {
            file: File::from(fd),
            path: path.to_owned(),
        }
    }
}

impl FramebufferDevice for FbdevNode {
    fn path(&self) -> &Path {
        &self.path
    }

    fn fix_screen_info(&self) -> io::Result<FbFixScreeninfo> {
        sys::get_fscreeninfo(self.file.as_fd())
    }

    fn var_screen_info(&self) -> io::Result<FbVarScreeninfo> {
        sys::get_vscreeninfo(self.file.as_fd())
    }

    fn put_var_screen_info(&mut self, info: &FbVarScreeninfo) -> io::Result<()> {
        sys::put_vscreeninfo(self.file.as_fd(), info)
    }

    fn map_memory(self: Box<Self>, len: usize) -> io::Result<Box<dyn DeviceMemory>> {
        let region = MmapRegion::map(self.file.as_fd(), len)?;
        Ok(Box::new(region))
    }
}

/// Opens real device nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeOpener;

impl DeviceOpener for NodeOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>> {
        Ok(Box::new(FbdevNode::open(path)?))
    }
}

/// Query the device's current mode and resolve its pixel format.
pub fn query_screen_info(device: &dyn FramebufferDevice) -> FbdevResult<ScreenInfo> {
    let path = device.path();
    let fix = device
        .fix_screen_info()
        .map_err(|err| FbdevError::ioctl(path, "FBIOGET_FSCREENINFO", err))?;
    let var = device
        .var_screen_info()
        .map_err(|err| FbdevError::ioctl(path, "FBIOGET_VSCREENINFO", err))?;

    ScreenInfo::from_kernel(&var, &fix).ok_or_else(|| {
        error!(device = %path.display(), "Frame buffer uses an unsupported format");
        FbdevError::UnsupportedFormat {
            path: path.to_owned(),
        }
    })
}

/// Open a framebuffer device and read its mode.
///
/// On failure the device is closed before returning.
pub fn open_and_query(
    opener: &dyn DeviceOpener,
    path: &Path,
) -> FbdevResult<(Box<dyn FramebufferDevice>, ScreenInfo)> {
    info!(device = %path.display(), "Opening fbdev frame buffer");

    let device = opener.open(path).map_err(|err| {
        error!(device = %path.display(), "Failed to open frame buffer device: {err}");
        FbdevError::open(path, err)
    })?;

    let info = query_screen_info(device.as_ref()).map_err(|err| {
        error!("Failed to get frame buffer info: {err}");
        err
    })?;

    Ok((device, info))
}

/// Force `info`'s resolution back onto the device with an x8r8g8b8 layout.
pub fn set_mode(device: &mut dyn FramebufferDevice, info: &ScreenInfo) -> FbdevResult<()> {
    let path = device.path().to_owned();
    let mut var = device
        .var_screen_info()
        .map_err(|err| FbdevError::ioctl(&path, "FBIOGET_VSCREENINFO", err))?;

    var.xres = info.x_resolution;
    var.yres = info.y_resolution;
    var.width = info.width_mm;
    var.height = info.height_mm;
    var.bits_per_pixel = info.bits_per_pixel;

    var.grayscale = 0;
    var.transp = FbBitfield::new(24, 0);
    var.red = FbBitfield::new(16, 8);
    var.green = FbBitfield::new(8, 8);
    var.blue = FbBitfield::new(0, 8);

    device
        .put_var_screen_info(&var)
        .map_err(|err| FbdevError::ioctl(&path, "FBIOPUT_VSCREENINFO", err))
}

/// Map the device memory and wrap it in a hardware surface for `info`.
///
/// Consumes the device: its handle is closed whether or not mapping worked.
pub fn map(device: Box<dyn FramebufferDevice>, info: &ScreenInfo) -> FbdevResult<HardwareSurface> {
    let path = device.path().to_owned();
    debug!(device = %path.display(), len = info.buffer_length, "Mapping fbdev frame buffer");

    if info.size().is_none() {
        error!(
            device = %path.display(),
            width = info.x_resolution,
            height = info.y_resolution,
            "Frame buffer resolution out of range"
        );
        return Err(FbdevError::UnsupportedMode {
            path,
            width: info.x_resolution,
            height: info.y_resolution,
        });
    }

    let required = info.visible_length();
    if required > info.buffer_length {
        error!(device = %path.display(), required, available = info.buffer_length, "Frame buffer smaller than its mode");
        return Err(FbdevError::BufferTooSmall {
            path,
            required,
            available: info.buffer_length,
        });
    }

    let memory = device.map_memory(info.buffer_length).map_err(|err| {
        error!(device = %path.display(), "Failed to mmap frame buffer: {err}");
        FbdevError::Map {
            path: path.clone(),
            source: err,
        }
    })?;

    HardwareSurface::new(memory, info).map_err(|memory| {
        let available = memory.len();
        if let Err(err) = memory.unmap() {
            error!("Failed to munmap frame buffer: {err}");
        }
        FbdevError::BufferTooSmall {
            path,
            required,
            available,
        }
    })
}
