//! Kernel framebuffer ABI (`linux/fb.h`)

use std::ffi::c_ulong;
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd};

pub const FBIOGET_VSCREENINFO: u32 = 0x4600;
pub const FBIOPUT_VSCREENINFO: u32 = 0x4601;
pub const FBIOGET_FSCREENINFO: u32 = 0x4602;

pub const FB_TYPE_PACKED_PIXELS: u32 = 0;
pub const FB_TYPE_PLANES: u32 = 1;

pub const FB_VISUAL_TRUECOLOR: u32 = 2;
pub const FB_VISUAL_PSEUDOCOLOR: u32 = 3;

/// Position of one colour channel inside a pixel.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FbBitfield {
    pub offset: u32,
    pub length: u32,
    /// Non-zero when the most significant bit is on the right.
    pub msb_right: u32,
}

impl FbBitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FbVarScreeninfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    /// Height of the picture in mm.
    pub height: u32,
    /// Width of the picture in mm.
    pub width: u32,
    pub accel_flags: u32,
    /// Pixel clock period in picoseconds.
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FbFixScreeninfo {
    pub id: [u8; 16],
    pub smem_start: c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

impl FbFixScreeninfo {
    /// Identifier with the trailing NULs stripped.
    pub fn id_string(&self) -> String {
        let len = self.id.iter().position(|&b| b == 0).unwrap_or(self.id.len());
        String::from_utf8_lossy(&self.id[..len]).into_owned()
    }
}

mod ioctl {
    use super::{
        FbFixScreeninfo, FbVarScreeninfo, FBIOGET_FSCREENINFO, FBIOGET_VSCREENINFO,
        FBIOPUT_VSCREENINFO,
    };

    nix::ioctl_read_bad!(fbioget_fscreeninfo, FBIOGET_FSCREENINFO, FbFixScreeninfo);
    nix::ioctl_read_bad!(fbioget_vscreeninfo, FBIOGET_VSCREENINFO, FbVarScreeninfo);
    // the kernel writes the mode it actually applied back into the argument
    nix::ioctl_readwrite_bad!(fbioput_vscreeninfo, FBIOPUT_VSCREENINFO, FbVarScreeninfo);
}

pub fn get_fscreeninfo(fd: BorrowedFd<'_>) -> io::Result<FbFixScreeninfo> {
    let mut info = FbFixScreeninfo::default();
    // SAFETY: `info` is a properly sized `fb_fix_screeninfo` the kernel fills in.
    unsafe { ioctl::fbioget_fscreeninfo(fd.as_raw_fd(), &mut info) }?;
    Ok(info)
}

pub fn get_vscreeninfo(fd: BorrowedFd<'_>) -> io::Result<FbVarScreeninfo> {
    let mut info = FbVarScreeninfo::default();
    // SAFETY: `info` is a properly sized `fb_var_screeninfo` the kernel fills in.
    unsafe { ioctl::fbioget_vscreeninfo(fd.as_raw_fd(), &mut info) }?;
    Ok(info)
}

pub fn put_vscreeninfo(fd: BorrowedFd<'_>, info: &FbVarScreeninfo) -> io::Result<()> {
    let mut info = *info;
    // SAFETY: `info` is a properly sized `fb_var_screeninfo` the kernel reads
    // and may adjust.
    unsafe { ioctl::fbioput_vscreeninfo(fd.as_raw_fd(), &mut info) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_sizes_match_kernel_headers() {
        assert_eq!(std::mem::size_of::<FbBitfield>(), 12);
        assert_eq!(std::mem::size_of::<FbVarScreeninfo>(), 160);
    }

    #[test]
    fn id_string_stops_at_nul() {
        let mut fix = FbFixScreeninfo::default();
        fix.id[..7].copy_from_slice(b"simple\0");
        assert_eq!(fix.id_string(), "simple");

        fix.id = *b"0123456789abcdef";
        assert_eq!(fix.id_string(), "0123456789abcdef");
    }
}
