//! Pixel format resolution from framebuffer bitfield descriptors
//!
//! The kernel describes a mode's pixel layout as an offset/length/msb triple
//! per colour channel. Only packed true-colour layouts whose channels are
//! laid out contiguously in one of two orders are driven:
//!
//! - `Argb`: channels packed upwards from bit 0 as blue, green, red, alpha
//! - `Rgba`: channels packed downwards from the top bit as red, green, blue, alpha

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::sys::{
    FbBitfield, FbFixScreeninfo, FbVarScreeninfo, FB_TYPE_PACKED_PIXELS, FB_VISUAL_TRUECOLOR,
};

/// Raw format metadata as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFormat {
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
}

impl RawFormat {
    pub fn from_screeninfo(var: &FbVarScreeninfo, fix: &FbFixScreeninfo) -> Self {
        Self {
            type_: fix.type_,
            type_aux: fix.type_aux,
            visual: fix.visual,
            bits_per_pixel: var.bits_per_pixel,
            grayscale: var.grayscale,
            red: var.red,
            green: var.green,
            blue: var.blue,
            transp: var.transp,
        }
    }

    /// A packed true-colour descriptor with the given channel layout.
    pub fn packed_truecolor(
        bits_per_pixel: u32,
        red: FbBitfield,
        green: FbBitfield,
        blue: FbBitfield,
        transp: FbBitfield,
    ) -> Self {
        Self {
            type_: FB_TYPE_PACKED_PIXELS,
            type_aux: 0,
            visual: FB_VISUAL_TRUECOLOR,
            bits_per_pixel,
            grayscale: 0,
            red,
            green,
            blue,
            transp,
        }
    }

    fn channels(&self) -> [&FbBitfield; 4] {
        [&self.transp, &self.red, &self.green, &self.blue]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Argb,
    Rgba,
}

/// Per-channel values (or offsets), alpha first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub alpha: u32,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

/// A resolved packed pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelFormat {
    bits_per_pixel: u32,
    order: ChannelOrder,
    alpha: u32,
    red: u32,
    green: u32,
    blue: u32,
}

fn mask(length: u32) -> u32 {
    1u32.checked_shl(length).map_or(u32::MAX, |v| v - 1)
}

fn place(value: u32, length: u32, shift: u32) -> u32 {
    if length == 0 {
        0
    } else {
        (value & mask(length)) << shift
    }
}

fn extract(pixel: u32, length: u32, shift: u32) -> u32 {
    if length == 0 {
        0
    } else {
        (pixel >> shift) & mask(length)
    }
}

fn scale_from_8bit(value: u8, length: u32) -> u32 {
    let value = u32::from(value);
    match length {
        0 => 0,
        1..=8 => value >> (8 - length),
        9..=16 => (value << (length - 8)) | (value >> (16 - length)),
        _ => value << (length - 8),
    }
}

impl PixelFormat {
    /// Build a format from its depth, order and channel lengths.
    ///
    /// Returns `None` unless the depth is a whole number of bytes up to 32 and
    /// the channels fit in it.
    pub fn new(
        bits_per_pixel: u32,
        order: ChannelOrder,
        alpha: u32,
        red: u32,
        green: u32,
        blue: u32,
    ) -> Option<Self> {
        if !matches!(bits_per_pixel, 8 | 16 | 24 | 32) {
            return None;
        }
        let used = [alpha, red, green, blue]
            .into_iter()
            .try_fold(0u32, u32::checked_add)?;
        if used > bits_per_pixel {
            return None;
        }
        Some(Self {
            bits_per_pixel,
            order,
            alpha,
            red,
            green,
            blue,
        })
    }

    /// The layout every device is forced back to by a mode set.
    pub fn xrgb8888() -> Self {
        Self {
            bits_per_pixel: 32,
            order: ChannelOrder::Argb,
            alpha: 0,
            red: 8,
            green: 8,
            blue: 8,
        }
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn lengths(&self) -> Channels {
        Channels {
            alpha: self.alpha,
            red: self.red,
            green: self.green,
            blue: self.blue,
        }
    }

    /// Bit offset of each channel inside a pixel.
    pub fn offsets(&self) -> Channels {
        match self.order {
            ChannelOrder::Argb => Channels {
                blue: 0,
                green: self.blue,
                red: self.blue + self.green,
                alpha: self.blue + self.green + self.red,
            },
            ChannelOrder::Rgba => {
                let red = self.bits_per_pixel - self.red;
                let green = red - self.green;
                let blue = green - self.blue;
                Channels {
                    red,
                    green,
                    blue,
                    alpha: blue - self.alpha,
                }
            }
        }
    }

    /// Pack channel values into a pixel. Values wider than their channel are
    /// truncated.
    pub fn encode(&self, value: Channels) -> u32 {
        let len = self.lengths();
        let off = self.offsets();
        place(value.alpha, len.alpha, off.alpha)
            | place(value.red, len.red, off.red)
            | place(value.green, len.green, off.green)
            | place(value.blue, len.blue, off.blue)
    }

    pub fn decode(&self, pixel: u32) -> Channels {
        let len = self.lengths();
        let off = self.offsets();
        Channels {
            alpha: extract(pixel, len.alpha, off.alpha),
            red: extract(pixel, len.red, off.red),
            green: extract(pixel, len.green, off.green),
            blue: extract(pixel, len.blue, off.blue),
        }
    }

    /// Convert a `0xAARRGGBB` colour into this format.
    pub fn pack_argb8888(&self, argb: u32) -> u32 {
        let [a, r, g, b] = argb.to_be_bytes();
        let len = self.lengths();
        self.encode(Channels {
            alpha: scale_from_8bit(a, len.alpha),
            red: scale_from_8bit(r, len.red),
            green: scale_from_8bit(g, len.green),
            blue: scale_from_8bit(b, len.blue),
        })
    }

    /// Store one pixel in native byte order at the start of `dst`.
    pub fn write_pixel(&self, dst: &mut [u8], pixel: u32) {
        match self.bits_per_pixel {
            8 => dst[0] = pixel as u8,
            16 => dst[..2].copy_from_slice(&(pixel as u16).to_ne_bytes()),
            // 24bpp is stored least significant byte first
            24 => dst[..3].copy_from_slice(&pixel.to_le_bytes()[..3]),
            _ => dst[..4].copy_from_slice(&pixel.to_ne_bytes()),
        }
    }

    /// Whether the device's reported offsets agree with this layout.
    fn matches(&self, raw: &RawFormat) -> bool {
        let off = self.offsets();
        [
            (&raw.transp, off.alpha),
            (&raw.red, off.red),
            (&raw.green, off.green),
            (&raw.blue, off.blue),
        ]
        .iter()
        .all(|(field, offset)| field.length == 0 || field.offset == *offset)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.alpha + self.red + self.green + self.blue;
        let (a, pad) = if self.alpha == 0 {
            ('x', self.bits_per_pixel - used)
        } else {
            ('a', self.alpha)
        };
        match self.order {
            ChannelOrder::Argb if pad == 0 && self.alpha == 0 => {
                write!(f, "r{}g{}b{}", self.red, self.green, self.blue)
            }
            ChannelOrder::Argb => {
                write!(f, "{a}{pad}r{}g{}b{}", self.red, self.green, self.blue)
            }
            ChannelOrder::Rgba if pad == 0 && self.alpha == 0 => {
                write!(f, "r{}g{}b{}", self.red, self.green, self.blue)
            }
            ChannelOrder::Rgba => {
                write!(f, "r{}g{}b{}{a}{pad}", self.red, self.green, self.blue)
            }
        }
    }
}

/// Work out the packed pixel format the device uses.
///
/// Returns `None` for anything that is not a packed, true-colour, MSB-left
/// layout in ARGB or RGBA order.
pub fn resolve(raw: &RawFormat) -> Option<PixelFormat> {
    debug!(
        type_ = raw.type_,
        type_aux = raw.type_aux,
        visual = raw.visual,
        bpp = raw.bits_per_pixel,
        grayscale = raw.grayscale,
        red = ?raw.red,
        green = ?raw.green,
        blue = ?raw.blue,
        transp = ?raw.transp,
        "Calculating pixel format"
    );

    if raw.type_ != FB_TYPE_PACKED_PIXELS {
        return None;
    }
    if raw.visual != FB_VISUAL_TRUECOLOR || raw.grayscale != 0 {
        return None;
    }
    if raw
        .channels()
        .iter()
        .any(|field| field.length != 0 && field.msb_right != 0)
    {
        return None;
    }

    let (r, g, b, t) = (&raw.red, &raw.green, &raw.blue, &raw.transp);
    let argb = (t.offset >= r.offset || t.length == 0)
        && r.offset >= g.offset
        && g.offset >= b.offset;
    let rgba = r.offset >= g.offset && g.offset >= b.offset && b.offset >= t.offset;

    [(argb, ChannelOrder::Argb), (rgba, ChannelOrder::Rgba)]
        .into_iter()
        .filter(|(ordered, _)| *ordered)
        .filter_map(|(_, order)| {
            PixelFormat::new(
                raw.bits_per_pixel,
                order,
                t.length,
                r.length,
                g.length,
                b.length,
            )
        })
        .find(|format| format.matches(raw))
}
