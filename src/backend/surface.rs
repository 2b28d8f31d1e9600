//! Shadow and hardware surfaces, and compositing between them
//!
//! The rasterizer only ever sees the shadow surface, which is laid out in the
//! output's logical (rotated) orientation. Damage is copied from it onto the
//! hardware surface through the output transform, so rotation never reaches
//! the rasterizer.

use std::io;

use smithay::utils::{Physical, Point, Rectangle, Size, Transform};

use crate::device::{DeviceMemory, PixelFormat, ScreenInfo};

/// Transforms the pipeline can composite through; anything else (mirrored
/// variants) is treated as [`Transform::Normal`].
pub fn supported_transform(transform: Transform) -> Transform {
    match transform {
        Transform::Normal | Transform::_90 | Transform::_180 | Transform::_270 => transform,
        _ => Transform::Normal,
    }
}

/// Size of the shadow surface for a hardware surface of `size`.
pub fn shadow_size(size: Size<i32, Physical>, transform: Transform) -> Size<i32, Physical> {
    match supported_transform(transform) {
        Transform::_90 | Transform::_270 => (size.h, size.w).into(),
        _ => size,
    }
}

/// Map a rectangle in shadow space to the hardware rectangle it lands on.
///
/// `shadow` is the size of the shadow surface.
pub fn shadow_to_hardware(
    rect: Rectangle<i32, Physical>,
    transform: Transform,
    shadow: Size<i32, Physical>,
) -> Rectangle<i32, Physical> {
    let (x1, y1) = (rect.loc.x, rect.loc.y);
    let (x2, y2) = (x1 + rect.size.w, y1 + rect.size.h);
    let (width, height) = (shadow.w, shadow.h);

    let (x1, x2, y1, y2) = match supported_transform(transform) {
        Transform::_180 => (width - x2, width - x1, height - y2, height - y1),
        Transform::_90 => (height - y2, height - y1, x1, x2),
        Transform::_270 => (y1, y2, width - x2, width - x1),
        _ => (x1, x2, y1, y2),
    };

    Rectangle::new((x1, y1).into(), (x2 - x1, y2 - y1).into())
}

/// The shadow pixel that lands on hardware pixel `(x, y)`.
fn source_pixel(x: i32, y: i32, transform: Transform, shadow: Size<i32, Physical>) -> (i32, i32) {
    match transform {
        Transform::_180 => (shadow.w - 1 - x, shadow.h - 1 - y),
        Transform::_90 => (y, shadow.h - 1 - x),
        Transform::_270 => (shadow.w - 1 - y, x),
        _ => (x, y),
    }
}

fn bounds(size: Size<i32, Physical>) -> Rectangle<i32, Physical> {
    Rectangle::new(Point::from((0, 0)), size)
}

/// Off-device render target.
pub struct ShadowSurface {
    buffer: Vec<u8>,
    size: Size<i32, Physical>,
    stride: usize,
    format: PixelFormat,
}

impl std::fmt::Debug for ShadowSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowSurface")
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl ShadowSurface {
    pub fn new(size: Size<i32, Physical>, format: PixelFormat) -> Self {
        let stride = size.w.max(0) as usize * format.bytes_per_pixel();
        Self {
            buffer: vec![0; stride * size.h.max(0) as usize],
            size,
            stride,
            format,
        }
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Address of the backing memory.
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    /// Fill `rect`, clipped to the surface, with an already packed pixel.
    pub fn fill(&mut self, rect: Rectangle<i32, Physical>, pixel: u32) {
        let Some(rect) = rect.intersection(bounds(self.size)) else {
            return;
        };
        let bpp = self.format.bytes_per_pixel();
        let mut encoded = [0u8; 4];
        self.format.write_pixel(&mut encoded, pixel);

        for y in rect.loc.y..rect.loc.y + rect.size.h {
            let start = y as usize * self.stride + rect.loc.x as usize * bpp;
            let row = &mut self.buffer[start..start + rect.size.w as usize * bpp];
            for chunk in row.chunks_exact_mut(bpp) {
                chunk.copy_from_slice(&encoded[..bpp]);
            }
        }
    }

    fn pixel(&self, x: i32, y: i32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride + x as usize * bpp;
        &self.buffer[start..start + bpp]
    }
}

/// Device-mapped render target. Owns the mapping: dropping the surface
/// unmaps the device memory.
pub struct HardwareSurface {
    memory: Box<dyn DeviceMemory>,
    size: Size<i32, Physical>,
    stride: usize,
    format: PixelFormat,
    row: Vec<u8>,
}

impl std::fmt::Debug for HardwareSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSurface")
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("mapped", &self.memory.len())
            .finish()
    }
}

impl HardwareSurface {
    /// Wrap mapped memory for the mode in `info`. Hands the memory back if it
    /// cannot hold the visible area, or the mode has no valid surface size.
    pub fn new(
        memory: Box<dyn DeviceMemory>,
        info: &ScreenInfo,
    ) -> Result<Self, Box<dyn DeviceMemory>> {
        let Some(size) = info.size() else {
            return Err(memory);
        };
        if memory.len() < info.visible_length() {
            return Err(memory);
        }
        Ok(Self {
            memory,
            size,
            stride: info.line_length,
            format: info.pixel_format,
            row: Vec::new(),
        })
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Unmap the device memory.
    pub fn release(self) -> io::Result<()> {
        self.memory.unmap()
    }

    /// Copy the damaged shadow rectangle onto the device, rotated by
    /// `transform`. The source is treated as opaque: pixels are copied, not
    /// blended.
    pub fn composite(
        &mut self,
        shadow: &ShadowSurface,
        transform: Transform,
        damage: Rectangle<i32, Physical>,
    ) {
        profiling::scope!("composite");

        let transform = supported_transform(transform);
        let Some(damage) = damage.intersection(bounds(shadow.size())) else {
            return;
        };
        let Some(dst) =
            shadow_to_hardware(damage, transform, shadow.size()).intersection(bounds(self.size))
        else {
            return;
        };

        let bpp = self.format.bytes_per_pixel();
        let width = dst.size.w as usize * bpp;

        for y in dst.loc.y..dst.loc.y + dst.size.h {
            let offset = y as usize * self.stride + dst.loc.x as usize * bpp;

            if transform == Transform::Normal {
                let start = y as usize * shadow.stride() + dst.loc.x as usize * bpp;
                self.memory.write(offset, &shadow.data()[start..start + width]);
                continue;
            }

            self.row.clear();
            for x in dst.loc.x..dst.loc.x + dst.size.w {
                let (sx, sy) = source_pixel(x, y, transform, shadow.size());
                self.row.extend_from_slice(shadow.pixel(sx, sy));
            }
            self.memory.write(offset, &self.row);
        }
    }
}
