use serde::Serialize;
use smithay::utils::{Physical, Size};

use super::pixel_format::{self, PixelFormat, RawFormat};
use super::sys::{FbFixScreeninfo, FbVarScreeninfo};

/// Refresh rate assumed when the driver reports no pixel clock, in mHz.
pub const DEFAULT_REFRESH_MHZ: u32 = 60_000;
/// Upper bound on the estimated refresh rate, in mHz.
pub const MAX_REFRESH_MHZ: u32 = 200_000;

/// Snapshot of a framebuffer's mode.
///
/// Two snapshots compare equal when every field except [`ScreenInfo::id`]
/// matches; a difference across a VT switch means the mode drifted.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenInfo {
    /// Visible width in pixels
    pub x_resolution: u32,
    /// Visible height in pixels
    pub y_resolution: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub bits_per_pixel: u32,
    /// Length of the framebuffer memory in bytes
    pub buffer_length: usize,
    /// Length of a line in bytes
    pub line_length: usize,
    /// Driver identifier
    pub id: String,
    pub pixel_format: PixelFormat,
    /// Refresh rate in mHz
    pub refresh_rate: u32,
}

impl PartialEq for ScreenInfo {
    fn eq(&self, other: &Self) -> bool {
        self.x_resolution == other.x_resolution
            && self.y_resolution == other.y_resolution
            && self.width_mm == other.width_mm
            && self.height_mm == other.height_mm
            && self.bits_per_pixel == other.bits_per_pixel
            && self.buffer_length == other.buffer_length
            && self.line_length == other.line_length
            && self.pixel_format == other.pixel_format
            && self.refresh_rate == other.refresh_rate
    }
}

impl Eq for ScreenInfo {}

impl ScreenInfo {
    /// Build a snapshot from the raw kernel structures.
    ///
    /// Returns `None` when the pixel layout is not one we can drive.
    pub fn from_kernel(var: &FbVarScreeninfo, fix: &FbFixScreeninfo) -> Option<Self> {
        let pixel_format = pixel_format::resolve(&RawFormat::from_screeninfo(var, fix))?;
        Some(Self {
            x_resolution: var.xres,
            y_resolution: var.yres,
            width_mm: var.width,
            height_mm: var.height,
            bits_per_pixel: var.bits_per_pixel,
            buffer_length: fix.smem_len as usize,
            line_length: fix.line_length as usize,
            id: fix.id_string(),
            pixel_format,
            refresh_rate: refresh_rate(var),
        })
    }

    /// Visible size, or `None` when the resolution does not fit a surface.
    pub fn size(&self) -> Option<Size<i32, Physical>> {
        let width = i32::try_from(self.x_resolution).ok()?;
        let height = i32::try_from(self.y_resolution).ok()?;
        Some(Size::from((width, height)))
    }

    /// Bytes of device memory the visible area spans.
    pub fn visible_length(&self) -> usize {
        if self.y_resolution == 0 {
            return 0;
        }
        let last_row = self.x_resolution as usize * self.pixel_format.bytes_per_pixel();
        (self.y_resolution as usize - 1) * self.line_length + last_row
    }
}

/// Estimate the refresh rate in mHz from the mode timings.
///
/// The frame period is the blanking-inclusive pixel count times the pixel
/// clock period (picoseconds). A zero period falls back to 60 Hz; the result
/// is capped at 200 Hz and never zero.
pub fn refresh_rate(var: &FbVarScreeninfo) -> u32 {
    let lines = u64::from(var.upper_margin) + u64::from(var.lower_margin) + u64::from(var.yres);
    let columns = u64::from(var.left_margin) + u64::from(var.right_margin) + u64::from(var.xres);
    let period = lines
        .saturating_mul(columns)
        .saturating_mul(u64::from(var.pixclock));

    if period == 0 {
        return DEFAULT_REFRESH_MHZ;
    }

    let rate = 1_000_000_000_000_000u64 / period;
    rate.clamp(1, u64::from(MAX_REFRESH_MHZ)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sys::{FbBitfield, FB_TYPE_PACKED_PIXELS, FB_VISUAL_TRUECOLOR};
    use proptest::prelude::*;

    fn full_hd() -> (FbVarScreeninfo, FbFixScreeninfo) {
        let mut var = FbVarScreeninfo {
            xres: 1920,
            yres: 1080,
            xres_virtual: 1920,
            yres_virtual: 1080,
            bits_per_pixel: 32,
            red: FbBitfield::new(16, 8),
            green: FbBitfield::new(8, 8),
            blue: FbBitfield::new(0, 8),
            transp: FbBitfield::new(24, 0),
            width: 510,
            height: 290,
            ..Default::default()
        };
        // 2200 x 1125 total at 6734 ps per pixel: a 16.667ms frame
        var.left_margin = 148;
        var.right_margin = 88 + 44;
        var.upper_margin = 36 + 5;
        var.lower_margin = 4;
        var.pixclock = 6734;

        let mut fix = FbFixScreeninfo {
            smem_len: 1920 * 1080 * 4,
            line_length: 1920 * 4,
            type_: FB_TYPE_PACKED_PIXELS,
            visual: FB_VISUAL_TRUECOLOR,
            ..Default::default()
        };
        fix.id[..6].copy_from_slice(b"simple");
        (var, fix)
    }

    #[test]
    fn builds_snapshot_from_kernel_info() {
        let (var, fix) = full_hd();
        let info = ScreenInfo::from_kernel(&var, &fix).expect("supported format");
        assert_eq!(info.x_resolution, 1920);
        assert_eq!(info.y_resolution, 1080);
        assert_eq!(info.width_mm, 510);
        assert_eq!(info.height_mm, 290);
        assert_eq!(info.line_length, 7680);
        assert_eq!(info.id, "simple");
        assert_eq!(info.pixel_format, PixelFormat::xrgb8888());
        assert_eq!(info.refresh_rate, 60_000);
        assert_eq!(info.visible_length(), info.buffer_length);
    }

    #[test]
    fn size_rejects_resolutions_past_i32() {
        let (mut var, fix) = full_hd();
        let info = ScreenInfo::from_kernel(&var, &fix).unwrap();
        assert_eq!(info.size(), Some(Size::from((1920, 1080))));

        var.xres = 0x8000_0000;
        let info = ScreenInfo::from_kernel(&var, &fix).unwrap();
        assert_eq!(info.size(), None);
    }

    #[test]
    fn grayscale_device_has_no_snapshot() {
        let (mut var, fix) = full_hd();
        var.grayscale = 1;
        assert!(ScreenInfo::from_kernel(&var, &fix).is_none());
    }

    #[test]
    fn equality_ignores_identifier() {
        let (var, fix) = full_hd();
        let a = ScreenInfo::from_kernel(&var, &fix).unwrap();
        let mut b = a.clone();
        b.id = "other".into();
        assert_eq!(a, a);
        assert_eq!(a, b);

        b.y_resolution = 1024;
        assert_ne!(a, b);
    }

    #[test]
    fn refresh_matches_frame_period() {
        // 16.683ms blanking-inclusive frame
        let var = FbVarScreeninfo {
            xres: 1000,
            yres: 1000,
            pixclock: 16_683,
            ..Default::default()
        };
        assert_eq!(refresh_rate(&var), 59_940);
    }

    #[test]
    fn refresh_defaults_without_pixel_clock() {
        let (mut var, _) = full_hd();
        var.pixclock = 0;
        assert_eq!(refresh_rate(&var), DEFAULT_REFRESH_MHZ);
    }

    #[test]
    fn refresh_is_capped() {
        let var = FbVarScreeninfo {
            xres: 1,
            yres: 1,
            pixclock: 1,
            ..Default::default()
        };
        assert_eq!(refresh_rate(&var), MAX_REFRESH_MHZ);
    }

    fn timings() -> impl Strategy<Value = FbVarScreeninfo> {
        (1u32..4096, 1u32..4096, 0u32..512, 0u32..512, 0u32..128, 0u32..128).prop_map(
            |(xres, yres, left, right, upper, lower)| FbVarScreeninfo {
                xres,
                yres,
                left_margin: left,
                right_margin: right,
                upper_margin: upper,
                lower_margin: lower,
                ..Default::default()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_refresh_is_positive_and_capped(var in timings(), pixclock in any::<u32>()) {
            let var = FbVarScreeninfo { pixclock, ..var };
            let rate = refresh_rate(&var);
            prop_assert!(rate > 0);
            prop_assert!(rate <= MAX_REFRESH_MHZ);
        }

        #[test]
        fn prop_refresh_falls_as_pixel_clock_slows(
            var in timings(),
            slow in 1u32..1_000_000,
            extra in 0u32..1_000_000,
        ) {
            let fast = refresh_rate(&FbVarScreeninfo { pixclock: slow, ..var });
            let slower = refresh_rate(&FbVarScreeninfo { pixclock: slow + extra, ..var });
            prop_assert!(slower <= fast);
        }
    }
}
