//! Software rasterizer interface

use std::collections::HashSet;

use smithay::utils::{Physical, Rectangle};
use tracing::{debug, trace};

use crate::backend::surface::ShadowSurface;
use crate::error::{FbdevError, FbdevResult};
use crate::host::OutputId;

/// Background used by [`SolidColorRasterizer::default`], as ARGB8888.
pub const DEFAULT_BACKGROUND: u32 = 0xff1a_1a2e;

/// Paints output content into shadow surfaces.
pub trait Rasterizer {
    /// Set up per-output state for an output whose target is `surface`.
    fn create_output(&mut self, output: OutputId, surface: &ShadowSurface) -> FbdevResult<()>;

    fn destroy_output(&mut self, output: OutputId);

    /// Paint `damage` into `target`.
    fn repaint_output(
        &mut self,
        output: OutputId,
        target: &mut ShadowSurface,
        damage: &[Rectangle<i32, Physical>],
    );
}

/// Fills every damaged rectangle with one colour.
#[derive(Debug)]
pub struct SolidColorRasterizer {
    color: u32,
    outputs: HashSet<OutputId>,
}

impl Default for SolidColorRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND)
    }
}

impl SolidColorRasterizer {
    pub fn new(color: u32) -> Self {
        Self {
            color,
            outputs: HashSet::new(),
        }
    }

    pub fn set_color(&mut self, color: u32) {
        self.color = color;
    }

    pub fn has_output(&self, output: OutputId) -> bool {
        self.outputs.contains(&output)
    }
}

impl Rasterizer for SolidColorRasterizer {
    fn create_output(&mut self, output: OutputId, surface: &ShadowSurface) -> FbdevResult<()> {
        if !self.outputs.insert(output) {
            return Err(FbdevError::Render(format!(
                "renderer state for {output} already exists"
            )));
        }
        debug!(%output, format = %surface.format(), size = ?surface.size(), "Created renderer state");
        Ok(())
    }

    fn destroy_output(&mut self, output: OutputId) {
        self.outputs.remove(&output);
    }

    fn repaint_output(
        &mut self,
        output: OutputId,
        target: &mut ShadowSurface,
        damage: &[Rectangle<i32, Physical>],
    ) {
        profiling::scope!("solid_color_repaint");
        if !self.outputs.contains(&output) {
            trace!(%output, "Repaint for an output without renderer state");
            return;
        }
        let pixel = target.format().pack_argb8888(self.color);
        for rect in damage {
            target.fill(*rect, pixel);
        }
    }
}
