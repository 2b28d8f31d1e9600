//! One framebuffer output: device mapping, shadow surface and frame pacing

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use smithay::reexports::calloop::{
    timer::{TimeoutAction, Timer},
    LoopHandle, RegistrationToken,
};
use smithay::utils::{Physical, Rectangle, Transform};
use tracing::{debug, error, info, trace};

use super::surface::{shadow_size, supported_transform, HardwareSurface, ShadowSurface};
use crate::device::{self, DeviceOpener, ScreenInfo};
use crate::error::FbdevResult;
use crate::host::{
    CompositorHost, FbdevHandler, ModeFlags, OutputCaps, OutputDescriptor, OutputId, OutputMode,
};
use crate::render::Rasterizer;

/// A one-shot frame completion timer registered on the event loop.
#[derive(Debug)]
struct FrameTimer {
    token: RegistrationToken,
    fired: Rc<Cell<bool>>,
}

impl FrameTimer {
    fn pending(&self) -> bool {
        !self.fired.get()
    }

    fn cancel<D>(self, handle: &LoopHandle<'static, D>) {
        // a fired timer already removed itself
        if self.pending() {
            handle.remove(self.token);
        }
    }
}

fn wall_clock_msec() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u32)
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct FbdevOutput {
    id: OutputId,
    device: Arc<Path>,
    screen_info: ScreenInfo,
    hardware: Option<HardwareSurface>,
    shadow: ShadowSurface,
    transform: Transform,
    mode: OutputMode,
    frame_timer: Option<FrameTimer>,
    repaint_needed: bool,
}

impl FbdevOutput {
    /// Open `device`, map it and set up the shadow surface and renderer state.
    ///
    /// Anything acquired before a failing step is released on return.
    pub fn create(
        id: OutputId,
        device: Arc<Path>,
        transform: Transform,
        opener: &dyn DeviceOpener,
        rasterizer: &mut dyn Rasterizer,
    ) -> FbdevResult<Self> {
        info!(output = %id, device = %device.display(), "Creating fbdev output");

        let (node, screen_info) = device::open_and_query(opener, &device)?;
        let hardware = device::map(node, &screen_info)?;

        let transform = supported_transform(transform);
        let size = hardware.size();
        let shadow = ShadowSurface::new(shadow_size(size, transform), screen_info.pixel_format);
        let mode = OutputMode {
            size,
            refresh: screen_info.refresh_rate,
            flags: ModeFlags::CURRENT | ModeFlags::PREFERRED,
        };

        let output = Self {
            id,
            device,
            screen_info,
            hardware: Some(hardware),
            shadow,
            transform,
            mode,
            frame_timer: None,
            repaint_needed: false,
        };

        rasterizer.create_output(id, &output.shadow).map_err(|err| {
            error!(output = %id, "Failed to create renderer state: {err}");
            err
        })?;

        info!(
            output = %id,
            format = %output.screen_info.pixel_format,
            ?transform,
            "fbdev output {}×{} px, guessing {:.2} Hz and 96 dpi",
            size.w,
            size.h,
            f64::from(mode.refresh) / 1000.0,
        );

        Ok(output)
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn device(&self) -> &Arc<Path> {
        &self.device
    }

    pub fn screen_info(&self) -> &ScreenInfo {
        &self.screen_info
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn shadow(&self) -> &ShadowSurface {
        &self.shadow
    }

    /// Whether the device memory is currently mapped.
    pub fn is_enabled(&self) -> bool {
        self.hardware.is_some()
    }

    pub fn repaint_needed(&self) -> bool {
        self.repaint_needed
    }

    /// Whether a frame timer is armed and has not fired yet.
    pub fn frame_pending(&self) -> bool {
        self.frame_timer.as_ref().is_some_and(FrameTimer::pending)
    }

    pub fn schedule_repaint(&mut self) {
        self.repaint_needed = true;
    }

    pub(crate) fn clear_repaint(&mut self) {
        self.repaint_needed = false;
    }

    pub fn descriptor(&self) -> OutputDescriptor {
        OutputDescriptor {
            id: self.id,
            device: self.device.to_path_buf(),
            make: "unknown".to_owned(),
            model: self.screen_info.id.clone(),
            physical_size: (self.screen_info.width_mm, self.screen_info.height_mm),
            mode: self.mode,
            transform: self.transform,
            logical_size: self.shadow.size(),
            caps: OutputCaps::REPAINT | OutputCaps::DESTROY,
        }
    }

    /// Unmap the device memory, keeping the cached mode and shadow surface.
    /// Does nothing on a disabled output.
    pub fn disable(&mut self) {
        let Some(hardware) = self.hardware.take() else {
            return;
        };
        info!(output = %self.id, "Disabling fbdev output");
        if let Err(err) = hardware.release() {
            error!(output = %self.id, "Failed to munmap frame buffer: {err}");
        }
    }

    /// Attach a freshly mapped hardware surface for the unchanged mode.
    pub(crate) fn enable(&mut self, hardware: HardwareSurface) {
        debug_assert!(self.hardware.is_none(), "output is already mapped");
        debug!(output = %self.id, "Enabling fbdev output");
        self.hardware = Some(hardware);
    }

    /// Paint `damage` into the shadow surface, copy it onto the device and
    /// arm the frame timer.
    pub fn repaint<D, H>(
        &mut self,
        damage: &[Rectangle<i32, Physical>],
        rasterizer: &mut dyn Rasterizer,
        host: &mut H,
        handle: &LoopHandle<'static, D>,
    ) where
        D: FbdevHandler,
        H: CompositorHost + ?Sized,
    {
        profiling::scope!("fbdev_repaint");
        self.repaint_needed = false;

        let Some(hardware) = self.hardware.as_mut() else {
            trace!(output = %self.id, "Skipping repaint of a disabled output");
            return;
        };

        rasterizer.repaint_output(self.id, &mut self.shadow, damage);
        for rect in damage {
            hardware.composite(&self.shadow, self.transform, *rect);
        }
        host.subtract_damage(damage);

        self.arm_frame_timer(handle);
    }

    fn arm_frame_timer<D: FbdevHandler>(&mut self, handle: &LoopHandle<'static, D>) {
        if let Some(timer) = self.frame_timer.take() {
            timer.cancel(handle);
        }

        let period = Duration::from_millis(u64::from(1_000_000 / self.mode.refresh.max(1)));
        let fired = Rc::new(Cell::new(false));
        let id = self.id;

        let callback_fired = fired.clone();
        let token = handle
            .insert_source(Timer::from_duration(period), move |_, _, data| {
                callback_fired.set(true);
                data.frame_finished(id, wall_clock_msec());
                TimeoutAction::Drop
            })
            .map_err(|e| {
                error!(output = %id, "Failed to register frame timer: {e}");
            })
            .ok();

        self.frame_timer = token.map(|token| FrameTimer { token, fired });
    }

    /// Tear the output down: renderer state, pending frame timer, mapping.
    pub(crate) fn destroy<D>(mut self, rasterizer: &mut dyn Rasterizer, handle: &LoopHandle<'static, D>) {
        info!(output = %self.id, "Destroying fbdev output");
        rasterizer.destroy_output(self.id);
        if let Some(timer) = self.frame_timer.take() {
            timer.cancel(handle);
        }
        self.disable();
    }
}
