//! The fbdev backend: outputs on framebuffer devices, their input seats and
//! the terminal they share.

pub mod output;
pub mod surface;
mod vt;

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use smithay::reexports::calloop::LoopHandle;
use smithay::utils::{Physical, Rectangle};
use tracing::{debug, error, info};

pub use output::FbdevOutput;
pub use vt::VtState;

use crate::config::FbdevConfig;
use crate::device::DeviceOpener;
use crate::error::FbdevResult;
use crate::host::{ActivityState, CompositorHost, FbdevHandler, OutputId};
use crate::input::{InputDiscovery, InputSeat};
use crate::keybindings::{vt_switch_bindings, KeyAction};
use crate::render::Rasterizer;
use crate::tty::Tty;

/// Where the backend gets its collaborators from.
pub trait Platform {
    fn open_discovery(&mut self) -> FbdevResult<Box<dyn InputDiscovery>>;

    /// Open the terminal and hook its VT notifications up to the event loop.
    /// A `vt` other than 0 is switched to.
    fn open_tty(&mut self, vt: u32) -> FbdevResult<Box<dyn Tty>>;

    fn create_rasterizer(&mut self) -> FbdevResult<Box<dyn Rasterizer>>;

    fn device_opener(&mut self) -> Box<dyn DeviceOpener>;
}

/// Backend state. Fields are dropped in reverse order of acquisition.
pub struct FbdevBackend<D: FbdevHandler> {
    outputs: Vec<FbdevOutput>,
    seats: Vec<Box<dyn InputSeat>>,
    rasterizer: Box<dyn Rasterizer>,
    tty: Box<dyn Tty>,
    discovery: Box<dyn InputDiscovery>,
    opener: Box<dyn DeviceOpener>,
    handle: LoopHandle<'static, D>,
    config: FbdevConfig,
    vt_state: VtState,
    prev_state: ActivityState,
    /// Devices whose output could not be rebuilt; retried on the next enter.
    lost_devices: Vec<Arc<Path>>,
    next_output_id: NonZeroU32,
}

impl<D: FbdevHandler> std::fmt::Debug for FbdevBackend<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbdevBackend")
            .field("outputs", &self.outputs)
            .field("seats", &self.seats.len())
            .field("config", &self.config)
            .field("vt_state", &self.vt_state)
            .field("prev_state", &self.prev_state)
            .field("lost_devices", &self.lost_devices)
            .finish_non_exhaustive()
    }
}

impl<D: FbdevHandler> FbdevBackend<D> {
    /// Bring the backend up: discovery, terminal, VT bindings, rasterizer, one
    /// output for the configured device and one seat.
    ///
    /// On failure everything acquired so far is released in reverse order and
    /// the host is shut down.
    pub fn new<H, P>(
        config: FbdevConfig,
        handle: LoopHandle<'static, D>,
        host: &mut H,
        platform: &mut P,
    ) -> FbdevResult<Self>
    where
        H: CompositorHost + ?Sized,
        P: Platform + ?Sized,
    {
        info!(device = %config.device.display(), tty = config.tty, "Initializing fbdev backend");

        let backend = Self::init(config, handle, host, platform);
        if let Err(err) = &backend {
            error!("Failed to initialize fbdev backend: {err}");
            host.shutdown();
        }
        backend
    }

    fn init<H, P>(
        config: FbdevConfig,
        handle: LoopHandle<'static, D>,
        host: &mut H,
        platform: &mut P,
    ) -> FbdevResult<Self>
    where
        H: CompositorHost + ?Sized,
        P: Platform + ?Sized,
    {
        let discovery = platform.open_discovery().map_err(|err| {
            error!("Failed to initialize device discovery: {err}");
            err
        })?;
        let tty = platform.open_tty(config.tty).map_err(|err| {
            error!("Failed to initialize tty: {err}");
            err
        })?;

        host.set_focus(true);
        host.set_activity(ActivityState::Active);
        for binding in vt_switch_bindings() {
            host.add_key_binding(binding);
        }

        let rasterizer = platform.create_rasterizer()?;

        let mut backend = Self {
            outputs: Vec::new(),
            seats: Vec::new(),
            rasterizer,
            tty,
            discovery,
            opener: platform.device_opener(),
            handle,
            config,
            vt_state: VtState::Active,
            prev_state: ActivityState::Active,
            lost_devices: Vec::new(),
            next_output_id: NonZeroU32::MIN,
        };

        let device = backend.config.device.clone();
        backend.create_output(host, device)?;

        let seat = backend.discovery.create_seat(&backend.config.seat).map_err(|err| {
            error!(seat = %backend.config.seat, "Failed to create input seat: {err}");
            err
        })?;
        backend.seats.push(seat);

        Ok(backend)
    }

    fn next_id(&mut self) -> OutputId {
        let id = OutputId::new(self.next_output_id);
        self.next_output_id = self.next_output_id.checked_add(1).unwrap_or(NonZeroU32::MIN);
        id
    }

    /// Create an output for `device`, register it with the host and append it.
    fn create_output<H>(&mut self, host: &mut H, device: Arc<Path>) -> FbdevResult<OutputId>
    where
        H: CompositorHost + ?Sized,
    {
        let id = self.next_id();
        let output = FbdevOutput::create(
            id,
            device,
            self.config.transform,
            self.opener.as_ref(),
            self.rasterizer.as_mut(),
        )?;
        host.register_output(&output.descriptor());
        self.outputs.push(output);
        Ok(id)
    }

    fn destroy_output<H>(&mut self, host: &mut H, index: usize)
    where
        H: CompositorHost + ?Sized,
    {
        let output = self.outputs.remove(index);
        host.unregister_output(output.id());
        output.destroy(self.rasterizer.as_mut(), &self.handle);
    }

    /// Tear the backend down: seats, outputs, the host core, then the
    /// rasterizer, terminal and discovery context.
    pub fn destroy<H>(mut self, host: &mut H)
    where
        H: CompositorHost + ?Sized,
    {
        info!("Destroying fbdev backend");
        self.seats.clear();
        while !self.outputs.is_empty() {
            self.destroy_output(host, 0);
        }
        host.shutdown();
    }

    /// Reset the terminal after an abnormal exit.
    pub fn restore(&mut self) {
        info!("Restoring tty");
        self.tty.reset();
    }

    pub fn handle_key_action(&mut self, action: KeyAction) -> FbdevResult<()> {
        match action {
            KeyAction::VtSwitch(vt) => {
                info!(vt, "Switching VT");
                self.tty.activate_vt(vt)
            }
            other => {
                debug!(action = ?other, "Key action not handled by the fbdev backend");
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &FbdevConfig {
        &self.config
    }

    pub fn outputs(&self) -> &[FbdevOutput] {
        &self.outputs
    }

    pub fn output(&self, id: OutputId) -> Option<&FbdevOutput> {
        self.outputs.iter().find(|o| o.id() == id)
    }

    pub fn output_ids(&self) -> Vec<OutputId> {
        self.outputs.iter().map(FbdevOutput::id).collect()
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn vt_state(&self) -> VtState {
        self.vt_state
    }

    /// Devices waiting to get their output back on the next VT enter.
    pub fn lost_devices(&self) -> &[Arc<Path>] {
        &self.lost_devices
    }

    pub fn schedule_repaint(&mut self, id: OutputId) {
        if let Some(output) = self.outputs.iter_mut().find(|o| o.id() == id) {
            output.schedule_repaint();
        }
    }

    /// Enabled outputs that want a repaint and have no frame in flight.
    pub fn outputs_needing_repaint(&self) -> Vec<OutputId> {
        self.outputs
            .iter()
            .filter(|o| o.is_enabled() && o.repaint_needed() && !o.frame_pending())
            .map(FbdevOutput::id)
            .collect()
    }

    pub fn repaint_output<H>(
        &mut self,
        id: OutputId,
        damage: &[Rectangle<i32, Physical>],
        host: &mut H,
    ) where
        H: CompositorHost + ?Sized,
    {
        let Some(output) = self.outputs.iter_mut().find(|o| o.id() == id) else {
            debug!(output = %id, "Repaint requested for an unknown output");
            return;
        };
        output.repaint(damage, self.rasterizer.as_mut(), host, &self.handle);
    }
}
