//! VT enter/leave handling
//!
//! Leaving the VT unmaps every output and stops the seats; entering maps them
//! again. An output whose device mode changed while we were away is rebuilt
//! from scratch under the same device path.

use std::mem;

use tracing::{debug, error, info, warn};

use super::FbdevBackend;
use crate::device;
use crate::error::{FbdevError, FbdevResult};
use crate::host::{CompositorHost, FbdevHandler, OutputId};
use crate::tty::VtEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtState {
    Active,
    Suspended,
}

impl<D: FbdevHandler> FbdevBackend<D> {
    pub fn handle_vt_event<H>(&mut self, host: &mut H, event: VtEvent) -> FbdevResult<()>
    where
        H: CompositorHost + ?Sized,
    {
        match event {
            VtEvent::Leave => {
                self.vt_leave(host);
                Ok(())
            }
            VtEvent::Enter => self.vt_enter(host),
        }
    }

    /// Give up the display: stop the seats, unmap every output and take the
    /// host offscreen. Does nothing when already suspended.
    pub fn vt_leave<H>(&mut self, host: &mut H)
    where
        H: CompositorHost + ?Sized,
    {
        if self.vt_state == VtState::Suspended {
            debug!("VT leave while suspended, ignoring");
            return;
        }
        info!("Leaving VT");

        for seat in &mut self.seats {
            seat.disable();
        }
        for output in &mut self.outputs {
            output.disable();
        }

        host.set_focus(false);
        self.prev_state = host.activity();
        host.enter_offscreen();

        for output in &mut self.outputs {
            output.clear_repaint();
        }

        self.vt_state = VtState::Suspended;
    }

    /// Take the display back. Does nothing when already active.
    ///
    /// An output that cannot be mapped again stays disabled until the next
    /// enter. An output that cannot be rebuilt after a mode change is
    /// reported once the rest of the enter has completed.
    pub fn vt_enter<H>(&mut self, host: &mut H) -> FbdevResult<()>
    where
        H: CompositorHost + ?Sized,
    {
        if self.vt_state == VtState::Active {
            debug!("VT enter while active, ignoring");
            return Ok(());
        }
        info!("Entering VT");

        host.set_focus(true);
        host.set_activity(self.prev_state);

        let lost = mem::take(&mut self.lost_devices);
        let mut result = Ok(());

        for id in self.output_ids() {
            if let Err(err) = self.reenable_output(host, id) {
                error!("{err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        for path in lost {
            info!(device = %path.display(), "Retrying lost fbdev output");
            if let Err(err) = self.create_output(host, path.clone()) {
                let err = FbdevError::Recreate {
                    path: path.to_path_buf(),
                    source: Box::new(err),
                };
                error!("{err}");
                self.lost_devices.push(path);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        host.damage_all();
        for seat in &mut self.seats {
            if let Err(err) = seat.enable() {
                error!(seat = seat.name(), "Failed to enable seat: {err}");
            }
        }

        self.vt_state = VtState::Active;
        result
    }

    /// Map `id` again, or rebuild it if its device mode changed.
    fn reenable_output<H>(&mut self, host: &mut H, id: OutputId) -> FbdevResult<()>
    where
        H: CompositorHost + ?Sized,
    {
        let Some(index) = self.outputs.iter().position(|o| o.id() == id) else {
            return Ok(());
        };
        let output = &self.outputs[index];
        if output.is_enabled() {
            return Ok(());
        }
        let path = output.device().clone();
        info!(output = %id, device = %path.display(), "Re-enabling fbdev output");

        let (mut node, screen_info) = match device::open_and_query(self.opener.as_ref(), &path) {
            Ok(opened) => opened,
            Err(err) => {
                warn!(output = %id, "Output stays disabled: {err}");
                return Ok(());
            }
        };

        if screen_info != *output.screen_info() {
            info!(
                output = %id,
                old = ?output.screen_info(),
                new = ?screen_info,
                "Frame buffer mode changed, rebuilding output"
            );
            if let Err(err) = device::set_mode(node.as_mut(), output.screen_info()) {
                warn!("Failed to restore mode settings. Attempting to re-open output anyway: {err}");
            }
            drop(node);

            self.destroy_output(host, index);
            return match self.create_output(host, path.clone()) {
                Ok(new_id) => {
                    self.move_last_to(index);
                    debug!(old = %id, new = %new_id, "Output rebuilt");
                    Ok(())
                }
                Err(err) => {
                    self.lost_devices.push(path.clone());
                    Err(FbdevError::Recreate {
                        path: path.to_path_buf(),
                        source: Box::new(err),
                    })
                }
            };
        }

        match device::map(node, &screen_info) {
            Ok(hardware) => self.outputs[index].enable(hardware),
            Err(err) => warn!(output = %id, "Output stays disabled: {err}"),
        }
        Ok(())
    }

    /// Keep a rebuilt output where its predecessor was.
    fn move_last_to(&mut self, index: usize) {
        if let Some(output) = self.outputs.pop() {
            self.outputs.insert(index.min(self.outputs.len()), output);
        }
    }
}
