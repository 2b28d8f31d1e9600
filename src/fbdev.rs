//! Running on a real framebuffer: a libseat session stands in for the
//! terminal, libinput provides the seat.

use std::io;
use std::path::Path;
use std::time::Duration;

use smithay::{
    backend::{
        input::{InputBackend, InputEvent, KeyboardKeyEvent},
        libinput::{LibinputInputBackend, LibinputSessionInterface},
        session::{
            libseat::{LibSeatSession, LibSeatSessionNotifier},
            Event as SessionEvent, Session,
        },
    },
    input::keyboard::Keysym,
    reexports::{
        calloop::{EventLoop, LoopHandle, RegistrationToken},
        input::Libinput,
        rustix::fs::OFlags,
    },
};
use tracing::{debug, error, info};

use crate::backend::{FbdevBackend, Platform, VtState};
use crate::config::FbdevConfig;
use crate::device::{DeviceOpener, FbdevNode, FramebufferDevice};
use crate::error::{log_error, FbdevError, FbdevResult};
use crate::host::{BasicHost, FbdevHandler, OutputId};
use crate::input::{InputDiscovery, InputSeat};
use crate::keybindings::{ctrl_alt, KeyAction, KeyBinding, XkbKeyboard};
use crate::render::{Rasterizer, SolidColorRasterizer};
use crate::tty::{Tty, VtEvent};

pub struct FbdevState {
    pub backend: FbdevBackend<FbdevState>,
    pub host: BasicHost,
    pub keyboard: XkbKeyboard,
    pub running: bool,
}

impl FbdevHandler for FbdevState {
    fn frame_finished(&mut self, output: OutputId, time_msec: u32) {
        self.host.frame_finished(output, time_msec);
    }

    fn vt_event(&mut self, event: VtEvent) {
        info!(?event, "VT event");
        if let Err(err) = self.backend.handle_vt_event(&mut self.host, event) {
            error!("VT switch left an output unusable: {err}");
        }
    }
}

impl FbdevState {
    pub fn process_input_event<B: InputBackend>(&mut self, event: InputEvent<B>) {
        let InputEvent::Keyboard { event, .. } = event else {
            return;
        };
        let state = event.state();
        let (modifiers, raw_keysym) = self.keyboard.input(event.key_code(), state);
        let Some(raw_keysym) = raw_keysym else {
            return;
        };

        match self.host.process_key(&modifiers, raw_keysym, state) {
            Some(KeyAction::Quit) => {
                info!("Quit requested");
                self.running = false;
            }
            Some(action) => {
                log_error(self.backend.handle_key_action(action));
            }
            None => {}
        }
    }

    /// Repaint every output the host has damage for.
    fn repaint(&mut self) {
        if self.backend.vt_state() == VtState::Suspended {
            return;
        }
        if self.host.has_damage() {
            for id in self.backend.output_ids() {
                self.backend.schedule_repaint(id);
            }
        }

        let damage = self.host.damage().to_vec();
        for id in self.backend.outputs_needing_repaint() {
            self.backend.repaint_output(id, &damage, &mut self.host);
        }
    }
}

struct SessionTty {
    session: LibSeatSession,
    notifier: Option<RegistrationToken>,
    handle: LoopHandle<'static, FbdevState>,
}

impl Tty for SessionTty {
    fn activate_vt(&mut self, vt: i32) -> FbdevResult<()> {
        self.session
            .change_vt(vt)
            .map_err(|err| FbdevError::Backend(format!("Failed to switch to VT {vt}: {err}")))
    }

    fn reset(&mut self) {
        // the seat daemon puts the terminal back into text mode once the
        // session goes away
        info!(seat = %self.session.seat(), "Leaving terminal reset to the seat daemon");
    }
}

impl Drop for SessionTty {
    fn drop(&mut self) {
        if let Some(token) = self.notifier.take() {
            self.handle.remove(token);
        }
    }
}

struct LibinputDiscovery {
    session: LibSeatSession,
    handle: LoopHandle<'static, FbdevState>,
}

impl InputDiscovery for LibinputDiscovery {
    fn create_seat(&mut self, name: &str) -> FbdevResult<Box<dyn InputSeat>> {
        let mut context = Libinput::new_with_udev::<LibinputSessionInterface<LibSeatSession>>(
            self.session.clone().into(),
        );
        context
            .udev_assign_seat(name)
            .map_err(|_| FbdevError::Backend(format!("Failed to assign udev seat {name}")))?;

        let backend = LibinputInputBackend::new(context.clone());
        let token = self
            .handle
            .insert_source(backend, |event, _, data| data.process_input_event(event))
            .map_err(|e| {
                error!("Failed to insert libinput source: {:?}", e);
                FbdevError::Backend(format!("Failed to insert libinput source: {e}"))
            })?;

        info!(seat = name, "Input seat created");
        Ok(Box::new(LibinputSeat {
            name: name.to_owned(),
            context,
            token: Some(token),
            handle: self.handle.clone(),
        }))
    }
}

struct LibinputSeat {
    name: String,
    context: Libinput,
    token: Option<RegistrationToken>,
    handle: LoopHandle<'static, FbdevState>,
}

impl InputSeat for LibinputSeat {
    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&mut self) -> FbdevResult<()> {
        self.context
            .resume()
            .map_err(|_| FbdevError::Backend("Failed to resume libinput context".into()))
    }

    fn disable(&mut self) {
        self.context.suspend();
    }
}

impl Drop for LibinputSeat {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.remove(token);
        }
    }
}

/// Opens framebuffer nodes through the seat daemon, which revokes them while
/// the session is paused.
struct SessionOpener {
    session: LibSeatSession,
}

impl DeviceOpener for SessionOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>> {
        let fd = self
            .session
            .clone()
            .open(path, OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        Ok(Box::new(FbdevNode::from_fd(fd, path)))
    }
}

struct SessionPlatform {
    session: LibSeatSession,
    notifier: Option<LibSeatSessionNotifier>,
    handle: LoopHandle<'static, FbdevState>,
}

impl Platform for SessionPlatform {
    fn open_discovery(&mut self) -> FbdevResult<Box<dyn InputDiscovery>> {
        Ok(Box::new(LibinputDiscovery {
            session: self.session.clone(),
            handle: self.handle.clone(),
        }))
    }

    fn open_tty(&mut self, vt: u32) -> FbdevResult<Box<dyn Tty>> {
        let notifier = self
            .notifier
            .take()
            .ok_or_else(|| FbdevError::Backend("session notifier already bound".into()))?;

        let token = self
            .handle
            .insert_source(notifier, |event, &mut (), data| match event {
                SessionEvent::PauseSession => data.vt_event(VtEvent::Leave),
                SessionEvent::ActivateSession => data.vt_event(VtEvent::Enter),
            })
            .map_err(|e| {
                error!("Failed to insert session notifier source: {:?}", e);
                FbdevError::Backend(format!("Failed to insert session notifier source: {e}"))
            })?;

        let mut tty = SessionTty {
            session: self.session.clone(),
            notifier: Some(token),
            handle: self.handle.clone(),
        };

        if vt != 0 {
            let vt = i32::try_from(vt).map_err(|_| FbdevError::Config(format!("invalid tty {vt}")))?;
            tty.activate_vt(vt)?;
        }

        Ok(Box::new(tty))
    }

    fn create_rasterizer(&mut self) -> FbdevResult<Box<dyn Rasterizer>> {
        Ok(Box::new(SolidColorRasterizer::default()))
    }

    fn device_opener(&mut self) -> Box<dyn DeviceOpener> {
        Box::new(SessionOpener {
            session: self.session.clone(),
        })
    }
}

pub fn run_fbdev(config: FbdevConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut event_loop: EventLoop<'static, FbdevState> =
        EventLoop::try_new().map_err(|e| format!("Failed to create event loop: {e}"))?;

    /*
     * Initialize session
     */
    let (session, notifier) = match LibSeatSession::new() {
        Ok(ret) => ret,
        Err(err) => {
            return Err(format!("Could not initialize a session: {err}").into());
        }
    };
    info!(seat = %session.seat(), "Session started");

    /*
     * Initialize the backend
     */
    let keyboard = XkbKeyboard::new()?;
    let mut host = BasicHost::new();
    let mut platform = SessionPlatform {
        session,
        notifier: Some(notifier),
        handle: event_loop.handle(),
    };
    let backend = FbdevBackend::new(config, event_loop.handle(), &mut host, &mut platform)?;

    host.add_key_binding(KeyBinding {
        key: Keysym::BackSpace,
        modifiers: ctrl_alt(),
        action: KeyAction::Quit,
    });

    let mut state = FbdevState {
        backend,
        host,
        keyboard,
        running: true,
    };

    /*
     * And run our loop
     */
    while state.running {
        if let Err(err) = event_loop.dispatch(Some(Duration::from_millis(16)), &mut state) {
            error!("Event loop failed: {err}");
            state.backend.restore();
            return Err(err.into());
        }
        state.repaint();
    }

    debug!("Leaving main loop");
    let FbdevState {
        backend, mut host, ..
    } = state;
    backend.destroy(&mut host);
    Ok(())
}
