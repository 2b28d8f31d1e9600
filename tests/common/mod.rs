//! Common testing utilities for stilch-fbdev integration tests
//!
//! Everything runs against an in-memory framebuffer whose mode can be changed
//! between VT switches, and recording stand-ins for the terminal, seats,
//! discovery context and rasterizer.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use smithay::reexports::calloop::EventLoop;
use smithay::utils::{Physical, Rectangle};
use stilch_fbdev::backend::{FbdevBackend, Platform};
use stilch_fbdev::device::sys::{
    FbBitfield, FbFixScreeninfo, FbVarScreeninfo, FB_TYPE_PACKED_PIXELS, FB_VISUAL_TRUECOLOR,
};
use stilch_fbdev::device::{DeviceMemory, DeviceOpener, FramebufferDevice};
use stilch_fbdev::host::{BasicHost, FbdevHandler, OutputId};
use stilch_fbdev::input::{InputDiscovery, InputSeat};
use stilch_fbdev::render::{Rasterizer, SolidColorRasterizer};
use stilch_fbdev::tty::{Tty, VtEvent};
use stilch_fbdev::{FbdevConfig, FbdevError, FbdevResult};

pub const DEVICE: &str = "/dev/fb-test";

/// Shared, ordered log of what the fakes were asked to do.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<String>>>);

impl Recorder {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == event).count()
    }

    /// Events starting with `prefix`, in order.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Drop notifications, in order.
    pub fn drops(&self) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|e| e.ends_with(" dropped"))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Debug)]
pub struct FramebufferState {
    pub var: FbVarScreeninfo,
    pub fix: FbFixScreeninfo,
    pub memory: Vec<u8>,
    pub opens: u32,
    pub live_mappings: u32,
    pub mode_sets: Vec<FbVarScreeninfo>,
    pub accept_mode_set: bool,
    /// Scripted open results, `true` meaning the open fails
    pub open_failures: VecDeque<bool>,
    /// How many of the next unmaps report an error
    pub unmap_failures: u32,
    pub failed_unmaps: u32,
}

/// An in-memory framebuffer device.
#[derive(Debug, Clone)]
pub struct FakeFramebuffer(Rc<RefCell<FramebufferState>>);

impl FakeFramebuffer {
    /// A 32bpp x8r8g8b8 device without timings (60 Hz).
    pub fn new(width: u32, height: u32) -> Self {
        let var = FbVarScreeninfo {
            xres: width,
            yres: height,
            xres_virtual: width,
            yres_virtual: height,
            bits_per_pixel: 32,
            red: FbBitfield::new(16, 8),
            green: FbBitfield::new(8, 8),
            blue: FbBitfield::new(0, 8),
            transp: FbBitfield::new(24, 0),
            width: 300,
            height: 200,
            ..Default::default()
        };
        let mut fix = FbFixScreeninfo {
            smem_len: width * height * 4,
            line_length: width * 4,
            type_: FB_TYPE_PACKED_PIXELS,
            visual: FB_VISUAL_TRUECOLOR,
            ..Default::default()
        };
        fix.id[..7].copy_from_slice(b"fake-fb");

        Self(Rc::new(RefCell::new(FramebufferState {
            var,
            fix,
            memory: Vec::new(),
            opens: 0,
            live_mappings: 0,
            mode_sets: Vec::new(),
            accept_mode_set: false,
            open_failures: VecDeque::new(),
            unmap_failures: 0,
            failed_unmaps: 0,
        })))
    }

    /// 1920×1080 a8r8g8b8 with a 16.683ms blanking-inclusive frame.
    pub fn full_hd_argb() -> Self {
        let fb = Self::new(1920, 1080);
        fb.update(|var, _| {
            var.transp = FbBitfield::new(24, 8);
            // 2500 × 1200 total pixels at 5561 ps
            var.left_margin = 300;
            var.right_margin = 280;
            var.upper_margin = 80;
            var.lower_margin = 40;
            var.pixclock = 5561;
        });
        fb
    }

    pub fn update(&self, f: impl FnOnce(&mut FbVarScreeninfo, &mut FbFixScreeninfo)) {
        let mut state = self.0.borrow_mut();
        let state = &mut *state;
        f(&mut state.var, &mut state.fix);
    }

    /// Change the resolution behind the compositor's back.
    pub fn set_resolution(&self, width: u32, height: u32) {
        self.update(|var, fix| {
            var.xres = width;
            var.yres = height;
            var.xres_virtual = width;
            var.yres_virtual = height;
            fix.line_length = width * var.bits_per_pixel / 8;
            fix.smem_len = fix.line_length * height;
        });
    }

    pub fn accept_mode_set(&self, accept: bool) {
        self.0.borrow_mut().accept_mode_set = accept;
    }

    /// Script the outcome of the next opens, `true` meaning failure.
    pub fn script_opens(&self, failures: &[bool]) {
        self.0.borrow_mut().open_failures.extend(failures.iter().copied());
    }

    /// Make the next `count` unmaps fail. The memory is released anyway.
    pub fn script_unmap_failures(&self, count: u32) {
        self.0.borrow_mut().unmap_failures = count;
    }

    pub fn failed_unmaps(&self) -> u32 {
        self.0.borrow().failed_unmaps
    }

    pub fn opens(&self) -> u32 {
        self.0.borrow().opens
    }

    pub fn live_mappings(&self) -> u32 {
        self.0.borrow().live_mappings
    }

    pub fn mode_sets(&self) -> Vec<FbVarScreeninfo> {
        self.0.borrow().mode_sets.clone()
    }

    /// Read a 32bpp pixel back from device memory.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let state = self.0.borrow();
        let start = (y * state.fix.line_length + x * 4) as usize;
        u32::from_ne_bytes(state.memory[start..start + 4].try_into().unwrap())
    }

    pub fn opener(&self) -> FakeOpener {
        FakeOpener(self.clone())
    }
}

pub struct FakeOpener(FakeFramebuffer);

impl DeviceOpener for FakeOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>> {
        let mut state = (self.0).0.borrow_mut();
        if state.open_failures.pop_front().unwrap_or(false) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        state.opens += 1;
        Ok(Box::new(FakeDevice {
            fb: self.0.clone(),
            path: path.to_owned(),
        }))
    }
}

struct FakeDevice {
    fb: FakeFramebuffer,
    path: PathBuf,
}

impl FramebufferDevice for FakeDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn fix_screen_info(&self) -> io::Result<FbFixScreeninfo> {
        Ok(self.fb.0.borrow().fix)
    }

    fn var_screen_info(&self) -> io::Result<FbVarScreeninfo> {
        Ok(self.fb.0.borrow().var)
    }

    fn put_var_screen_info(&mut self, info: &FbVarScreeninfo) -> io::Result<()> {
        let mut state = self.fb.0.borrow_mut();
        state.mode_sets.push(*info);
        if !state.accept_mode_set {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        state.var = *info;
        state.fix.line_length = info.xres * info.bits_per_pixel / 8;
        state.fix.smem_len = state.fix.smem_len.max(state.fix.line_length * info.yres);
        Ok(())
    }

    fn map_memory(self: Box<Self>, len: usize) -> io::Result<Box<dyn DeviceMemory>> {
        let mut state = self.fb.0.borrow_mut();
        if state.memory.len() < len {
            state.memory.resize(len, 0);
        }
        state.live_mappings += 1;
        Ok(Box::new(FakeMemory {
            fb: self.fb.clone(),
            len,
        }))
    }
}

struct FakeMemory {
    fb: FakeFramebuffer,
    len: usize,
}

impl DeviceMemory for FakeMemory {
    fn len(&self) -> usize {
        self.len
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        if offset >= self.len {
            return;
        }
        let count = src.len().min(self.len - offset);
        let mut state = self.fb.0.borrow_mut();
        state.memory[offset..offset + count].copy_from_slice(&src[..count]);
    }

    fn unmap(self: Box<Self>) -> io::Result<()> {
        let mut state = self.fb.0.borrow_mut();
        if state.unmap_failures > 0 {
            state.unmap_failures -= 1;
            state.failed_unmaps += 1;
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        Ok(())
    }
}

impl Drop for FakeMemory {
    fn drop(&mut self) {
        self.fb.0.borrow_mut().live_mappings -= 1;
    }
}

pub struct RecordingTty(Recorder);

impl Tty for RecordingTty {
    fn activate_vt(&mut self, vt: i32) -> FbdevResult<()> {
        self.0.push(format!("tty activate {vt}"));
        Ok(())
    }

    fn reset(&mut self) {
        self.0.push("tty reset");
    }
}

impl Drop for RecordingTty {
    fn drop(&mut self) {
        self.0.push("tty dropped");
    }
}

pub struct RecordingSeat(Recorder);

impl InputSeat for RecordingSeat {
    fn name(&self) -> &str {
        "seat-test"
    }

    fn enable(&mut self) -> FbdevResult<()> {
        self.0.push("seat enable");
        Ok(())
    }

    fn disable(&mut self) {
        self.0.push("seat disable");
    }
}

impl Drop for RecordingSeat {
    fn drop(&mut self) {
        self.0.push("seat dropped");
    }
}

pub struct RecordingDiscovery {
    recorder: Recorder,
    fail: bool,
}

impl InputDiscovery for RecordingDiscovery {
    fn create_seat(&mut self, name: &str) -> FbdevResult<Box<dyn InputSeat>> {
        if self.fail {
            return Err(FbdevError::Backend(format!("no seat {name}")));
        }
        self.recorder.push(format!("seat create {name}"));
        Ok(Box::new(RecordingSeat(self.recorder.clone())))
    }
}

impl Drop for RecordingDiscovery {
    fn drop(&mut self) {
        self.recorder.push("discovery dropped");
    }
}

pub struct RecordingRasterizer {
    inner: SolidColorRasterizer,
    recorder: Recorder,
}

impl Rasterizer for RecordingRasterizer {
    fn create_output(
        &mut self,
        output: OutputId,
        surface: &stilch_fbdev::backend::surface::ShadowSurface,
    ) -> FbdevResult<()> {
        self.recorder.push("rasterizer create");
        self.inner.create_output(output, surface)
    }

    fn destroy_output(&mut self, output: OutputId) {
        self.recorder.push("rasterizer destroy");
        self.inner.destroy_output(output);
    }

    fn repaint_output(
        &mut self,
        output: OutputId,
        target: &mut stilch_fbdev::backend::surface::ShadowSurface,
        damage: &[Rectangle<i32, Physical>],
    ) {
        self.recorder.push("rasterizer repaint");
        self.inner.repaint_output(output, target, damage);
    }
}

impl Drop for RecordingRasterizer {
    fn drop(&mut self) {
        self.recorder.push("rasterizer dropped");
    }
}

pub struct TestPlatform {
    pub fb: FakeFramebuffer,
    pub recorder: Recorder,
    pub color: u32,
    pub fail_tty: bool,
    pub fail_seat: bool,
}

impl Platform for TestPlatform {
    fn open_discovery(&mut self) -> FbdevResult<Box<dyn InputDiscovery>> {
        self.recorder.push("discovery open");
        Ok(Box::new(RecordingDiscovery {
            recorder: self.recorder.clone(),
            fail: self.fail_seat,
        }))
    }

    fn open_tty(&mut self, vt: u32) -> FbdevResult<Box<dyn Tty>> {
        if self.fail_tty {
            return Err(FbdevError::Backend("no tty".into()));
        }
        self.recorder.push("tty open");
        let mut tty = RecordingTty(self.recorder.clone());
        if vt != 0 {
            tty.activate_vt(vt as i32)?;
        }
        Ok(Box::new(tty))
    }

    fn create_rasterizer(&mut self) -> FbdevResult<Box<dyn Rasterizer>> {
        self.recorder.push("rasterizer open");
        Ok(Box::new(RecordingRasterizer {
            inner: SolidColorRasterizer::new(self.color),
            recorder: self.recorder.clone(),
        }))
    }

    fn device_opener(&mut self) -> Box<dyn DeviceOpener> {
        Box::new(self.fb.opener())
    }
}

/// Event loop data: what the loop delivered.
#[derive(Debug, Default)]
pub struct TestState {
    pub frames: Vec<(OutputId, u32)>,
    pub vt_events: Vec<VtEvent>,
}

impl FbdevHandler for TestState {
    fn frame_finished(&mut self, output: OutputId, time_msec: u32) {
        self.frames.push((output, time_msec));
    }

    fn vt_event(&mut self, event: VtEvent) {
        self.vt_events.push(event);
    }
}

/// Test environment: event loop, host and platform around one fake device.
pub struct TestEnv {
    pub event_loop: EventLoop<'static, TestState>,
    pub state: TestState,
    pub host: BasicHost,
    pub platform: TestPlatform,
    pub config: FbdevConfig,
}

impl TestEnv {
    pub fn new(fb: FakeFramebuffer) -> Self {
        let event_loop = EventLoop::try_new().expect("Failed to create event loop");
        let config = FbdevConfig {
            device: Arc::from(Path::new(DEVICE)),
            ..FbdevConfig::default()
        };
        Self {
            event_loop,
            state: TestState::default(),
            host: BasicHost::new(),
            platform: TestPlatform {
                fb,
                recorder: Recorder::default(),
                color: 0xff33_6699,
                fail_tty: false,
                fail_seat: false,
            },
            config,
        }
    }

    pub fn fb(&self) -> &FakeFramebuffer {
        &self.platform.fb
    }

    pub fn recorder(&self) -> Recorder {
        self.platform.recorder.clone()
    }

    pub fn start(&mut self) -> FbdevResult<FbdevBackend<TestState>> {
        FbdevBackend::new(
            self.config.clone(),
            self.event_loop.handle(),
            &mut self.host,
            &mut self.platform,
        )
    }

    /// Dispatch the loop until `done` holds or `timeout` passes.
    pub fn dispatch_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&TestState) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while !done(&self.state) {
            if Instant::now() >= deadline {
                return false;
            }
            self.event_loop
                .dispatch(Some(Duration::from_millis(5)), &mut self.state)
                .expect("Failed to dispatch event loop");
        }
        true
    }
}

pub fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Physical> {
    Rectangle::new((x, y).into(), (w, h).into())
}
