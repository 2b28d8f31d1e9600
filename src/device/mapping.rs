//! Write-only views of framebuffer memory

use std::io;
use std::os::unix::io::BorrowedFd;
use std::ptr::{self, NonNull};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, error};

/// Device memory the compositor writes pixels into.
///
/// The memory is never read back: device reads are slow, and the real mapping
/// is write-only.
pub trait DeviceMemory {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` into the memory starting at `offset`. Bytes past the end of
    /// the memory are dropped.
    fn write(&mut self, offset: usize, src: &[u8]);

    /// Release the memory, reporting a failed unmap.
    fn unmap(self: Box<Self>) -> io::Result<()>;
}

/// A shared, write-only `mmap` of a framebuffer device.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    /// Map `len` bytes of `fd` from offset 0.
    pub fn map(fd: BorrowedFd<'_>, len: usize) -> io::Result<Self> {
        // SAFETY: a fresh mapping at an address chosen by the kernel aliases no
        // Rust-managed memory.
        let ptr = unsafe { mmap(ptr::null_mut(), len, ProtFlags::WRITE, MapFlags::SHARED, fd, 0) }?;
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))?;
        debug!(len, "Mapped frame buffer");
        Ok(Self { ptr, len })
    }

    fn release(&mut self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let len = std::mem::take(&mut self.len);
        // SAFETY: `ptr`/`len` describe a live mapping created in `map`, and
        // `len` is zeroed first so it is unmapped at most once.
        unsafe { munmap(self.ptr.as_ptr().cast(), len) }?;
        Ok(())
    }
}

impl DeviceMemory for MmapRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        if offset >= self.len {
            return;
        }
        let count = src.len().min(self.len - offset);
        // SAFETY: the destination range lies inside the mapping and cannot
        // overlap `src`, which is ordinary process memory.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), count);
        }
    }

    fn unmap(mut self: Box<Self>) -> io::Result<()> {
        self.release()
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!("Failed to munmap frame buffer: {err}");
        }
    }
}

/// Heap memory standing in for a device, useful for headless runs.
#[derive(Debug, Default)]
pub struct HeapMemory {
    bytes: Vec<u8>,
}

impl HeapMemory {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl DeviceMemory for HeapMemory {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        if offset >= self.bytes.len() {
            return;
        }
        let count = src.len().min(self.bytes.len() - offset);
        self.bytes[offset..offset + count].copy_from_slice(&src[..count]);
    }

    fn unmap(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
