//! Pseudo-terminal allocation for interactive channels.
//!
//! Wraps portable-pty. No process is ever attached to the slave side: the
//! terminal line discipline alone provides echo for whatever the client types.

use std::{
    io::{Read, Write}, sync::{
        Mutex as StdMutex, atomic::{AtomicBool, Ordering}
    }
};

use portable_pty::{MasterPty, PtySize, SlavePty, native_pty_system};
use tracing::debug;

use crate::error::{HoneypotError, HoneypotResult};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TermSize {
    /// Build from the 32-bit wire values, saturating at `u16::MAX`.
    pub fn from_wire(cols: u32, rows: u32) -> Self {
        Self {
            cols: cols.min(u16::MAX as u32) as u16,
            rows: rows.min(u16::MAX as u32) as u16,
        }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Parameters of a `pty-req`; terminal modes are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub size: TermSize,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// New dimensions from a `window-change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    pub size: TermSize,
}

/// A master/slave pair owned by exactly one channel.
pub struct PtyHandle {
    master: StdMutex<Box<dyn MasterPty + Send>>,
    slave: StdMutex<Option<Box<dyn SlavePty + Send>>>,
    reader: StdMutex<Option<Box<dyn Read + Send>>>,
    writer: StdMutex<Option<Box<dyn Write + Send>>>,
    closed: AtomicBool,
}

impl PtyHandle {
    /// Current dimensions as seen by the terminal driver.
    pub fn size(&self) -> HoneypotResult<TermSize> {
        let master = self.master.lock().map_err(|_| HoneypotError::pty("master lock poisoned"))?;
        let size = master.get_size().map_err(HoneypotError::pty)?;
        Ok(TermSize {
            cols: size.cols,
            rows: size.rows,
        })
    }

    /// Hand the output side to the relay; only the first caller gets it.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().ok().and_then(|mut reader| reader.take())
    }

    /// Feed client keystrokes into the terminal.
    pub fn write(&self, data: &[u8]) -> HoneypotResult<()> {
        let mut writer = self.writer.lock().map_err(|_| HoneypotError::pty("writer lock poisoned"))?;
        let writer = writer.as_mut().ok_or_else(|| HoneypotError::pty("pty closed"))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the slave and the input side; a pending read on the master then fails.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
        if let Ok(mut slave) = self.slave.lock() {
            slave.take();
        }
        debug!("pty closed");
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Allocates and resizes pseudo-terminals.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyManager;

impl PtyManager {
    pub fn open(&self, size: TermSize) -> HoneypotResult<PtyHandle> {
        let pair = native_pty_system()
            .openpty(size.to_pty_size())
            .map_err(|e| HoneypotError::pty(format!("openpty failed: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| HoneypotError::pty(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| HoneypotError::pty(format!("failed to take writer: {e}")))?;

        Ok(PtyHandle {
            master: StdMutex::new(pair.master),
            slave: StdMutex::new(Some(pair.slave)),
            reader: StdMutex::new(Some(reader)),
            writer: StdMutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        })
    }

    /// Apply new dimensions immediately.
    pub fn resize(&self, pty: &PtyHandle, size: TermSize) -> HoneypotResult<()> {
        if pty.is_closed() {
            return Err(HoneypotError::pty("pty closed"));
        }
        let master = pty.master.lock().map_err(|_| HoneypotError::pty("master lock poisoned"))?;
        master.resize(size.to_pty_size()).map_err(HoneypotError::pty)
    }
}
