//! HeadlessSurface - presentation target without a window.
//!
//! Keeps the last uploaded frame and counts uploads, resizes and redraws.
//! Used by the CLI when no display is attached and by tests.

use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::entities::{EngineError, PresentationSurface, StagingBuffer};

#[derive(Default)]
pub struct HeadlessSurface {
    next_id: AtomicU64,
    uploads: AtomicUsize,
    redraws: AtomicUsize,
    size: Mutex<(usize, usize)>,
    last: Mutex<Option<Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl HeadlessSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn uploaded_frames(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> (usize, usize) {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bytes of the most recent upload.
    pub fn last_upload(&self) -> Option<Vec<u8>> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make every upload fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

impl PresentationSurface for HeadlessSurface {
    fn map_staging(&self, byte_count: usize) -> Result<StagingBuffer, EngineError> {
        Ok(StagingBuffer {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            data: Vec::with_capacity(byte_count),
        })
    }

    fn upload(&self, staging: StagingBuffer, width: usize, height: usize) -> Result<(), EngineError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(EngineError::Transfer(format!("upload {} rejected", staging.id)));
        }
        trace!("Upload {}: {}x{} ({} bytes)", staging.id, width, height, staging.data.len());
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(staging.data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resize(&self, width: usize, height: usize) {
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = (width, height);
    }

    fn redraw(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
    }
}
