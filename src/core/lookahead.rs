//! One-slot look-ahead decode pipeline.
//!
//! A helper thread decodes the next source frame while the control thread
//! computes and presents the current one. At most one request is in flight;
//! `prefetch` is ignored while the slot is busy. `take` hands the result to
//! the control thread only when it asks for exactly the prefetched
//! (source, frame); anything else discards the slot so stale decodes are
//! never consumed out of order.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, error, trace};
use std::thread;
use uuid::Uuid;

use crate::entities::{DecodeRequest, DecodedFrame, EngineError, NodeRef};

/// Outcome of one look-ahead decode.
pub type Decoded = Result<Vec<DecodedFrame>, EngineError>;

struct Job {
    source: NodeRef,
    frame: i32,
    forward: bool,
}

pub struct Lookahead {
    requests: Option<Sender<Job>>,
    results: Receiver<Decoded>,
    pending: Option<(Uuid, i32)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Lookahead {
    pub fn new() -> Self {
        let (req_tx, req_rx) = bounded::<Job>(1);
        let (res_tx, res_rx) = bounded::<Decoded>(1);

        let spawned = thread::Builder::new()
            .name("nodeplay-lookahead".into())
            .spawn(move || run_helper(req_rx, res_tx));
        let (requests, handle) = match spawned {
            Ok(h) => (Some(req_tx), Some(h)),
            Err(e) => {
                error!("Failed to spawn look-ahead thread: {}", e);
                (None, None)
            }
        };

        Self {
            requests,
            results: res_rx,
            pending: None,
            handle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<(Uuid, i32)> {
        self.pending
    }

    /// Start decoding `frame` of `source` ahead of time. Returns false if the
    /// slot is busy, `source` is not a source node, or there is no helper.
    pub fn prefetch(&mut self, source: &NodeRef, frame: i32, forward: bool) -> bool {
        if self.pending.is_some() || source.as_source().is_none() {
            return false;
        }
        let Some(requests) = &self.requests else {
            return false;
        };
        let job = Job {
            source: source.clone(),
            frame,
            forward,
        };
        match requests.try_send(job) {
            Ok(()) => {
                self.pending = Some((source.uuid(), frame));
                trace!("Look-ahead queued: {} frame {}", source.name(), frame);
                true
            }
            Err(_) => false,
        }
    }

    /// Consume the slot if it holds (`source`, `frame`). Blocks until the
    /// helper finishes that decode. A mismatching slot is discarded.
    pub fn take(&mut self, source: Uuid, frame: i32) -> Option<Decoded> {
        let pending = self.pending.take()?;
        let result = self.results.recv().ok();
        if pending == (source, frame) {
            trace!("Look-ahead hit: frame {}", frame);
            result
        } else {
            debug!(
                "Look-ahead discarded: had frame {}, wanted frame {}",
                pending.1, frame
            );
            None
        }
    }

    /// Drop whatever is in flight.
    pub fn reset(&mut self) {
        if self.pending.take().is_some() {
            let _ = self.results.recv();
            debug!("Look-ahead slot reset");
        }
    }
}

impl Default for Lookahead {
    fn default() -> Self {
        Self::new()
    }
}

fn run_helper(requests: Receiver<Job>, results: Sender<Decoded>) {
    trace!("Look-ahead helper started");
    for job in requests {
        let decoded = match job.source.as_source() {
            Some(src) => src
                .decode(DecodeRequest {
                    frame: job.frame,
                    use_current_thread: false,
                    use_other_thread: true,
                    forward: job.forward,
                })
                .and_then(|mut frames| {
                    for f in frames.iter_mut() {
                        f.wait()?;
                    }
                    Ok(frames)
                }),
            None => Ok(Vec::new()),
        };
        if results.send(decoded).is_err() {
            break;
        }
    }
    trace!("Look-ahead helper stopped");
}

impl Drop for Lookahead {
    fn drop(&mut self) {
        // closing the request channel ends the helper loop
        self.requests.take();
        while self.results.try_recv().is_ok() {}
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
