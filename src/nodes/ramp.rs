//! RampSource - procedural generator standing in for a file reader.
//!
//! Frame `f` is a horizontal red ramp, a vertical green ramp and a blue
//! level that cycles with `speed`, all scaled by `color`. Decoding fills a
//! small per-frame buffer on the calling thread, or on a spawned thread when
//! the request allows it, so the decode path behaves like a real reader
//! with asynchronous completion.

use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use uuid::Uuid;

use super::node_core::NodeCore;
use crate::entities::keys::*;
use crate::entities::{
    AttrValue, Attrs, Channel, ChannelSet, DecodeHandle, DecodeRequest, DecodedFrame, EngineError,
    Format, FrameEntry, GraphNode, NodeInfo, NodeRef, Row, RowContext, SourceNode,
};

/// Decoded frames kept around for row evaluation
const MAX_DECODED: usize = 4;

type Pixels = Arc<Vec<[f32; 4]>>;

#[derive(Clone, Copy)]
struct RampParams {
    width: i32,
    height: i32,
    color: [f32; 4],
    speed: f32,
}

impl RampParams {
    fn pixel(&self, x: i32, y: i32, frame: i32) -> [f32; 4] {
        let u = (x as f32 + 0.5) / self.width.max(1) as f32;
        let v = (y as f32 + 0.5) / self.height.max(1) as f32;
        let phase = (frame as f32 * self.speed).rem_euclid(1.0);
        [
            self.color[0] * u,
            self.color[1] * v,
            self.color[2] * phase,
            self.color[3],
        ]
    }

    fn render(&self, frame: i32) -> Vec<[f32; 4]> {
        let mut out = Vec::with_capacity((self.width * self.height).max(0) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.pixel(x, y, frame));
            }
        }
        out
    }
}

pub struct RampSource {
    core: NodeCore,
    decoded: Arc<Mutex<BTreeMap<i32, Pixels>>>,
    decodes: Arc<AtomicUsize>,
    helper_decodes: AtomicUsize,
    fail_frame: Mutex<Option<i32>>,
    validations: (AtomicUsize, AtomicUsize),
}

impl RampSource {
    pub fn new(name: &str, first: i32, last: i32, width: i32, height: i32) -> Arc<Self> {
        let attrs = Attrs::new()
            .with(A_FIRST, first)
            .with(A_LAST, last)
            .with(A_WIDTH, width)
            .with(A_HEIGHT, height)
            .with(A_COLOR, [1.0f32, 1.0, 1.0, 1.0])
            .with(A_SPEED, 0.1f32);
        Arc::new(Self {
            core: NodeCore::new(name, attrs, Vec::new()),
            decoded: Arc::new(Mutex::new(BTreeMap::new())),
            decodes: Arc::new(AtomicUsize::new(0)),
            helper_decodes: AtomicUsize::new(0),
            fail_frame: Mutex::new(None),
            validations: (AtomicUsize::new(0), AtomicUsize::new(0)),
        })
    }

    pub fn set_attr(&self, key: &str, value: impl Into<AttrValue>) {
        if self.core.set_attr(key, value) {
            self.decoded.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// Make decoding `frame` fail, for exercising error paths.
    pub fn fail_on(&self, frame: Option<i32>) {
        *self.fail_frame.lock().unwrap_or_else(|e| e.into_inner()) = frame;
    }

    /// Frames decoded so far, look-ahead included.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Decodes requested by a look-ahead helper rather than the control thread.
    pub fn helper_decode_count(&self) -> usize {
        self.helper_decodes.load(Ordering::SeqCst)
    }

    /// `(full, refresh)` validation counts.
    pub fn validations(&self) -> (usize, usize) {
        (
            self.validations.0.load(Ordering::SeqCst),
            self.validations.1.load(Ordering::SeqCst),
        )
    }

    pub fn decoded_frames(&self) -> Vec<i32> {
        self.decoded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    fn params(&self) -> RampParams {
        let attrs = self.core.attrs();
        RampParams {
            width: attrs.get_i32_or(A_WIDTH, 0),
            height: attrs.get_i32_or(A_HEIGHT, 0),
            color: attrs.get_color(A_COLOR).unwrap_or([1.0; 4]),
            speed: attrs.get_float_or(A_SPEED, 0.0),
        }
    }

    fn store(decoded: &Mutex<BTreeMap<i32, Pixels>>, frame: i32, pixels: Vec<[f32; 4]>) {
        let mut map = decoded.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(frame, Arc::new(pixels));
        while map.len() > MAX_DECODED {
            // evict the frame farthest from the newest one
            let far = map
                .keys()
                .copied()
                .max_by_key(|f| (f - frame).abs())
                .unwrap_or(frame);
            map.remove(&far);
        }
    }
}

impl GraphNode for RampSource {
    fn uuid(&self) -> Uuid {
        self.core.uuid()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn node_type(&self) -> &'static str {
        "Ramp"
    }

    fn parents(&self) -> Vec<NodeRef> {
        Vec::new()
    }

    fn attrs(&self) -> Attrs {
        self.core.attrs()
    }

    fn info(&self) -> NodeInfo {
        self.core.info()
    }

    fn validate(&self, for_real: bool) {
        if for_real {
            self.validations.0.fetch_add(1, Ordering::SeqCst);
        } else {
            self.validations.1.fetch_add(1, Ordering::SeqCst);
        }
        let p = self.params();
        let display = Format::new(p.width, p.height);
        self.core.set_info(NodeInfo {
            display,
            data: display.bounds,
            channels: ChannelSet::RGBA,
            first_frame: self.core.int(A_FIRST, 0),
            last_frame: self.core.int(A_LAST, 0),
        });
    }

    fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>) {
        let p = self.params();
        let y = row.y();
        if y < 0 || y >= p.height {
            return;
        }
        let pixels = self
            .decoded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ctx.frame)
            .cloned();

        let x0 = row.offset();
        for i in 0..row.width() {
            let x = x0 + i as i32;
            if x < 0 || x >= p.width {
                continue;
            }
            let px = match &pixels {
                Some(buf) => buf[(y * p.width + x) as usize],
                None => p.pixel(x, y, ctx.frame),
            };
            for channel in Channel::ALL {
                if let Some(plane) = row.plane_mut(channel) {
                    plane[i] = px[channel.index()];
                }
            }
        }
    }

    fn as_source(&self) -> Option<&dyn SourceNode> {
        Some(self)
    }
}

impl SourceNode for RampSource {
    fn frame_name(&self, frame: i32) -> String {
        format!("{}.{:04}", self.core.name(), frame)
    }

    fn first_frame(&self) -> i32 {
        self.core.int(A_FIRST, 0)
    }

    fn last_frame(&self) -> i32 {
        self.core.int(A_LAST, 0)
    }

    fn decode(&self, request: DecodeRequest) -> Result<Vec<DecodedFrame>, EngineError> {
        let frame = request.frame;
        let fail = *self.fail_frame.lock().unwrap_or_else(|e| e.into_inner());
        let out_of_range = frame < self.first_frame() || frame > self.last_frame();
        if fail == Some(frame) || out_of_range {
            return Err(EngineError::Decode {
                source: self.core.name(),
                frame,
                reason: if out_of_range {
                    "frame out of range".into()
                } else {
                    "simulated read failure".into()
                },
            });
        }

        self.decodes.fetch_add(1, Ordering::SeqCst);
        if request.use_other_thread {
            self.helper_decodes.fetch_add(1, Ordering::SeqCst);
        }
        let name = self.frame_name(frame);
        let params = self.params();

        if request.use_current_thread {
            trace!("Decoding {} inline", name);
            Self::store(&self.decoded, frame, params.render(frame));
            return Ok(vec![DecodedFrame::ready(frame, name)]);
        }

        let (handle, tx) = DecodeHandle::channel();
        let decoded = Arc::clone(&self.decoded);
        let spawned = thread::Builder::new()
            .name(format!("decode-{}", name))
            .spawn(move || {
                Self::store(&decoded, frame, params.render(frame));
                let _ = tx.send(Ok(()));
            });
        if let Err(e) = spawned {
            return Err(EngineError::Decode {
                source: self.core.name(),
                frame,
                reason: format!("failed to spawn decode thread: {}", e),
            });
        }
        Ok(vec![DecodedFrame {
            frame,
            name,
            pending: Some(handle),
        }])
    }

    fn open_cached(&self, _entry: &FrameEntry, frame: i32, _for_lookahead: bool) -> DecodedFrame {
        DecodedFrame::ready(frame, self.frame_name(frame))
    }

    fn release_buffers(&self) {
        let mut map = self.decoded.lock().unwrap_or_else(|e| e.into_inner());
        if !map.is_empty() {
            debug!("{}: releasing {} decoded frames", self.core.name(), map.len());
            map.clear();
        }
    }
}
