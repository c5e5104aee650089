//! BufferViewer - interactive output that assembles rows into a frame buffer.
//!
//! Rows arrive from worker threads in any order. Each row evaluates the
//! input, applies exposure and the colour transform, then lands on its
//! zoomed destination line. When zoomed out, columns are subsampled the same
//! way the scheduler subsamples scanlines.
//!
//! View knobs (zoom, exposure, transform) stay out of `content_hash`; they
//! are part of the frame cache key instead.

use log::{debug, trace};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::node_core::NodeCore;
use crate::entities::keys::{A_EXPOSURE, A_TRANSFORM, A_ZOOM, VIEW_KEYS};
use crate::entities::{
    Attrs, BitDepth, Channel, ChannelSet, Format, FrameBuffer, GraphNode, NodeInfo, NodeRef, Row,
    RowContext, ViewerOutput,
};

pub struct BufferViewer {
    core: NodeCore,
    current: AtomicI32,
    channels: Mutex<ChannelSet>,
    depth: Mutex<BitDepth>,
    /// Inclusive scanline range on screen; `None` shows the whole display
    visible: Mutex<Option<(i32, i32)>>,
    view_size: Mutex<Option<(i32, i32)>>,
    row_span: Mutex<(i32, i32)>,
    frame: Mutex<Option<FrameBuffer>>,
}

impl BufferViewer {
    pub fn new(name: &str, input: NodeRef) -> Arc<Self> {
        let attrs = Attrs::new()
            .with(A_ZOOM, 1.0f32)
            .with(A_EXPOSURE, 0.0f32)
            .with(A_TRANSFORM, "linear");
        Arc::new(Self {
            core: NodeCore::new(name, attrs, vec![input]),
            current: AtomicI32::new(0),
            channels: Mutex::new(ChannelSet::RGBA),
            depth: Mutex::new(BitDepth::Byte),
            visible: Mutex::new(None),
            view_size: Mutex::new(None),
            row_span: Mutex::new((0, -1)),
            frame: Mutex::new(None),
        })
    }

    pub fn set_input(&self, input: NodeRef) {
        self.core.set_parents(vec![input]);
    }

    pub fn set_zoom(&self, zoom: f32) {
        self.core.set_attr(A_ZOOM, zoom);
    }

    /// Exposure in stops.
    pub fn set_exposure(&self, stops: f32) {
        self.core.set_attr(A_EXPOSURE, stops);
    }

    /// "linear" or "srgb".
    pub fn set_color_transform(&self, transform: &str) {
        self.core.set_attr(A_TRANSFORM, transform);
    }

    pub fn set_display_channels(&self, channels: ChannelSet) {
        *self.channels.lock().unwrap_or_else(|e| e.into_inner()) = channels;
    }

    pub fn set_bit_depth(&self, depth: BitDepth) {
        *self.depth.lock().unwrap_or_else(|e| e.into_inner()) = depth;
    }

    pub fn set_visible_rows(&self, rows: Option<(i32, i32)>) {
        *self.visible.lock().unwrap_or_else(|e| e.into_inner()) = rows;
    }

    /// Size of the on-screen view, used by `fit_to_format`.
    pub fn set_view_size(&self, width: i32, height: i32) {
        *self.view_size.lock().unwrap_or_else(|e| e.into_inner()) = Some((width, height));
    }

    pub fn row_span(&self) -> (i32, i32) {
        *self.row_span.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shade(px: [f32; 4], gain: f32, srgb: bool) -> [f32; 4] {
        let tf = |v: f32| {
            let v = v * gain;
            if !srgb {
                v
            } else if v <= 0.003_130_8 {
                v * 12.92
            } else {
                1.055 * v.max(0.0).powf(1.0 / 2.4) - 0.055
            }
        };
        [tf(px[0]), tf(px[1]), tf(px[2]), px[3]]
    }
}

impl GraphNode for BufferViewer {
    fn uuid(&self) -> Uuid {
        self.core.uuid()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn node_type(&self) -> &'static str {
        "Viewer"
    }

    fn parents(&self) -> Vec<NodeRef> {
        self.core.parents()
    }

    fn attrs(&self) -> Attrs {
        self.core.attrs()
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.node_type().hash(&mut hasher);
        self.core.attrs().hash_excluding(VIEW_KEYS).hash(&mut hasher);
        hasher.finish()
    }

    fn info(&self) -> NodeInfo {
        self.core.info()
    }

    fn validate(&self, _for_real: bool) {
        self.core.set_info(self.core.parents_info());
    }

    fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>) {
        let Some(input) = self.core.parents().into_iter().next() else {
            return;
        };
        input.evaluate_row(row, ctx);

        let attrs = self.core.attrs();
        let gain = 2f32.powf(attrs.get_float_or(A_EXPOSURE, 0.0));
        let srgb = attrs.get_str_or(A_TRANSFORM, "linear") == "srgb";
        let zoom = self.zoom_factor();
        let display = self.display_window();

        let mut guard = self.frame.lock().unwrap_or_else(|e| e.into_inner());
        let Some(buffer) = guard.as_mut() else {
            trace!("{}: row {} without a frame buffer", self.core.name(), row.y());
            return;
        };
        let dst_y = row.zoomed_y();
        for dst_x in 0..buffer.width() {
            let src_x = if zoom < 1.0 {
                display.bounds.x + (dst_x as f32 / zoom).floor() as i32
            } else {
                display.bounds.x + dst_x as i32
            };
            let i = src_x - row.offset();
            if i < 0 || i as usize >= row.width() {
                continue;
            }
            let mut px = Self::shade(row.pixel(i as usize), gain, srgb);
            if !row.channels().has(Channel::Alpha) {
                px[3] = 1.0;
            }
            buffer.set_pixel(dst_x, dst_y, px);
        }
    }
}

impl ViewerOutput for BufferViewer {
    fn into_node(self: Arc<Self>) -> NodeRef {
        self
    }

    fn current_frame(&self) -> i32 {
        self.current.load(Ordering::SeqCst)
    }

    fn seek(&self, frame: i32) {
        self.current.store(frame, Ordering::SeqCst);
    }

    fn display_channels(&self) -> ChannelSet {
        *self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn zoom_factor(&self) -> f32 {
        let zoom = self.core.float(A_ZOOM, 1.0);
        if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 }
    }

    fn exposure(&self) -> f32 {
        self.core.float(A_EXPOSURE, 0.0)
    }

    fn color_transform(&self) -> String {
        self.core.attrs().get_str_or(A_TRANSFORM, "linear").to_string()
    }

    fn bit_depth(&self) -> BitDepth {
        *self.depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn visible_rows(&self) -> (i32, i32) {
        let display = self.display_window();
        let visible = *self.visible.lock().unwrap_or_else(|e| e.into_inner());
        visible.unwrap_or((display.y(), display.top() - 1))
    }

    fn fit_to_format(&self, format: &Format) {
        let Some((w, h)) = *self.view_size.lock().unwrap_or_else(|e| e.into_inner()) else {
            return;
        };
        if format.width() <= 0 || format.height() <= 0 {
            return;
        }
        let zoom = (w as f32 / format.width() as f32).min(h as f32 / format.height() as f32);
        debug!("{}: fit zoom {:.3}", self.core.name(), zoom);
        self.set_zoom(zoom);
    }

    fn set_row_span(&self, span: (i32, i32)) {
        *self.row_span.lock().unwrap_or_else(|e| e.into_inner()) = span;
    }

    fn allocate_frame(&self, width: usize, height: usize) {
        let depth = self.bit_depth();
        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(FrameBuffer::new(width, height, depth));
    }

    fn take_frame(&self) -> Option<FrameBuffer> {
        self.frame.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
