//! SequenceWriter - sequential output encoding one image file per frame.
//!
//! The output pattern carries a frame token: `####` (padding = run length),
//! printf-style `%04d`, or `*` (padding 4). `.exr` patterns are written as
//! 32-bit float RGBA, everything else as 8-bit RGBA.

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::node_core::NodeCore;
use crate::entities::keys::{A_FIRST, A_LAST, A_PATTERN};
use crate::entities::{
    Attrs, BitDepth, ChannelSet, EngineError, FrameBuffer, GraphNode, NodeInfo, NodeRef,
    PixelBuffer, Row, RowContext, WriterOutput,
};

static FRAME_TOKEN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"%0(\d+)d|#+|\*").ok());

/// Expand the last frame token of `pattern` with `frame`.
pub fn format_path(pattern: &str, frame: i32) -> Option<PathBuf> {
    let re = FRAME_TOKEN.as_ref()?;
    let caps = re.captures_iter(pattern).last()?;
    let token = caps.get(0)?;
    let padding = match caps.get(1) {
        Some(width) => width.as_str().parse::<usize>().unwrap_or(4),
        None if token.as_str().starts_with('#') => token.len(),
        None => 4,
    };
    let mut path = String::with_capacity(pattern.len() + padding);
    path.push_str(&pattern[..token.start()]);
    path.push_str(&format!("{:0width$}", frame, width = padding));
    path.push_str(&pattern[token.end()..]);
    Some(PathBuf::from(path))
}

pub struct SequenceWriter {
    core: NodeCore,
    current: AtomicI32,
    channels: Mutex<ChannelSet>,
    frame: Mutex<Option<FrameBuffer>>,
    encoded: Mutex<Vec<i32>>,
    fail_frame: Mutex<Option<i32>>,
}

impl SequenceWriter {
    pub fn new(name: &str, input: NodeRef, pattern: &str, first: i32, last: i32) -> Arc<Self> {
        let attrs = Attrs::new()
            .with(A_PATTERN, pattern)
            .with(A_FIRST, first)
            .with(A_LAST, last);
        Arc::new(Self {
            core: NodeCore::new(name, attrs, vec![input]),
            current: AtomicI32::new(first),
            channels: Mutex::new(ChannelSet::RGBA),
            frame: Mutex::new(None),
            encoded: Mutex::new(Vec::new()),
            fail_frame: Mutex::new(None),
        })
    }

    pub fn pattern(&self) -> String {
        self.core.attrs().get_str_or(A_PATTERN, "").to_string()
    }

    pub fn set_requested_channels(&self, channels: ChannelSet) {
        *self.channels.lock().unwrap_or_else(|e| e.into_inner()) = channels;
    }

    /// Frames encoded since the last `begin_encode_sequence`, in order.
    pub fn encoded_frames(&self) -> Vec<i32> {
        self.encoded.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make encoding `frame` fail, for exercising error paths.
    pub fn fail_on(&self, frame: Option<i32>) {
        *self.fail_frame.lock().unwrap_or_else(|e| e.into_inner()) = frame;
    }

    fn depth(&self) -> BitDepth {
        let is_exr = Path::new(&self.pattern())
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));
        if is_exr { BitDepth::Float } else { BitDepth::Byte }
    }

    fn save(buffer: FrameBuffer, path: &Path) -> Result<(), EngineError> {
        let (w, h) = (buffer.width() as u32, buffer.height() as u32);
        let image = match buffer.buffer() {
            PixelBuffer::U8(data) => image::RgbaImage::from_raw(w, h, data.clone())
                .map(image::DynamicImage::ImageRgba8),
            PixelBuffer::F32(data) => image::Rgba32FImage::from_raw(w, h, data.clone())
                .map(image::DynamicImage::ImageRgba32F),
            PixelBuffer::F16(data) => {
                let data = data.iter().map(|v| v.to_f32()).collect();
                image::Rgba32FImage::from_raw(w, h, data).map(image::DynamicImage::ImageRgba32F)
            }
        };
        let image = image.ok_or_else(|| {
            EngineError::Encode(format!("buffer does not match {}x{}", w, h))
        })?;
        image
            .save(path)
            .map_err(|e| EngineError::Encode(format!("{}: {}", path.display(), e)))
    }
}

impl GraphNode for SequenceWriter {
    fn uuid(&self) -> Uuid {
        self.core.uuid()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn node_type(&self) -> &'static str {
        "Writer"
    }

    fn parents(&self) -> Vec<NodeRef> {
        self.core.parents()
    }

    fn attrs(&self) -> Attrs {
        self.core.attrs()
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

        let data = self.info().data;
        let mut guard = self.frame.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = guard.get_or_insert_with(|| {
            FrameBuffer::new(data.width() as usize, data.height() as usize, self.depth())
        });
        let dst_y = row.zoomed_y();
        for i in 0..row.width() {
            buffer.set_pixel(i, dst_y, row.pixel(i));
        }
    }
}

impl WriterOutput for SequenceWriter {
    fn into_node(self: Arc<Self>) -> NodeRef {
        self
    }

    fn first_frame(&self) -> i32 {
        self.core.int(A_FIRST, 0)
    }

    fn last_frame(&self) -> i32 {
        self.core.int(A_LAST, 0)
    }

    fn current_frame(&self) -> i32 {
        self.current.load(Ordering::SeqCst)
    }

    fn set_to_start(&self) {
        self.current.store(self.first_frame(), Ordering::SeqCst);
    }

    fn increment_frame(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    fn requested_channels(&self) -> ChannelSet {
        *self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_encode_sequence(&self) -> Result<(), EngineError> {
        let pattern = self.pattern();
        let first = format_path(&pattern, self.first_frame()).ok_or_else(|| {
            EngineError::Encode(format!("no frame token in pattern '{}'", pattern))
        })?;
        if let Some(dir) = first.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| EngineError::Encode(format!("{}: {}", dir.display(), e)))?;
        }
        self.encoded.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!(
            "Encoding {} frames {}..{} to {}",
            self.core.name(),
            self.first_frame(),
            self.last_frame(),
            pattern
        );
        Ok(())
    }

    fn encode_current_frame(&self) -> Result<(), EngineError> {
        let frame = self.current_frame();
        if *self.fail_frame.lock().unwrap_or_else(|e| e.into_inner()) == Some(frame) {
            return Err(EngineError::Encode(format!("simulated failure at frame {}", frame)));
        }
        let buffer = self
            .frame
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| EngineError::Encode(format!("no rows computed for frame {}", frame)))?;
        let path = format_path(&self.pattern(), frame)
            .ok_or_else(|| EngineError::Encode(format!("bad pattern '{}'", self.pattern())))?;

        Self::save(buffer, &path)?;
        self.encoded.lock().unwrap_or_else(|e| e.into_inner()).push(frame);
        debug!("Encoded frame {} -> {}", frame, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_cache::NodeCache;
    use crate::nodes::RampSource;

    #[test]
    fn test_format_path_tokens() {
        assert_eq!(format_path("out.####.png", 7), Some(PathBuf::from("out.0007.png")));
        assert_eq!(format_path("out.##.png", 123), Some(PathBuf::from("out.123.png")));
        assert_eq!(format_path("dir/out.%05d.exr", 42), Some(PathBuf::from("dir/out.00042.exr")));
        assert_eq!(format_path("v2/out_*.tif", 3), Some(PathBuf::from("v2/out_0003.tif")));
        assert_eq!(format_path("out.png", 1), None);
    }

    #[test]
    fn test_range_stepping() {
        let src: NodeRef = RampSource::new("src", 1, 10, 4, 4);
        let w = SequenceWriter::new("w", src, "out.####.png", 3, 5);
        w.increment_frame();
        w.set_to_start();
        assert_eq!(w.current_frame(), 3);
        w.increment_frame();
        assert_eq!(w.current_frame(), 4);
    }

    #[test]
    fn test_encode_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("seq/frame.####.png");
        let src: NodeRef = RampSource::new("src", 1, 2, 4, 2);
        let w = SequenceWriter::new("w", src.clone(), pattern.to_str().unwrap(), 1, 2);
        src.validate(true);
        w.validate(true);
        w.begin_encode_sequence().unwrap();
        w.set_to_start();

        let cache = NodeCache::new(4);
        let ctx = RowContext { frame: 1, cache: &cache };
        for y in 0..2 {
            let mut row = Row::new(y, 0, 4, ChannelSet::RGBA).with_zoomed_y(y as usize);
            w.evaluate_row(&mut row, &ctx);
        }
        w.encode_current_frame().unwrap();

        let written = dir.path().join("seq/frame.0001.png");
        let img = image::open(&written).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (4, 2));
        assert_eq!(w.encoded_frames(), vec![1]);
    }

    #[test]
    fn test_encode_without_rows_fails() {
        let src: NodeRef = RampSource::new("src", 1, 2, 4, 2);
        let w = SequenceWriter::new("w", src, "out.####.png", 1, 2);
        assert!(matches!(w.encode_current_frame(), Err(EngineError::Encode(_))));
    }

    #[test]
    fn test_pattern_without_token_is_rejected() {
        let src: NodeRef = RampSource::new("src", 1, 2, 4, 2);
        let w = SequenceWriter::new("w", src, "out.png", 1, 2);
        assert!(w.begin_encode_sequence().is_err());
    }
}
