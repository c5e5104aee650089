//! Computed frame buffers.
//!
//! The viewer output fills a `FrameBuffer` row by row; the playback engine
//! stores finished buffers in the frame cache as `FrameEntry` handles and
//! copies their bytes into presentation staging buffers.

use half::f16 as F16;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage precision of a presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BitDepth {
    /// 8-bit per channel, clamped
    #[default]
    Byte,
    /// 16-bit half float
    Half,
    /// 32-bit float
    Float,
}

/// Interleaved RGBA pixel storage.
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    F16(Vec<F16>),
    F32(Vec<f32>),
}

/// RGBA image produced for one frame.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    buffer: PixelBuffer,
    width: usize,
    height: usize,
}

impl FrameBuffer {
    /// Zeroed buffer of the given depth.
    pub fn new(width: usize, height: usize, depth: BitDepth) -> Self {
        let n = width * height * 4;
        let buffer = match depth {
            BitDepth::Byte => PixelBuffer::U8(vec![0; n]),
            BitDepth::Half => PixelBuffer::F16(vec![F16::ZERO; n]),
            BitDepth::Float => PixelBuffer::F32(vec![0.0; n]),
        };
        Self {
            buffer,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> BitDepth {
        match self.buffer {
            PixelBuffer::U8(_) => BitDepth::Byte,
            PixelBuffer::F16(_) => BitDepth::Half,
            PixelBuffer::F32(_) => BitDepth::Float,
        }
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Size of the pixel data in bytes.
    pub fn mem(&self) -> usize {
        match &self.buffer {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len() * 2,
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Raw bytes for staging uploads.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.buffer {
            PixelBuffer::U8(v) => v.as_slice(),
            PixelBuffer::F16(v) => bytemuck::cast_slice(v.as_slice()),
            PixelBuffer::F32(v) => bytemuck::cast_slice(v.as_slice()),
        }
    }

    /// Write one pixel. Out-of-bounds writes are dropped.
    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let base = (y * self.width + x) * 4;
        match &mut self.buffer {
            PixelBuffer::U8(v) => {
                for (i, c) in rgba.iter().enumerate() {
                    v[base + i] = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
            PixelBuffer::F16(v) => {
                for (i, c) in rgba.iter().enumerate() {
                    v[base + i] = F16::from_f32(*c);
                }
            }
            PixelBuffer::F32(v) => v[base..base + 4].copy_from_slice(&rgba),
        }
    }

    /// Read one pixel back as float. Out-of-bounds reads return transparent black.
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        if x >= self.width || y >= self.height {
            return [0.0; 4];
        }
        let base = (y * self.width + x) * 4;
        let mut out = [0.0; 4];
        for (i, o) in out.iter_mut().enumerate() {
            *o = match &self.buffer {
                PixelBuffer::U8(v) => v[base + i] as f32 / 255.0,
                PixelBuffer::F16(v) => v[base + i].to_f32(),
                PixelBuffer::F32(v) => v[base + i],
            };
        }
        out
    }
}

/// Cached frame: shared buffer handle plus the stored data extent.
#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub buffer: Arc<FrameBuffer>,
    pub width: usize,
    pub height: usize,
}

impl FrameEntry {
    pub fn new(buffer: FrameBuffer) -> Self {
        let (width, height) = (buffer.width(), buffer.height());
        Self {
            buffer: Arc::new(buffer),
            width,
            height,
        }
    }

    pub fn mem(&self) -> usize {
        self.buffer.mem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_per_depth() {
        assert_eq!(FrameBuffer::new(4, 2, BitDepth::Byte).mem(), 32);
        assert_eq!(FrameBuffer::new(4, 2, BitDepth::Half).mem(), 64);
        assert_eq!(FrameBuffer::new(4, 2, BitDepth::Float).as_bytes().len(), 128);
    }

    #[test]
    fn test_set_pixel_round_trip() {
        let mut fb = FrameBuffer::new(2, 2, BitDepth::Float);
        fb.set_pixel(1, 1, [0.25, 0.5, 0.75, 1.0]);
        assert_eq!(fb.pixel(1, 1), [0.25, 0.5, 0.75, 1.0]);
        // out of range is ignored
        fb.set_pixel(5, 5, [1.0; 4]);
        assert_eq!(fb.pixel(5, 5), [0.0; 4]);
    }

    #[test]
    fn test_byte_clamps() {
        let mut fb = FrameBuffer::new(1, 1, BitDepth::Byte);
        fb.set_pixel(0, 0, [2.0, -1.0, 1.0, 0.0]);
        assert_eq!(fb.as_bytes(), &[255, 0, 255, 0]);
    }
}
