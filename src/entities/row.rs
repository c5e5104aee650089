//! Scanline unit of work.
//!
//! A `Row` is allocated by the row scheduler, handed to exactly one worker,
//! filled by the output node's `evaluate_row`, then dropped. Planes are only
//! allocated for the requested channels.

use uuid::Uuid;

use super::channels::{Channel, ChannelSet};

/// Per-channel float planes, indexed by `Channel::index()`.
pub type RowPlanes = [Vec<f32>; 4];

/// One scanline of float pixel data.
#[derive(Debug, Clone)]
pub struct Row {
    y: i32,
    zoomed_y: usize,
    x: i32,
    r: i32,
    channels: ChannelSet,
    planes: RowPlanes,
}

impl Row {
    /// New zero-filled row covering columns `x..r` at scanline `y`.
    pub fn new(y: i32, x: i32, r: i32, channels: ChannelSet) -> Self {
        let width = (r - x).max(0) as usize;
        let planes = std::array::from_fn(|i| {
            if channels.has(Channel::ALL[i]) {
                vec![0.0; width]
            } else {
                Vec::new()
            }
        });
        Self {
            y,
            zoomed_y: 0,
            x,
            r,
            channels,
            planes,
        }
    }

    /// Attach the destination line in a display-scaled buffer.
    pub fn with_zoomed_y(mut self, zoomed_y: usize) -> Self {
        self.zoomed_y = zoomed_y;
        self
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn zoomed_y(&self) -> usize {
        self.zoomed_y
    }

    pub fn offset(&self) -> i32 {
        self.x
    }

    pub fn right(&self) -> i32 {
        self.r
    }

    pub fn width(&self) -> usize {
        (self.r - self.x).max(0) as usize
    }

    pub fn channels(&self) -> ChannelSet {
        self.channels
    }

    pub fn plane(&self, channel: Channel) -> Option<&[f32]> {
        self.channels
            .has(channel)
            .then(|| self.planes[channel.index()].as_slice())
    }

    pub fn plane_mut(&mut self, channel: Channel) -> Option<&mut [f32]> {
        if self.channels.has(channel) {
            Some(self.planes[channel.index()].as_mut_slice())
        } else {
            None
        }
    }

    pub fn planes(&self) -> &RowPlanes {
        &self.planes
    }

    /// Copy every plane this row carries from `src`. Missing source planes leave zeros.
    pub fn copy_planes_from(&mut self, src: &RowPlanes) {
        for channel in self.channels.channels() {
            let i = channel.index();
            let n = self.planes[i].len().min(src[i].len());
            self.planes[i][..n].copy_from_slice(&src[i][..n]);
        }
    }

    /// RGBA of column `i` (relative to `offset()`); missing colour reads 0, missing alpha reads 1.
    pub fn pixel(&self, i: usize) -> [f32; 4] {
        let read = |c: Channel, default: f32| {
            self.plane(c).and_then(|p| p.get(i).copied()).unwrap_or(default)
        };
        [
            read(Channel::Red, 0.0),
            read(Channel::Green, 0.0),
            read(Channel::Blue, 0.0),
            read(Channel::Alpha, 1.0),
        ]
    }

    /// Node-cache key for this row's span evaluated by `node`.
    pub fn key(&self, node: Uuid, hash: u64, frame: i32) -> RowKey {
        RowKey {
            node,
            hash,
            frame,
            y: self.y,
            x: self.x,
            r: self.r,
            channels: self.channels,
        }
    }
}

/// Identity of a row result in the node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub node: Uuid,
    pub hash: u64,
    pub frame: i32,
    pub y: i32,
    pub x: i32,
    pub r: i32,
    pub channels: ChannelSet,
}
