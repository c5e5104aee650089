//! Image channel sets.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of colour channels a node produces or an output requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChannelSet: u8 {
        const RED   = 0b0001;
        const GREEN = 0b0010;
        const BLUE  = 0b0100;
        const ALPHA = 0b1000;
        const RGB   = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const RGBA  = Self::RGB.bits() | Self::ALPHA.bits();
    }
}

/// Single channel, indexing the per-row plane array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Alpha,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Red, Channel::Green, Channel::Blue, Channel::Alpha];

    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
            Channel::Alpha => 3,
        }
    }

    pub fn flag(self) -> ChannelSet {
        match self {
            Channel::Red => ChannelSet::RED,
            Channel::Green => ChannelSet::GREEN,
            Channel::Blue => ChannelSet::BLUE,
            Channel::Alpha => ChannelSet::ALPHA,
        }
    }
}

impl ChannelSet {
    /// Channels present in this set, in plane order.
    pub fn channels(self) -> impl Iterator<Item = Channel> {
        Channel::ALL.into_iter().filter(move |c| self.contains(c.flag()))
    }

    pub fn has(self, channel: Channel) -> bool {
        self.contains(channel.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_set_json() {
        let json = serde_json::to_string(&ChannelSet::RGB).unwrap();
        let back: ChannelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChannelSet::RGB);
        assert!(!back.contains(ChannelSet::ALPHA));
    }

    #[test]
    fn test_channel_iteration_order() {
        let set = ChannelSet::BLUE | ChannelSet::RED;
        let got: Vec<Channel> = set.channels().collect();
        assert_eq!(got, vec![Channel::Red, Channel::Blue]);
        assert_eq!(ChannelSet::RGBA.channels().count(), 4);
    }

    #[test]
    fn test_intersection() {
        let requested = ChannelSet::RGBA;
        let available = ChannelSet::RGB;
        assert_eq!(requested & available, ChannelSet::RGB);
        assert!((ChannelSet::ALPHA & available).is_empty());
    }
}
