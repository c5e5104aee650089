//! MergeNode - per-pixel average of any number of inputs.

use std::sync::Arc;
use uuid::Uuid;

use super::node_core::NodeCore;
use crate::entities::{Attrs, Channel, GraphNode, NodeInfo, NodeRef, Row, RowContext};

pub struct MergeNode {
    core: NodeCore,
}

impl MergeNode {
    pub fn new(name: &str, inputs: Vec<NodeRef>) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new(name, Attrs::new(), inputs),
        })
    }

    pub fn set_inputs(&self, inputs: Vec<NodeRef>) {
        self.core.set_parents(inputs);
    }
}

impl GraphNode for MergeNode {
    fn uuid(&self) -> Uuid {
        self.core.uuid()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn node_type(&self) -> &'static str {
        "Merge"
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
        let inputs = self.core.parents();
        if inputs.is_empty() {
            return;
        }
        let weight = 1.0 / inputs.len() as f32;
        let mut acc = Row::new(row.y(), row.offset(), row.right(), row.channels());

        for input in &inputs {
            let mut tmp = Row::new(row.y(), row.offset(), row.right(), row.channels());
            input.evaluate_row(&mut tmp, ctx);
            for channel in row.channels().channels() {
                if let (Some(dst), Some(src)) = (acc.plane_mut(channel), tmp.plane(channel)) {
                    dst.iter_mut().zip(src).for_each(|(d, s)| *d += s * weight);
                }
            }
        }
        row.copy_planes_from(acc.planes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_cache::NodeCache;
    use crate::entities::ChannelSet;
    use crate::nodes::{GradeNode, RampSource};

    #[test]
    fn test_average_of_inputs() {
        let src: NodeRef = RampSource::new("src", 1, 4, 4, 4);
        let dark: NodeRef = GradeNode::new("dark", src.clone(), 0.0, 0.0);
        let merge = MergeNode::new("merge", vec![src.clone(), dark]);

        let cache = NodeCache::new(8);
        let ctx = RowContext { frame: 1, cache: &cache };
        let mut plain = Row::new(1, 0, 4, ChannelSet::RGBA);
        src.evaluate_row(&mut plain, &ctx);
        let mut merged = Row::new(1, 0, 4, ChannelSet::RGBA);
        merge.evaluate_row(&mut merged, &ctx);

        let (a, m) = (plain.pixel(2), merged.pixel(2));
        assert!((m[0] - a[0] * 0.5).abs() < 1e-6);
        assert!((m[3] - 1.0).abs() < 1e-6);
        assert_eq!(merged.plane(Channel::Alpha).map(|p| p.len()), Some(4));
    }

    #[test]
    fn test_info_is_union_of_inputs() {
        let a: NodeRef = RampSource::new("a", 1, 4, 4, 4);
        let b: NodeRef = RampSource::new("b", 3, 9, 8, 8);
        a.validate(true);
        b.validate(true);
        let merge = MergeNode::new("merge", vec![a, b]);
        merge.validate(true);
        let info = merge.info();
        assert_eq!((info.first_frame, info.last_frame), (1, 9));
        assert_eq!(info.data.r, 8);
        assert_eq!(info.display.width(), 4);
    }
}
