//! Incrementally maintained road topology cache
//!
//! For every segment end this classifies the other segments at its node as
//! left, right or straight, and as incoming or outgoing. Recalculation is
//! driven by the host whenever the network changes.

mod node;
mod registry;
mod segment;
mod segment_end;

pub use node::NodeGeometry;
pub use registry::{RecalcMode, TopologyEvent, TopologyRegistry};
pub use segment::SegmentGeometry;
pub use segment_end::{
    classify_direction, ArrowDirection, SegmentEndGeometry, SegmentEndId, SegmentEndView,
    LEFT_CROSS_THRESHOLD, RIGHT_CROSS_THRESHOLD,
};
