//! Node-level aggregation of attached segment ends

use anyhow::Result;

use crate::simulation::types::{NodeId, MAX_NODE_SEGMENTS};

use super::registry::RecalcMode;
use super::segment_end::{SegmentEndId, SegmentEndView};

/// Cached geometry of one node: the segment ends attached to it and
/// counts derived from their views
#[derive(Debug, Clone)]
pub struct NodeGeometry {
    id: NodeId,
    slots: [Option<SegmentEndId>; MAX_NODE_SEGMENTS],
    pub incoming_count: u8,
    pub outgoing_count: u8,
    /// Only one end feeds traffic in, or only one carries it out
    pub simple_junction: bool,
    valid: bool,
}

impl NodeGeometry {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            slots: [None; MAX_NODE_SEGMENTS],
            incoming_count: 0,
            outgoing_count: 0,
            simple_junction: false,
            valid: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn slots(&self) -> &[Option<SegmentEndId>; MAX_NODE_SEGMENTS] {
        &self.slots
    }

    pub fn segment_ends(&self) -> impl Iterator<Item = SegmentEndId> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn num_segment_ends(&self) -> usize {
        self.segment_ends().count()
    }

    pub fn contains(&self, end: SegmentEndId) -> bool {
        self.slots.contains(&Some(end))
    }

    /// Attach a segment end. Re-attaching an end that is already present
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Fails without touching any slot when all slots hold other ends.
    pub fn attach_segment_end(&mut self, end: SegmentEndId, _mode: RecalcMode) -> Result<()> {
        if let Some(slot) = self.slots.iter_mut().find(|slot| **slot == Some(end)) {
            *slot = Some(end);
            return Ok(());
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(end);
                Ok(())
            }
            None => anyhow::bail!(
                "{} has no free slot for {:?} (capacity {})",
                self.id,
                end,
                MAX_NODE_SEGMENTS
            ),
        }
    }

    /// Detach a segment end. Never detaches during bulk construction.
    ///
    /// # Errors
    ///
    /// Fails if the end is not attached here.
    pub fn detach_segment_end(&mut self, end: SegmentEndId, mode: RecalcMode) -> Result<()> {
        if mode == RecalcMode::Init {
            return Ok(());
        }
        match self.slots.iter_mut().find(|slot| **slot == Some(end)) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => anyhow::bail!("{:?} is not attached to {}", end, self.id),
        }
    }

    /// Rederive counts from the attached ends' views.
    ///
    /// `view_of` resolves an attached end to its current view. Ends whose
    /// view no longer points at this node are not counted.
    pub fn recalculate<'a, F>(&mut self, node_valid: bool, view_of: F)
    where
        F: Fn(SegmentEndId) -> Option<&'a SegmentEndView>,
    {
        self.valid = node_valid;
        self.incoming_count = 0;
        self.outgoing_count = 0;
        self.simple_junction = false;

        if !node_valid {
            self.slots = [None; MAX_NODE_SEGMENTS];
            return;
        }

        for end in self.slots.iter().flatten() {
            let Some(view) = view_of(*end) else {
                continue;
            };
            if view.node != Some(self.id) {
                continue;
            }
            if view.incoming {
                self.incoming_count += 1;
            }
            if view.outgoing {
                self.outgoing_count += 1;
            }
        }

        self.simple_junction = self.incoming_count == 1 || self.outgoing_count == 1;
    }
}
