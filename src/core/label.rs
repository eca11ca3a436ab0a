// This module implements the label state machine used for branch targets.
// A label is either Unbound, accumulating the positions of every
// displacement field that was emitted against it (32-bit "long" patches and
// 8-bit "short" patches in separate side tables), or Bound to a final byte
// offset. The side tables replace the classic trick of threading the
// pending-patch list through the code buffer's own displacement bytes;
// keeping the bookkeeping outside the buffer removes the
// growth-invalidates-pointer hazard entirely.

//! Branch-target labels and their pending patch lists.

/// Handle to a label owned by an assembler instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Label(pub(crate) u32);

impl Label {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Internal label state. Transitions Unbound -> Bound exactly once.
#[derive(Debug)]
pub(crate) enum LabelState {
    Unbound {
        /// Offsets of 32-bit relative-displacement fields to patch.
        long_patches: Vec<usize>,
        /// Offsets of 8-bit relative-displacement fields to patch.
        short_patches: Vec<usize>,
    },
    Bound {
        offset: usize,
    },
}

impl LabelState {
    pub(crate) fn new() -> LabelState {
        LabelState::Unbound {
            long_patches: Vec::new(),
            short_patches: Vec::new(),
        }
    }

    pub(crate) fn offset(&self) -> Option<usize> {
        match self {
            LabelState::Bound { offset } => Some(*offset),
            LabelState::Unbound { .. } => None,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        matches!(self, LabelState::Bound { .. })
    }

    /// Number of patch sites still waiting for this label.
    pub(crate) fn pending_patches(&self) -> usize {
        match self {
            LabelState::Unbound {
                long_patches,
                short_patches,
            } => long_patches.len() + short_patches.len(),
            LabelState::Bound { .. } => 0,
        }
    }

    pub(crate) fn link_long(&mut self, position: usize) {
        match self {
            LabelState::Unbound { long_patches, .. } => long_patches.push(position),
            LabelState::Bound { .. } => unreachable!("linking a bound label"),
        }
    }

    pub(crate) fn link_short(&mut self, position: usize) {
        match self {
            LabelState::Unbound { short_patches, .. } => short_patches.push(position),
            LabelState::Bound { .. } => unreachable!("linking a bound label"),
        }
    }
}
