//! Fixed-capacity archive of evolution-path directions.
//!
//! The archive is an arena of `capacity` slots plus a usage-order array
//! (least recently written first). Slots are filled in generation order until
//! the arena is full; afterwards every write evicts one slot chosen by the
//! age gap between neighbours in usage order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dlm_types::{ConfigError, DlmResult};

/// Outcome of writing one direction into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveWrite {
    /// An unused slot was filled (generation < capacity).
    Filled { slot: usize },
    /// An occupied slot was overwritten.
    Evicted { slot: usize, position: usize },
}

impl ArchiveWrite {
    pub fn slot(&self) -> usize {
        match self {
            Self::Filled { slot } | Self::Evicted { slot, .. } => *slot,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    dimension: usize,
    slots: Vec<Vec<f64>>,
    /// Generation at which each slot was last written.
    written_at: Vec<u64>,
    /// Slot indices, least recently written first.
    usage: Vec<usize>,
    filled: usize,
}

impl Archive {
    /// Create an empty archive with `capacity` zeroed slots.
    pub fn new(capacity: usize, dimension: usize) -> DlmResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::InvalidArchiveCapacity { capacity }.into());
        }
        Ok(Self {
            dimension,
            slots: vec![vec![0.0; dimension]; capacity],
            written_at: vec![0; capacity],
            usage: (0..capacity).collect(),
            filled: 0,
        })
    }

    /// Create an archive pre-loaded with `vectors`, one per slot.
    ///
    /// Loaded slots count as filled, but their write generation is unknown
    /// and recorded as zero.
    pub fn from_vectors(vectors: Vec<Vec<f64>>, dimension: usize) -> DlmResult<Self> {
        let capacity = vectors.len();
        if capacity == 0 {
            return Err(ConfigError::InvalidArchiveCapacity { capacity }.into());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(ConfigError::DimensionMismatch {
                field: "archive vector".to_string(),
                expected: dimension,
                actual: bad.len(),
            }
            .into());
        }
        Ok(Self {
            dimension,
            slots: vectors,
            written_at: vec![0; capacity],
            usage: (0..capacity).collect(),
            filled: capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of slots holding a direction.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn vector(&self, slot: usize) -> &[f64] {
        &self.slots[slot]
    }

    /// All slots in slot order.
    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.slots
    }

    pub fn usage_order(&self) -> &[usize] {
        &self.usage
    }

    pub fn written_at(&self, slot: usize) -> u64 {
        self.written_at[slot]
    }

    /// Slot at `position` in usage order (0 = least recently written).
    pub fn slot_at(&self, position: usize) -> usize {
        self.usage[position]
    }

    /// Store `direction` as the archive entry of `generation`.
    ///
    /// While `generation < capacity` the write goes to slot `generation`.
    /// Afterwards the candidate for eviction is the slot whose write
    /// generation is closest to its predecessor in usage order; it is evicted
    /// only if that gap exceeds `min_spacing`, otherwise the least recently
    /// written slot (usage position 0) is evicted. The written slot moves to
    /// the tail of the usage order.
    pub fn record(&mut self, generation: u64, direction: &[f64], min_spacing: u64) -> ArchiveWrite {
        let capacity = self.capacity();

        if (generation as usize) < capacity {
            let slot = generation as usize;
            self.slots[slot].copy_from_slice(direction);
            self.written_at[slot] = generation;
            self.filled = self.filled.max(slot + 1);
            return ArchiveWrite::Filled { slot };
        }

        let position = self.eviction_position(min_spacing);
        let slot = self.usage.remove(position);
        self.usage.push(slot);
        self.written_at[slot] = generation;
        self.slots[slot].copy_from_slice(direction);
        debug!(generation, slot, position, "evicted archive slot");

        ArchiveWrite::Evicted { slot, position }
    }

    /// Usage position that the next eviction would target.
    pub fn eviction_position(&self, min_spacing: u64) -> usize {
        let mut best: Option<(usize, u64)> = None;
        for position in 1..self.usage.len() {
            let gap = self.written_at[self.usage[position]]
                .saturating_sub(self.written_at[self.usage[position - 1]]);
            if best.map_or(true, |(_, smallest)| gap < smallest) {
                best = Some((position, gap));
            }
        }

        match best {
            Some((position, gap)) if gap > min_spacing => position,
            _ => 0,
        }
    }
}
