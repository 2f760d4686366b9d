// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Per-stage dirty tracking for uniform buffers.

Each stage keeps a 16 bit mask with one bit per uniform buffer index. Binding a uniform buffer
sets its bit; resolving the stage consumes the bits lowest first and leaves the mask at zero.

Selecting a pipeline sets every bit, since the new shaders may read the same slots differently.
*/

use crate::bindings::stage::{STAGE_COUNT, Stage};
use crate::bittricks::LowestSetBits;

pub const ALL_DIRTY: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyMask {
    bits: [u16; STAGE_COUNT],
}

impl DirtyMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: Stage) -> u16 {
        self.bits[stage.index()]
    }

    pub fn set(&mut self, stage: Stage, bits: u16) {
        self.bits[stage.index()] = bits;
    }

    pub fn mark(&mut self, stage: Stage, index: u8) {
        debug_assert!(index < 16);
        self.bits[stage.index()] |= 1 << index;
    }

    pub fn mark_all(&mut self, stage: Stage) {
        self.bits[stage.index()] = ALL_DIRTY;
    }

    pub fn clear_bit(&mut self, stage: Stage, index: u8) {
        self.bits[stage.index()] &= !(1 << index);
    }

    pub fn clear(&mut self, stage: Stage) {
        self.bits[stage.index()] = 0;
    }

    pub fn is_dirty(&self, stage: Stage, index: u8) -> bool {
        self.bits[stage.index()] & (1 << index) != 0
    }

    pub fn is_clean(&self, stage: Stage) -> bool {
        self.bits[stage.index()] == 0
    }

    /// Dirty indices of `stage`, lowest first.
    pub fn iter(&self, stage: Stage) -> impl Iterator<Item = u8> + use<> {
        LowestSetBits::new(self.bits[stage.index()])
    }
}
