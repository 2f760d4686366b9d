// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
bit packing for dirty masks and resource table entries.
*/

/// Iterates the set bits of a mask, lowest first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LowestSetBits(u16);

impl LowestSetBits {
    pub(crate) fn new(mask: u16) -> Self {
        LowestSetBits(mask)
    }
}

impl Iterator for LowestSetBits {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as u8;
        //clear lowest set bit
        self.0 &= self.0 - 1;
        Some(index)
    }
}

// [ buffer index: 8 | resource index: 16 | bind slot: 8 ]
const BUFFER_SHIFT: u32 = 24;
const RESOURCE_SHIFT: u32 = 8;

pub(crate) fn pack_table_entry(buffer_index: u8, resource_index: u16, bind_slot: u8) -> u32 {
    ((buffer_index as u32) << BUFFER_SHIFT)
        | ((resource_index as u32) << RESOURCE_SHIFT)
        | bind_slot as u32
}

pub(crate) fn unpack_buffer_index(packed: u32) -> u8 {
    (packed >> BUFFER_SHIFT) as u8
}

pub(crate) fn unpack_resource_index(packed: u32) -> u16 {
    ((packed >> RESOURCE_SHIFT) & 0xFFFF) as u16
}

pub(crate) fn unpack_bind_slot(packed: u32) -> u8 {
    (packed & 0xFF) as u8
}
