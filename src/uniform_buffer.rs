// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Logical uniform buffers and the resource tables shaders declare against them.
//!
//! A [`LogicalUniformBuffer`] is a block of constants plus a flat array of resources
//! (textures, samplers, UAVs). Its [`UniformBufferLayout`] says what kind each resource is and
//! yields a [`LayoutHash`].
//!
//! A shader does not know the buffers' contents, only where each of their resources has to go:
//! its [`ShaderResourceTable`] lists `(uniform buffer index, kind, resource index, bind slot)`
//! entries together with the layout hash it was compiled against for each uniform buffer index.
//!
//! Entries are packed into a `u32` each and kept sorted by uniform buffer index, so all entries
//! of one buffer are contiguous and start at a known offset.

use std::fmt::Display;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::bindings::slot::{MAX_CONSTANT_BUFFER_SLOTS, SlotKind};
use crate::bittricks;
use crate::error::LayoutError;
use crate::resource::GPUResource;

/// Maximum uniform buffers per stage; one dirty bit each.
pub const MAX_UNIFORM_BUFFERS: usize = MAX_CONSTANT_BUFFER_SLOTS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutHash(pub u64);

impl Display for LayoutHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Kind of a resource-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableResourceKind {
    Texture,
    ShaderResourceView,
    Sampler,
    UnorderedAccess,
}

impl TableResourceKind {
    pub fn slot_kind(self) -> SlotKind {
        match self {
            TableResourceKind::Texture | TableResourceKind::ShaderResourceView => SlotKind::Texture,
            TableResourceKind::Sampler => SlotKind::Sampler,
            TableResourceKind::UnorderedAccess => SlotKind::UnorderedAccess,
        }
    }
}

/// Layout of a uniform buffer: its constant block size and the kinds of its resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferLayout {
    name: String,
    constant_size: u32,
    resources: Vec<TableResourceKind>,
    hash: LayoutHash,
}

impl UniformBufferLayout {
    pub fn new(name: &str, constant_size: u32, resources: Vec<TableResourceKind>) -> Arc<Self> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        constant_size.hash(&mut hasher);
        resources.hash(&mut hasher);
        Arc::new(UniformBufferLayout {
            name: name.to_string(),
            constant_size,
            resources,
            hash: LayoutHash(hasher.finish()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn constant_size(&self) -> u32 {
        self.constant_size
    }
    pub fn resources(&self) -> &[TableResourceKind] {
        &self.resources
    }
    pub fn hash(&self) -> LayoutHash {
        self.hash
    }
}

#[derive(Debug)]
struct UniformBufferInner {
    layout: Arc<UniformBufferLayout>,
    resources: Vec<GPUResource>,
    constants: Option<GPUResource>,
}

/// An immutable uniform buffer instance.
///
/// Cloning shares the instance.
#[derive(Debug, Clone)]
pub struct LogicalUniformBuffer {
    inner: Arc<UniformBufferInner>,
}

impl LogicalUniformBuffer {
    /// `resources` must match the layout's resource list one to one.
    pub fn new(
        layout: Arc<UniformBufferLayout>,
        resources: Vec<GPUResource>,
        constants: Option<GPUResource>,
    ) -> Result<Self, LayoutError> {
        if resources.len() != layout.resources.len() {
            return Err(LayoutError::ResourceCountMismatch {
                expected: layout.resources.len(),
                found: resources.len(),
            });
        }
        Ok(LogicalUniformBuffer {
            inner: Arc::new(UniformBufferInner {
                layout,
                resources,
                constants,
            }),
        })
    }

    pub fn layout(&self) -> &Arc<UniformBufferLayout> {
        &self.inner.layout
    }
    pub fn layout_hash(&self) -> LayoutHash {
        self.inner.layout.hash
    }
    pub fn resource(&self, index: u16) -> Option<&GPUResource> {
        self.inner.resources.get(index as usize)
    }
    pub fn resources(&self) -> &[GPUResource] {
        &self.inner.resources
    }
    /// The GPU buffer holding the constant block, if the buffer has one.
    pub fn constants(&self) -> Option<&GPUResource> {
        self.inner.constants.as_ref()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// One packed entry of a shader's resource table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceTableEntry {
    packed: u32,
    kind: TableResourceKind,
}

impl ResourceTableEntry {
    pub fn buffer_index(self) -> u8 {
        bittricks::unpack_buffer_index(self.packed)
    }
    pub fn resource_index(self) -> u16 {
        bittricks::unpack_resource_index(self.packed)
    }
    pub fn bind_slot(self) -> u8 {
        bittricks::unpack_bind_slot(self.packed)
    }
    pub fn kind(self) -> TableResourceKind {
        self.kind
    }
}

/// One tuple as emitted by the shader compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableEntryDesc {
    pub buffer_index: u8,
    pub kind: TableResourceKind,
    pub resource_index: u32,
    pub bind_slot: u32,
}

/// A shader's resource requirements, grouped by uniform buffer index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderResourceTable {
    entries: Vec<ResourceTableEntry>,
    //start of each buffer's group in `entries`
    offsets: [u16; MAX_UNIFORM_BUFFERS],
    layout_hashes: [Option<LayoutHash>; MAX_UNIFORM_BUFFERS],
    buffer_bits: u16,
}

impl ShaderResourceTable {
    pub fn new(
        descs: &[TableEntryDesc],
        layout_hashes: &[(u8, LayoutHash)],
    ) -> Result<Self, LayoutError> {
        if descs.len() > u16::MAX as usize {
            return Err(LayoutError::TooManyEntries(descs.len()));
        }
        let mut table = ShaderResourceTable::default();
        for &(index, hash) in layout_hashes {
            if index as usize >= MAX_UNIFORM_BUFFERS {
                return Err(LayoutError::UniformBufferIndexOutOfRange(index));
            }
            table.layout_hashes[index as usize] = Some(hash);
            table.buffer_bits |= 1 << index;
        }
        for desc in descs {
            if desc.buffer_index as usize >= MAX_UNIFORM_BUFFERS {
                return Err(LayoutError::UniformBufferIndexOutOfRange(desc.buffer_index));
            }
            if table.layout_hashes[desc.buffer_index as usize].is_none() {
                return Err(LayoutError::MissingLayoutHash(desc.buffer_index));
            }
            if desc.resource_index > u16::MAX as u32 {
                return Err(LayoutError::ResourceIndexOutOfRange(desc.resource_index));
            }
            if desc.bind_slot as usize >= desc.kind.slot_kind().capacity() {
                return Err(LayoutError::BindSlotOutOfRange {
                    kind: desc.kind,
                    slot: desc.bind_slot,
                });
            }
            table.entries.push(ResourceTableEntry {
                packed: bittricks::pack_table_entry(
                    desc.buffer_index,
                    desc.resource_index as u16,
                    desc.bind_slot as u8,
                ),
                kind: desc.kind,
            });
        }
        table.entries.sort();

        let mut next = 0usize;
        for index in 0..MAX_UNIFORM_BUFFERS {
            table.offsets[index] = next as u16;
            while next < table.entries.len() && table.entries[next].buffer_index() as usize == index
            {
                next += 1;
            }
        }
        Ok(table)
    }

    /// Bitmask of the uniform buffer indices this shader reads.
    pub fn buffer_bits(&self) -> u16 {
        self.buffer_bits
    }

    pub fn layout_hash(&self, buffer_index: u8) -> Option<LayoutHash> {
        self.layout_hashes
            .get(buffer_index as usize)
            .copied()
            .flatten()
    }

    /// The entries owned by `buffer_index`.
    ///
    /// Starts at the group's offset and stops at the first entry of another buffer.
    pub fn entries_for(&self, buffer_index: u8) -> impl Iterator<Item = ResourceTableEntry> + '_ {
        let start = self
            .offsets
            .get(buffer_index as usize)
            .map(|o| *o as usize)
            .unwrap_or(self.entries.len());
        self.entries[start..]
            .iter()
            .copied()
            .take_while(move |e| e.buffer_index() == buffer_index)
    }

    pub fn entries(&self) -> &[ResourceTableEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceDescriptor;

    fn desc(buffer_index: u8, kind: TableResourceKind, resource_index: u32, bind_slot: u32) -> TableEntryDesc {
        TableEntryDesc {
            buffer_index,
            kind,
            resource_index,
            bind_slot,
        }
    }

    #[test]
    fn layout_hash_depends_on_contents() {
        let a = UniformBufferLayout::new("View", 64, vec![TableResourceKind::Texture]);
        let b = UniformBufferLayout::new("View", 64, vec![TableResourceKind::Sampler]);
        let c = UniformBufferLayout::new("View", 64, vec![TableResourceKind::Texture]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), c.hash());
    }

    #[test]
    fn uniform_buffer_checks_resource_count() {
        let layout = UniformBufferLayout::new("Material", 0, vec![TableResourceKind::Texture]);
        let err = LogicalUniformBuffer::new(layout, vec![], None).unwrap_err();
        assert_eq!(
            err,
            LayoutError::ResourceCountMismatch {
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn entries_are_grouped_by_buffer() {
        let h = LayoutHash(7);
        let table = ShaderResourceTable::new(
            &[
                desc(3, TableResourceKind::Sampler, 0, 2),
                desc(1, TableResourceKind::Texture, 1, 4),
                desc(3, TableResourceKind::Texture, 1, 0),
                desc(1, TableResourceKind::Texture, 0, 3),
            ],
            &[(1, h), (3, h), (5, h)],
        )
        .unwrap();
        assert_eq!(table.buffer_bits(), 0b10_1010);
        let one: Vec<_> = table.entries_for(1).map(|e| e.bind_slot()).collect();
        assert_eq!(one, vec![3, 4]);
        let three: Vec<_> = table.entries_for(3).map(|e| e.resource_index()).collect();
        assert_eq!(three, vec![0, 1]);
        assert_eq!(table.entries_for(5).count(), 0);
        assert_eq!(table.entries_for(0).count(), 0);
        assert_eq!(table.entries_for(13).count(), 0);
    }

    #[test]
    fn rejects_bad_descriptions() {
        let h = LayoutHash(1);
        assert_eq!(
            ShaderResourceTable::new(&[desc(2, TableResourceKind::Texture, 0, 0)], &[(1, h)]),
            Err(LayoutError::MissingLayoutHash(2))
        );
        assert_eq!(
            ShaderResourceTable::new(&[], &[(14, h)]),
            Err(LayoutError::UniformBufferIndexOutOfRange(14))
        );
        assert_eq!(
            ShaderResourceTable::new(&[desc(0, TableResourceKind::Sampler, 0, 16)], &[(0, h)]),
            Err(LayoutError::BindSlotOutOfRange {
                kind: TableResourceKind::Sampler,
                slot: 16
            })
        );
        assert_eq!(
            ShaderResourceTable::new(&[desc(0, TableResourceKind::Texture, 70_000, 0)], &[(0, h)]),
            Err(LayoutError::ResourceIndexOutOfRange(70_000))
        );
    }

    #[test]
    fn offsets_must_fit_sixteen_bits() {
        let h = LayoutHash(1);
        let fits = vec![desc(0, TableResourceKind::Texture, 0, 0); u16::MAX as usize];
        assert_eq!(
            ShaderResourceTable::new(&fits, &[(0, h)]).map(|t| t.entries().len()),
            Ok(u16::MAX as usize)
        );
        let too_many = vec![desc(0, TableResourceKind::Texture, 0, 0); u16::MAX as usize + 1];
        assert_eq!(
            ShaderResourceTable::new(&too_many, &[(0, h)]),
            Err(LayoutError::TooManyEntries(65_536))
        );
    }

    #[test]
    fn clones_share_the_instance() {
        let layout = UniformBufferLayout::new("Pass", 16, vec![TableResourceKind::Texture]);
        let t = GPUResource::new(ResourceDescriptor::texture("t", 2, 2));
        let ub = LogicalUniformBuffer::new(layout, vec![t.clone()], None).unwrap();
        let copy = ub.clone();
        assert!(ub.ptr_eq(&copy));
        assert_eq!(copy.resource(0), Some(&t));
        assert_eq!(copy.resource(1), None);
    }
}
