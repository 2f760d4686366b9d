// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::fmt::Display;

use crate::bindings::slot::SlotKind;
use crate::bindings::stage::Stage;
use crate::resource::{Access, Plane, ResourceId, ResourceKind};
use crate::uniform_buffer::{LayoutHash, TableResourceKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The resource was written this frame and needs a barrier before this use.
    UnsynchronizedHazard {
        resource: ResourceId,
        name: String,
        current: Access,
        requested: Access,
        frame: u64,
    },
    /// The plane cannot provide the requested access.
    InvalidPlaneAccess {
        resource: Option<ResourceId>,
        plane: Plane,
    },
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::UnsynchronizedHazard {
                resource,
                name,
                current,
                requested,
                frame,
            } => write!(
                f,
                "Resource {resource} ({name}) was written as {current} in frame {frame}; \
                 a barrier is required before using it as {requested}"
            ),
            TransitionError::InvalidPlaneAccess {
                resource: Some(resource),
                plane,
            } => write!(f, "Resource {resource} cannot provide {plane:?} plane access"),
            TransitionError::InvalidPlaneAccess {
                resource: None,
                plane,
            } => write!(f, "No depth target bound to provide {plane:?} plane access"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    SlotOutOfRange {
        stage: Stage,
        kind: SlotKind,
        index: u32,
    },
    /// One resource was named twice in a render target set.
    DuplicateTarget(ResourceId),
    /// Samplers go to sampler slots and nothing else does; vertex streams take buffers.
    KindMismatch {
        resource: ResourceId,
        kind: SlotKind,
        found: ResourceKind,
    },
}

impl Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingError::SlotOutOfRange { stage, kind, index } => write!(
                f,
                "{kind:?} slot {index} on {stage} is out of range (capacity {})",
                kind.capacity()
            ),
            BindingError::DuplicateTarget(resource) => {
                write!(f, "Resource {resource} appears more than once in the target set")
            }
            BindingError::KindMismatch {
                resource,
                kind,
                found,
            } => write!(f, "Resource {resource} is a {found:?} and cannot go in a {kind:?} slot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The bound uniform buffer has a different layout than the shader expects.
    LayoutMismatch {
        stage: Stage,
        index: u8,
        expected: LayoutHash,
        found: LayoutHash,
    },
    MissingUniformBuffer {
        stage: Stage,
        index: u8,
    },
    ResourceIndexOutOfRange {
        stage: Stage,
        index: u8,
        resource_index: u16,
    },
    KindMismatch {
        stage: Stage,
        index: u8,
        resource_index: u16,
        expected: TableResourceKind,
        found: ResourceKind,
    },
    Transition(#[from] TransitionError),
    Binding(#[from] BindingError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::LayoutMismatch {
                stage,
                index,
                expected,
                found,
            } => write!(
                f,
                "Uniform buffer {index} on {stage} has layout {found} but the shader expects {expected}"
            ),
            ResolveError::MissingUniformBuffer { stage, index } => {
                write!(f, "No uniform buffer bound at {index} on {stage}")
            }
            ResolveError::ResourceIndexOutOfRange {
                stage,
                index,
                resource_index,
            } => write!(
                f,
                "Uniform buffer {index} on {stage} has no resource {resource_index}"
            ),
            ResolveError::KindMismatch {
                stage,
                index,
                resource_index,
                expected,
                found,
            } => write!(
                f,
                "Resource {resource_index} of uniform buffer {index} on {stage} is a {found:?}, expected {expected:?}"
            ),
            ResolveError::Transition(e) => write!(f, "{}", e),
            ResolveError::Binding(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    ResourceCountMismatch { expected: usize, found: usize },
    UniformBufferIndexOutOfRange(u8),
    ResourceIndexOutOfRange(u32),
    BindSlotOutOfRange { kind: TableResourceKind, slot: u32 },
    MissingLayoutHash(u8),
    /// More entries than a table offset can address.
    TooManyEntries(usize),
}

impl Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::ResourceCountMismatch { expected, found } => {
                write!(f, "Layout declares {expected} resources, got {found}")
            }
            LayoutError::UniformBufferIndexOutOfRange(index) => {
                write!(f, "Uniform buffer index {index} is out of range")
            }
            LayoutError::ResourceIndexOutOfRange(index) => {
                write!(f, "Resource index {index} does not fit a resource table entry")
            }
            LayoutError::BindSlotOutOfRange { kind, slot } => {
                write!(f, "{kind:?} bind slot {slot} is out of range")
            }
            LayoutError::MissingLayoutHash(index) => {
                write!(f, "No layout hash declared for uniform buffer {index}")
            }
            LayoutError::TooManyEntries(count) => {
                write!(f, "Resource table has {count} entries, at most 65535 fit")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    StageMismatch { expected: Stage, found: Stage },
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::StageMismatch { expected, found } => {
                write!(f, "A {found} shader was supplied for the {expected} stage")
            }
        }
    }
}

/// Any failure reported by a [`CommandContext`](crate::context::CommandContext).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    Transition(#[from] TransitionError),
    Resolve(#[from] ResolveError),
    Binding(#[from] BindingError),
    Pipeline(#[from] PipelineError),
    /// A draw or dispatch was issued without the matching kind of pipeline selected.
    NoPipeline { expected: &'static str },
}

impl Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Transition(e) => write!(f, "{}", e),
            CommandError::Resolve(e) => write!(f, "{}", e),
            CommandError::Binding(e) => write!(f, "{}", e),
            CommandError::Pipeline(e) => write!(f, "{}", e),
            CommandError::NoPipeline { expected } => {
                write!(f, "No {expected} pipeline selected")
            }
        }
    }
}
