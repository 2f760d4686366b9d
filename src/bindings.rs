// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Binding points and the state kept about them */

pub mod stage;
pub mod slot;
pub mod cache;
pub mod dirty_tracking;

pub use cache::BindingCache;
pub use dirty_tracking::DirtyMask;
pub use slot::{SlotKey, SlotKind};
pub use stage::Stage;
