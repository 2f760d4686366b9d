// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::fmt::Display;

pub const STAGE_COUNT: usize = 6;

/// Specifies which shader stage a binding belongs to.
///
/// Every per-stage table in this crate is a fixed array indexed by [`Stage::index`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::Vertex,
        Stage::Hull,
        Stage::Domain,
        Stage::Geometry,
        Stage::Pixel,
        Stage::Compute,
    ];

    pub const GRAPHICS: [Stage; 5] = [
        Stage::Vertex,
        Stage::Hull,
        Stage::Domain,
        Stage::Geometry,
        Stage::Pixel,
    ];

    pub const fn index(self) -> usize {
        match self {
            Stage::Vertex => 0,
            Stage::Hull => 1,
            Stage::Domain => 2,
            Stage::Geometry => 3,
            Stage::Pixel => 4,
            Stage::Compute => 5,
        }
    }

    pub const fn is_graphics(self) -> bool {
        !matches!(self, Stage::Compute)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Vertex => "vertex",
            Stage::Hull => "hull",
            Stage::Domain => "domain",
            Stage::Geometry => "geometry",
            Stage::Pixel => "pixel",
            Stage::Compute => "compute",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_all() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert!(Stage::GRAPHICS.iter().all(|s| s.is_graphics()));
        assert!(!Stage::Compute.is_graphics());
    }
}
