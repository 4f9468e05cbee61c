//! Device specific plane topology
//!
//! Display controllers restrict how their planes can be stacked, which planes may be used on
//! which pipe and what every single plane is capable of. None of this is computed at runtime,
//! a [`DeviceTopology`] describes it as plain data:
//!
//! - a [`NicknameTable`] giving every concrete plane a single letter,
//! - per pipe a list of [`PatternEntry`]s, each a string of nicknames forming one legal stack
//!   for a given set of overlay positions,
//! - per pipe an affinity mask per plane type and [`FeasibilityRules`],
//! - per plane [`PlaneCapabilities`].

use std::collections::HashMap;

use crate::utils::{Physical, Size};

use super::{
    error::TopologyError, mask::MAX_PLANES_PER_TYPE, Pipe, PlaneId, PlaneMask, PlaneType, MIN_BUFFER_COUNT,
};

bitflags::bitflags! {
    /// Optional features of a plane
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PlaneCapabilities: u32 {
        /// The plane can apply non-identity transforms
        const ROTATION = 1;
    }
}

/// Mapping from single-letter nicknames to concrete planes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicknameTable {
    entries: Vec<(char, PlaneId)>,
}

impl NicknameTable {
    /// Create an empty table
    pub fn new() -> Self {
        NicknameTable::default()
    }

    /// Add a nickname
    pub fn with(mut self, nickname: char, plane: PlaneId) -> Self {
        self.entries.push((nickname, plane));
        self
    }

    /// Resolve a nickname
    pub fn resolve(&self, nickname: char) -> Option<PlaneId> {
        self.entries
            .iter()
            .find(|(n, _)| *n == nickname)
            .map(|(_, plane)| *plane)
    }

    /// Nickname of a plane
    pub fn nickname_of(&self, plane: PlaneId) -> Option<char> {
        self.entries.iter().find(|(_, p)| *p == plane).map(|(n, _)| *n)
    }

    /// Iterate over all nicknames
    pub fn iter(&self) -> impl Iterator<Item = (char, PlaneId)> + '_ {
        self.entries.iter().copied()
    }
}

/// A legal stacking pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    /// Bit `n` is set if the layer at stacking position `n` is an overlay
    pub overlay_mask: u32,
    /// Nicknames of the planes to use, bottom to top
    ///
    /// Cursor layers are not part of the pattern.
    pub pattern: String,
}

impl PatternEntry {
    /// Create a new pattern entry
    pub fn new(overlay_mask: u32, pattern: impl Into<String>) -> Self {
        PatternEntry {
            overlay_mask,
            pattern: pattern.into(),
        }
    }
}

/// Gross limits a layer stack has to respect before any pattern is consulted
///
/// "Sprites" are all layers not requesting an overlay or cursor plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeasibilityRules {
    /// Upper bound of sprites in any stack
    pub max_sprites: Option<usize>,
    /// Upper bound of sprites if no overlay is requested
    pub max_sprites_without_overlay: Option<usize>,
    /// Upper bound of sprites if an overlay is requested at the bottom
    pub max_sprites_over_bottom_overlay: Option<usize>,
}

/// Topology of a single pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTopology {
    /// Legal stacking patterns, in order of preference
    pub patterns: Vec<PatternEntry>,
    /// Nickname of the cursor plane of this pipe
    pub cursor: char,
    /// Planes of each type usable on this pipe, indexed by [`PlaneType::index`]
    pub affinity: [PlaneMask; 4],
    /// Limits checked before assigning planes
    pub rules: FeasibilityRules,
    /// Shift overlay z-slots up by one if no primary plane is part of a stack
    ///
    /// Needed on hardware whose base plane can not be disabled and always occupies
    /// the lowest slot.
    pub shift_overlays_without_primary: bool,
    /// Framebuffer size to scale to the physical size of the pipe, if any
    pub forced_scaling: Option<Size<i32, Physical>>,
}

impl PipeTopology {
    /// Patterns legal for the given overlay position mask, in order of preference
    pub fn patterns_for(&self, overlay_mask: u32) -> impl Iterator<Item = &str> + '_ {
        self.patterns
            .iter()
            .filter(move |entry| entry.overlay_mask == overlay_mask)
            .map(|entry| entry.pattern.as_str())
    }

    /// Planes of `type_` usable on this pipe
    #[inline]
    pub fn affinity(&self, type_: PlaneType) -> PlaneMask {
        self.affinity[type_.index()]
    }
}

/// Complete plane topology of a display controller
///
/// Loaded once when the [`PlaneManager`](super::PlaneManager) is created and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopology {
    /// Number of planes per type, indexed by [`PlaneType::index`]
    pub plane_counts: [usize; 4],
    /// Amount of buffer mappings every plane caches
    pub buffer_count: usize,
    /// Maximum amount of layers in a single stack
    pub max_layers: usize,
    /// Nicknames used by the pattern tables
    pub nicknames: NicknameTable,
    /// Per-pipe topology, indexed by [`Pipe::index`]
    pub pipes: Vec<PipeTopology>,
    /// Capabilities of planes lacking some features, all other planes have every capability
    pub capabilities: HashMap<PlaneId, PlaneCapabilities>,
}

impl DeviceTopology {
    /// The reference two-pipe topology
    ///
    /// Three primary planes `A`-`C` (one per pipe), three sprites `D`-`F`, two overlays `G` and `H`
    /// and three cursors `I`-`K`. Only sprite `D` can be routed to the external pipe and overlay `H`
    /// has no rotation support.
    ///
    /// The base plane `A` can not be disabled, so stacks with an overlay at the bottom of the
    /// built-in pipe keep it in the blending chain and support at most two sprites on top.
    pub fn reference() -> Self {
        let nicknames = NicknameTable::new()
            .with('A', PlaneId::new(PlaneType::Primary, 0))
            .with('B', PlaneId::new(PlaneType::Primary, 1))
            .with('C', PlaneId::new(PlaneType::Primary, 2))
            .with('D', PlaneId::new(PlaneType::Sprite, 0))
            .with('E', PlaneId::new(PlaneType::Sprite, 1))
            .with('F', PlaneId::new(PlaneType::Sprite, 2))
            .with('G', PlaneId::new(PlaneType::Overlay, 0))
            .with('H', PlaneId::new(PlaneType::Overlay, 1))
            .with('I', PlaneId::new(PlaneType::Cursor, 0))
            .with('J', PlaneId::new(PlaneType::Cursor, 1))
            .with('K', PlaneId::new(PlaneType::Cursor, 2));

        let primary = PipeTopology {
            patterns: vec![
                PatternEntry::new(0, "ADEF"),
                PatternEntry::new(1, "GEF"),
                PatternEntry::new(1, "HEF"),
                PatternEntry::new(2, "AGEF"),
                PatternEntry::new(2, "AHEF"),
                PatternEntry::new(3, "GHF"),
                PatternEntry::new(4, "ADGF"),
                PatternEntry::new(4, "ADHF"),
                PatternEntry::new(6, "AGHF"),
                PatternEntry::new(8, "ADEG"),
                PatternEntry::new(8, "ADEH"),
                PatternEntry::new(12, "ADGH"),
            ],
            cursor: 'I',
            affinity: [
                PlaneMask::single(0),
                PlaneMask::full(3),
                PlaneMask::full(2),
                PlaneMask::single(0),
            ],
            rules: FeasibilityRules {
                max_sprites: None,
                max_sprites_without_overlay: Some(4),
                max_sprites_over_bottom_overlay: Some(2),
            },
            shift_overlays_without_primary: true,
            forced_scaling: None,
        };

        let external = PipeTopology {
            patterns: vec![
                PatternEntry::new(0, "BD"),
                PatternEntry::new(1, "GBD"),
                PatternEntry::new(1, "HBD"),
                PatternEntry::new(2, "BGD"),
                PatternEntry::new(2, "BHD"),
                PatternEntry::new(3, "GHBD"),
                PatternEntry::new(4, "BDG"),
                PatternEntry::new(4, "BDH"),
                PatternEntry::new(6, "BGHD"),
                PatternEntry::new(12, "BDGH"),
            ],
            cursor: 'J',
            affinity: [
                PlaneMask::single(1),
                PlaneMask::single(0),
                PlaneMask::full(2),
                PlaneMask::single(1),
            ],
            rules: FeasibilityRules {
                max_sprites: Some(2),
                max_sprites_without_overlay: None,
                max_sprites_over_bottom_overlay: None,
            },
            shift_overlays_without_primary: true,
            forced_scaling: None,
        };

        let mut capabilities = HashMap::new();
        capabilities.insert(PlaneId::new(PlaneType::Overlay, 1), PlaneCapabilities::empty());

        DeviceTopology {
            plane_counts: [3, 3, 2, 3],
            buffer_count: MIN_BUFFER_COUNT,
            max_layers: 5,
            nicknames,
            pipes: vec![primary, external],
            capabilities,
        }
    }

    /// Number of planes of `type_`
    #[inline]
    pub fn plane_count(&self, type_: PlaneType) -> usize {
        self.plane_counts[type_.index()]
    }

    /// Topology of `pipe`
    pub fn pipe(&self, pipe: Pipe) -> Option<&PipeTopology> {
        self.pipes.get(pipe.index())
    }

    /// Capabilities of `plane`
    pub fn capabilities(&self, plane: PlaneId) -> PlaneCapabilities {
        self.capabilities
            .get(&plane)
            .copied()
            .unwrap_or(PlaneCapabilities::all())
    }

    /// Check the topology for consistency
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.plane_counts.iter().all(|count| *count == 0) {
            return Err(TopologyError::NoPlanes);
        }
        for type_ in PlaneType::ALL {
            let count = self.plane_count(type_);
            if count > MAX_PLANES_PER_TYPE {
                return Err(TopologyError::TooManyPlanes { type_, count });
            }
        }
        if self.max_layers > MAX_PLANES_PER_TYPE {
            return Err(TopologyError::TooManyLayers(self.max_layers));
        }
        if self.pipes.is_empty() {
            return Err(TopologyError::NoPipes);
        }

        for (i, (nickname, plane)) in self.nicknames.iter().enumerate() {
            if self.nicknames.iter().skip(i + 1).any(|(n, _)| n == nickname) {
                return Err(TopologyError::DuplicateNickname(nickname));
            }
            if plane.index >= self.plane_count(plane.type_) {
                return Err(TopologyError::NicknameOutOfRange { nickname, plane });
            }
        }

        for (index, pipe) in self.pipes.iter().enumerate() {
            match self.nicknames.resolve(pipe.cursor) {
                Some(plane) if plane.type_ == PlaneType::Cursor => {}
                _ => {
                    return Err(TopologyError::InvalidCursor {
                        pipe: index,
                        nickname: pipe.cursor,
                    })
                }
            }

            for type_ in PlaneType::ALL {
                let valid = PlaneMask::full(self.plane_count(type_));
                if !(pipe.affinity(type_) & !valid).is_empty() {
                    return Err(TopologyError::AffinityOutOfRange { pipe: index, type_ });
                }
            }

            for entry in &pipe.patterns {
                self.validate_pattern(index, entry)?;
            }
        }

        Ok(())
    }

    fn validate_pattern(&self, pipe: usize, entry: &PatternEntry) -> Result<(), TopologyError> {
        let mismatch = || TopologyError::PatternMismatch {
            pipe,
            pattern: entry.pattern.clone(),
            overlay_mask: entry.overlay_mask,
        };

        let len = entry.pattern.chars().count();
        if len > u32::BITS as usize || entry.overlay_mask.checked_shr(len as u32).unwrap_or(0) != 0 {
            return Err(mismatch());
        }

        for (position, nickname) in entry.pattern.chars().enumerate() {
            if entry.pattern.chars().skip(position + 1).any(|n| n == nickname) {
                return Err(mismatch());
            }
            let plane = self
                .nicknames
                .resolve(nickname)
                .ok_or_else(|| TopologyError::UnknownNickname {
                    pipe,
                    pattern: entry.pattern.clone(),
                    nickname,
                })?;
            let overlay_position = entry.overlay_mask & (1 << position) != 0;
            if overlay_position != (plane.type_ == PlaneType::Overlay) || plane.type_ == PlaneType::Cursor {
                return Err(mismatch());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceTopology, PatternEntry, PlaneCapabilities};
    use crate::backend::planes::{Pipe, PlaneId, PlaneMask, PlaneType, TopologyError};

    #[test]
    fn reference_topology_is_valid() {
        assert_eq!(DeviceTopology::reference().validate(), Ok(()));
    }

    #[test]
    fn reference_nicknames() {
        let topology = DeviceTopology::reference();
        assert_eq!(
            topology.nicknames.resolve('A'),
            Some(PlaneId::new(PlaneType::Primary, 0))
        );
        assert_eq!(
            topology.nicknames.resolve('H'),
            Some(PlaneId::new(PlaneType::Overlay, 1))
        );
        assert_eq!(topology.nicknames.resolve('Z'), None);
        assert_eq!(
            topology.nicknames.nickname_of(PlaneId::new(PlaneType::Cursor, 1)),
            Some('J')
        );
    }

    #[test]
    fn patterns_in_order_of_preference() {
        let topology = DeviceTopology::reference();
        let pipe = topology.pipe(Pipe::PRIMARY).unwrap();
        assert_eq!(pipe.patterns_for(1).collect::<Vec<_>>(), vec!["GEF", "HEF"]);
        assert_eq!(pipe.patterns_for(0).collect::<Vec<_>>(), vec!["ADEF"]);
        assert_eq!(pipe.patterns_for(16).count(), 0);
    }

    #[test]
    fn too_many_layers() {
        let mut topology = DeviceTopology::reference();
        topology.max_layers = 33;
        assert_eq!(topology.validate(), Err(TopologyError::TooManyLayers(33)));
        topology.max_layers = 32;
        assert_eq!(topology.validate(), Ok(()));
    }

    #[test]
    fn overlay_without_rotation() {
        let topology = DeviceTopology::reference();
        assert!(!topology
            .capabilities(PlaneId::new(PlaneType::Overlay, 1))
            .contains(PlaneCapabilities::ROTATION));
        assert!(topology
            .capabilities(PlaneId::new(PlaneType::Overlay, 0))
            .contains(PlaneCapabilities::ROTATION));
    }

    #[test]
    fn unknown_nickname_is_rejected() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[0].patterns.push(PatternEntry::new(0, "ADXF"));
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::UnknownNickname { nickname: 'X', .. })
        ));
    }

    #[test]
    fn overlay_mask_mismatch_is_rejected() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[1].patterns.push(PatternEntry::new(1, "BGD"));
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::PatternMismatch { pipe: 1, .. })
        ));
    }

    #[test]
    fn out_of_range_nickname_is_rejected() {
        let mut topology = DeviceTopology::reference();
        topology.plane_counts[PlaneType::Overlay.index()] = 1;
        topology.pipes[0].affinity[PlaneType::Overlay.index()] = PlaneMask::full(1);
        topology.pipes[1].affinity[PlaneType::Overlay.index()] = PlaneMask::full(1);
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::NicknameOutOfRange { nickname: 'H', .. })
        ));
    }

    #[test]
    fn cursor_nickname_must_be_a_cursor() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[0].cursor = 'D';
        assert_eq!(
            topology.validate(),
            Err(TopologyError::InvalidCursor { pipe: 0, nickname: 'D' })
        );
    }

    #[test]
    fn affinity_out_of_range_is_rejected() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[1].affinity[PlaneType::Sprite.index()] = PlaneMask::full(4);
        assert_eq!(
            topology.validate(),
            Err(TopologyError::AffinityOutOfRange {
                pipe: 1,
                type_: PlaneType::Sprite
            })
        );
    }
}
