use std::ops::Index;

use smallvec::SmallVec;

use crate::utils::Transform;

use super::{PlaneId, PlaneType};

/// A layer of a frame asking for a hardware plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalLayer {
    requested: PlaneType,
    pub(crate) plane_type: PlaneType,
    transform: Transform,
    pub(crate) plane: Option<PlaneId>,
    pub(crate) zorder: Option<u32>,
}

impl LogicalLayer {
    /// Create a new layer requesting a plane of type `type_`
    pub fn new(type_: PlaneType) -> Self {
        LogicalLayer {
            requested: type_,
            plane_type: type_,
            transform: Transform::Normal,
            plane: None,
            zorder: None,
        }
    }

    /// Set the transform the layer needs the plane to apply
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Plane type originally requested by the layer
    pub fn requested_type(&self) -> PlaneType {
        self.requested
    }

    /// Plane type of the assigned plane
    ///
    /// Equals [`LogicalLayer::requested_type`] until a plane was assigned.
    /// Stacking patterns may satisfy a sprite request with a primary plane.
    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    /// Transform the layer needs
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Assigned plane
    pub fn plane(&self) -> Option<PlaneId> {
        self.plane
    }

    /// Assigned hardware z-slot
    pub fn zorder(&self) -> Option<u32> {
        self.zorder
    }

    pub(crate) fn clear_assignment(&mut self) {
        self.plane_type = self.requested;
        self.plane = None;
        self.zorder = None;
    }
}

/// Ordered layer stack of a pipe, bottom to top
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZOrderConfig {
    layers: SmallVec<[LogicalLayer; 5]>,
}

impl ZOrderConfig {
    /// Create an empty stack
    pub fn new() -> Self {
        ZOrderConfig::default()
    }

    /// Put `layer` on top of the stack
    pub fn push(&mut self, layer: LogicalLayer) {
        self.layers.push(layer);
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if the stack has no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer at `position`
    pub fn get(&self, position: usize) -> Option<&LogicalLayer> {
        self.layers.get(position)
    }

    /// Iterate over the layers, bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &LogicalLayer> {
        self.layers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut LogicalLayer> {
        self.layers.iter_mut()
    }

    /// Bit `n` is set if the layer at position `n` requested an overlay
    pub fn overlay_mask(&self) -> u32 {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.requested == PlaneType::Overlay)
            .fold(0u32, |mask, (i, _)| mask | 1u32 << i)
    }

    /// Number of layers requesting neither an overlay nor a cursor
    pub fn sprite_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| !matches!(layer.requested, PlaneType::Overlay | PlaneType::Cursor))
            .count()
    }

    /// Position of the lowest layer requesting an overlay
    pub fn first_overlay(&self) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.requested == PlaneType::Overlay)
    }

    /// Planes assigned to the layers, bottom to top
    pub fn planes(&self) -> impl Iterator<Item = Option<PlaneId>> + '_ {
        self.layers.iter().map(|layer| layer.plane)
    }

    pub(crate) fn clear_assignment(&mut self) {
        for layer in &mut self.layers {
            layer.clear_assignment();
        }
    }
}

impl Index<usize> for ZOrderConfig {
    type Output = LogicalLayer;

    fn index(&self, index: usize) -> &Self::Output {
        &self.layers[index]
    }
}

impl FromIterator<LogicalLayer> for ZOrderConfig {
    fn from_iter<T: IntoIterator<Item = LogicalLayer>>(iter: T) -> Self {
        ZOrderConfig {
            layers: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ZOrderConfig {
    type Item = &'a LogicalLayer;
    type IntoIter = std::slice::Iter<'a, LogicalLayer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}
