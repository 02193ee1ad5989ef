//! Collision index for label placement. Rectangles live in terminal cell
//! space (pixel coordinates divided by the 2x4 cell size); placement is
//! greedy, first label wins.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use unicode_width::UnicodeWidthStr;

/// What a placed label refers to, kept around so the viewer can answer
/// "what is under the cursor".
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTag {
    pub source_layer: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PlacedLabel {
    min: [i32; 2],
    max: [i32; 2],
    pub text: String,
    pub tag: LabelTag,
}

impl RTreeObject for PlacedLabel {
    type Envelope = AABB<[i32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for PlacedLabel {
    fn distance_2(&self, point: &[i32; 2]) -> i32 {
        self.envelope().distance_2(point)
    }
}

#[derive(Default)]
pub struct LabelBuffer {
    tree: RTree<PlacedLabel>,
}

impl LabelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }

    /// Reserve space for `text` at pixel position `(x, y)` unless the
    /// margin-padded rectangle overlaps an earlier label. Returns whether
    /// the label may be drawn.
    pub fn write_if_possible(
        &mut self,
        text: &str,
        x: i32,
        y: i32,
        tag: LabelTag,
        margin: i32,
    ) -> bool {
        let cell_x = x.div_euclid(2);
        let cell_y = y.div_euclid(4);
        let min = [cell_x - margin, cell_y - margin / 2];
        let max = [
            cell_x + margin + UnicodeWidthStr::width(text) as i32,
            cell_y + margin / 2,
        ];
        let envelope = AABB::from_corners(min, max);

        if self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .next()
            .is_some()
        {
            return false;
        }

        self.tree.insert(PlacedLabel {
            min,
            max,
            text: text.to_string(),
            tag,
        });
        true
    }

    /// All labels whose reserved rectangle covers the given cell.
    pub fn features_at(&self, cell_x: i32, cell_y: i32) -> impl Iterator<Item = &PlacedLabel> {
        self.tree.locate_all_at_point(&[cell_x, cell_y])
    }
}
