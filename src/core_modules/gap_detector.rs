// THEORY:
// The `GapDetector` turns the coverage mask into something an operator can act on: a
// list of rectangles over the areas the camera has not seen yet.
//
// Algorithm:
// 1.  **Inversion**: unseen pixels become foreground, seen pixels background.
// 2.  **Labelling**: 8-connected component labelling groups the unseen pixels into
//     contiguous regions.
// 3.  **Bounding**: each region is reduced to its axis-aligned bounding rectangle.
// 4.  **Filtering**: rectangles whose area does not exceed the minimum are dropped as
//     noise (slivers left by rounding, single missed pixels).
//
// Like the blob detector it is stateless. Order follows the order in which regions are
// first met in a raster scan; callers must not rely on any sorting.

use image::GrayImage;

/// An axis-aligned rectangle over a contiguous unseen area of the coverage mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GapRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl GapRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if any pixel inside the rectangle is already set in `mask`.
    pub fn intersects_covered(&self, mask: &GrayImage) -> bool {
        (self.y..self.y + self.height).any(|y| {
            (self.x..self.x + self.width)
                .any(|x| mask.get_pixel_checked(x, y).is_some_and(|p| p.0[0] != 0))
        })
    }
}

pub mod gap_detector {
    use super::*;
    use image::Luma;
    use image::imageops::invert;
    use imageproc::region_labelling::{Connectivity, connected_components};
    use std::collections::HashMap;

    /// Extracts the unseen regions whose bounding rectangle is larger than `min_area`.
    /// Returns nothing while no mask exists yet.
    pub fn find_gaps(mask: Option<&GrayImage>, min_area: u32) -> Vec<GapRegion> {
        let Some(mask) = mask else {
            return Vec::new();
        };

        // --- 1. Inversion ---
        let mut unseen = mask.clone();
        invert(&mut unseen);

        // --- 2. Labelling ---
        let labels = connected_components(&unseen, Connectivity::Eight, Luma([0u8]));

        // --- 3. Bounding ---
        // (min_x, min_y, max_x, max_y) per label, in first-seen order.
        let mut bounds: Vec<(u32, u32, u32, u32)> = Vec::new();
        let mut index_of_label: HashMap<u32, usize> = HashMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            let index = *index_of_label.entry(label).or_insert_with(|| {
                bounds.push((x, y, x, y));
                bounds.len() - 1
            });
            let b = &mut bounds[index];
            b.0 = b.0.min(x);
            b.1 = b.1.min(y);
            b.2 = b.2.max(x);
            b.3 = b.3.max(y);
        }

        // --- 4. Filtering ---
        let gaps: Vec<GapRegion> = bounds
            .into_iter()
            .map(|(min_x, min_y, max_x, max_y)| GapRegion {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            })
            .filter(|gap| gap.area() > min_area as u64)
            .collect();
        log::trace!("found {} gaps: {:?}", gaps.len(), gaps);
        gaps
    }
}
