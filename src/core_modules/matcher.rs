use crate::core_modules::frame::Descriptor;
use crate::error::Result;

/// One nearest-neighbour correspondence between a query and a train descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query_index: usize,
    pub train_index: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Nearest-neighbour matching under the Hamming metric.
pub trait DescriptorMatcher: Send {
    fn match_descriptors(
        &self,
        query: &[Descriptor],
        train: &[Descriptor],
    ) -> Result<Vec<DescriptorMatch>>;
}

/// Exhaustive matcher: every query descriptor gets its single closest train descriptor.
/// Ties keep the lowest train index.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceHamming;

impl DescriptorMatcher for BruteForceHamming {
    fn match_descriptors(
        &self,
        query: &[Descriptor],
        train: &[Descriptor],
    ) -> Result<Vec<DescriptorMatch>> {
        if train.is_empty() {
            return Ok(Vec::new());
        }
        let matches = query
            .iter()
            .enumerate()
            .filter_map(|(query_index, q)| {
                train
                    .iter()
                    .enumerate()
                    .map(|(train_index, t)| (train_index, q.distance(t) as u32))
                    .min_by_key(|&(train_index, distance)| (distance, train_index))
                    .map(|(train_index, distance)| DescriptorMatch {
                        query_index,
                        train_index,
                        distance,
                    })
            })
            .collect();
        Ok(matches)
    }
}
