//! Quantization layout shared by every round of a session.

/// Slot value marking an instance with no bin for a feature.
pub const MISSING_SLOT: i32 = -1;

/// Errors raised when a layout violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("cuts need at least two entries (one feature plus sentinel), got {0}")]
    TooFewCuts(usize),

    #[error("cuts decrease at index {0}")]
    DecreasingCuts(usize),

    #[error("{slots} slots do not divide into {features} features")]
    RaggedSlots { slots: usize, features: usize },

    #[error("slot {index} has bin {bin}, outside 0..{total_bins}")]
    SlotOutOfRange { index: usize, bin: i32, total_bins: u32 },
}

/// Bin boundaries plus per-instance bin assignment.
///
/// `slots` is row-major: instance `i`, feature `f` lives at
/// `i * n_features + f`, holding a global bin index below `cuts.last()` or
/// [`MISSING_SLOT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationContext {
    cuts: Vec<u32>,
    slots: Vec<i32>,
}

impl AggregationContext {
    /// Validate and build a layout.
    ///
    /// # Errors
    /// Returns `ContextError` if the cuts or slots are inconsistent.
    pub fn new(cuts: Vec<u32>, slots: Vec<i32>) -> Result<Self, ContextError> {
        if cuts.len() < 2 {
            return Err(ContextError::TooFewCuts(cuts.len()));
        }
        if let Some(i) = cuts.windows(2).position(|w| w[1] < w[0]) {
            return Err(ContextError::DecreasingCuts(i + 1));
        }

        let features = cuts.len() - 1;
        if slots.len() % features != 0 {
            return Err(ContextError::RaggedSlots {
                slots: slots.len(),
                features,
            });
        }

        let total_bins = cuts[cuts.len() - 1];
        for (index, &bin) in slots.iter().enumerate() {
            let in_range = bin == MISSING_SLOT || (bin >= 0 && (bin as u32) < total_bins);
            if !in_range {
                return Err(ContextError::SlotOutOfRange {
                    index,
                    bin,
                    total_bins,
                });
            }
        }

        Ok(Self { cuts, slots })
    }

    #[must_use]
    pub fn cuts(&self) -> &[u32] {
        &self.cuts
    }

    #[must_use]
    pub fn slots(&self) -> &[i32] {
        &self.slots
    }

    #[must_use]
    pub fn num_features(&self) -> usize {
        self.cuts.len() - 1
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.slots.len() / self.num_features()
    }

    /// Total number of bins across all features.
    #[must_use]
    pub fn total_bins(&self) -> usize {
        self.cuts[self.cuts.len() - 1] as usize
    }

    /// Features that have a bin for at least one local instance.
    #[must_use]
    pub fn present_features(&self) -> Vec<i64> {
        let n = self.num_features();
        (0..n)
            .filter(|&f| {
                self.slots
                    .iter()
                    .skip(f)
                    .step_by(n)
                    .any(|&bin| bin != MISSING_SLOT)
            })
            .map(|f| f as i64)
            .collect()
    }

    /// Slots of `features` for every instance, instance-major.
    #[must_use]
    pub fn bins_for(&self, features: &[i64]) -> Vec<i64> {
        let n = self.num_features();
        let mut bins = Vec::with_capacity(self.num_samples() * features.len());
        for row in self.slots.chunks_exact(n) {
            bins.extend(features.iter().map(|&f| i64::from(row[f as usize])));
        }
        bins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_feature_context() -> AggregationContext {
        // feature 0 -> bins 0..2, feature 1 -> bins 2..5; three instances
        AggregationContext::new(vec![0, 2, 5], vec![0, 2, 1, -1, 1, 4]).expect("valid layout")
    }

    #[test]
    fn test_dimensions() {
        let ctx = two_feature_context();
        assert_eq!(ctx.num_features(), 2);
        assert_eq!(ctx.num_samples(), 3);
        assert_eq!(ctx.total_bins(), 5);
        assert_eq!(ctx.slots()[2..4], [1, MISSING_SLOT]);
    }

    #[test]
    fn test_present_features_skip_all_missing() {
        let ctx = AggregationContext::new(vec![0, 2, 4, 6], vec![0, -1, 4, 1, -1, 5])
            .expect("valid layout");
        assert_eq!(ctx.present_features(), vec![0, 2]);
        assert_eq!(ctx.bins_for(&[0, 2]), vec![0, 4, 1, 5]);
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        assert_eq!(
            AggregationContext::new(vec![0], vec![]),
            Err(ContextError::TooFewCuts(1))
        );
        assert_eq!(
            AggregationContext::new(vec![0, 4, 2], vec![]),
            Err(ContextError::DecreasingCuts(2))
        );
        assert_eq!(
            AggregationContext::new(vec![0, 2, 4], vec![0, 2, 1]),
            Err(ContextError::RaggedSlots {
                slots: 3,
                features: 2
            })
        );
        assert!(matches!(
            AggregationContext::new(vec![0, 2], vec![2]),
            Err(ContextError::SlotOutOfRange { bin: 2, .. })
        ));
        assert!(matches!(
            AggregationContext::new(vec![0, 2], vec![-3]),
            Err(ContextError::SlotOutOfRange { bin: -3, .. })
        ));
    }

    #[test]
    fn test_empty_slots_allowed() {
        let ctx = AggregationContext::new(vec![0, 3], vec![]).expect("no instances yet");
        assert_eq!(ctx.num_samples(), 0);
        assert!(ctx.present_features().is_empty());
    }
}
