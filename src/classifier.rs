//! Threshold-band tissue classification of calibrated (Hounsfield) values.
//!
//! Bands are tried in table order and the first match wins, which also
//! settles values covered by two bands (130 is Contrast, never Bone).
//! Values outside every band are [`TissueClass::Unclassified`].

use std::collections::BTreeMap;

use image::{ImageBuffer, RgbaImage};
use ndarray::{Array2, ArrayView2, Zip};

use crate::enums::TissueClass;

/// Closed or half-open interval over calibrated values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TissueBand {
    /// `value < bound`
    Below(f64),
    /// `low <= value < high`
    HalfOpen(f64, f64),
    /// `low <= value <= high`
    Closed(f64, f64),
    /// `value > bound`
    Above(f64),
}

impl TissueBand {
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        match *self {
            TissueBand::Below(bound) => value < bound,
            TissueBand::HalfOpen(low, high) => low <= value && value < high,
            TissueBand::Closed(low, high) => low <= value && value <= high,
            TissueBand::Above(bound) => value > bound,
        }
    }
}

/// Classification table in priority order.
pub const TISSUE_BANDS: [(TissueBand, TissueClass); 7] = [
    (TissueBand::Below(-700.0), TissueClass::Air),
    (TissueBand::HalfOpen(-100.0, -80.0), TissueClass::Fat),
    (TissueBand::Closed(-5.0, 5.0), TissueClass::Water),
    (TissueBand::Closed(70.0, 90.0), TissueClass::Blood),
    (TissueBand::Closed(30.0, 50.0), TissueClass::Muscle),
    (TissueBand::Closed(120.0, 140.0), TissueClass::Contrast),
    (TissueBand::Above(130.0), TissueClass::Bone),
];

pub type LabelSlice = Array2<TissueClass>;

#[inline]
pub fn classify_value(value: f64) -> TissueClass {
    TISSUE_BANDS
        .iter()
        .find(|(band, _)| band.contains(value))
        .map_or(TissueClass::Unclassified, |&(_, class)| class)
}

pub fn classify_slice(slice: &ArrayView2<'_, f64>) -> LabelSlice {
    Zip::from(slice).par_map_collect(|&value| classify_value(value))
}

/// Share of each non-Air class among the classified, non-Air voxels of a
/// slice, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct TissuePercentages {
    percentages: BTreeMap<TissueClass, f64>,
    counts: BTreeMap<TissueClass, usize>,
}

impl TissuePercentages {
    pub fn from_labels(labels: &LabelSlice) -> Self {
        let mut counts: BTreeMap<TissueClass, usize> =
            TissueClass::COUNTED.iter().map(|&class| (class, 0)).collect();
        let mut air = 0;
        let mut unclassified = 0;
        for &label in labels {
            match label {
                TissueClass::Air => air += 1,
                TissueClass::Unclassified => unclassified += 1,
                class => *counts.entry(class).or_default() += 1,
            }
        }
        counts.insert(TissueClass::Air, air);
        counts.insert(TissueClass::Unclassified, unclassified);

        let total: usize = TissueClass::COUNTED.iter().map(|class| counts[class]).sum();
        let percentages = TissueClass::COUNTED
            .iter()
            .map(|&class| {
                // An all-Air/Unclassified slice reports zeros.
                let share = if total == 0 {
                    0.0
                } else {
                    counts[&class] as f64 / total as f64 * 100.0
                };
                (class, share)
            })
            .collect();

        Self {
            percentages,
            counts,
        }
    }

    /// Percentage for `class`; Air and Unclassified always yield `None`.
    pub fn get(&self, class: TissueClass) -> Option<f64> {
        self.percentages.get(&class).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TissueClass, f64)> + '_ {
        self.percentages.iter().map(|(&class, &share)| (class, share))
    }

    pub fn total(&self) -> f64 {
        self.percentages.values().sum()
    }

    /// Raw voxel count for any class, Air and Unclassified included.
    pub fn count(&self, class: TissueClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }
}

/// Colors a label slice for use as an overlay.
pub fn labels_to_image(labels: &LabelSlice) -> Option<RgbaImage> {
    let (height, width) = labels.dim();
    let pixel_data: Vec<u8> = labels.iter().flat_map(|label| label.color().0).collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}
