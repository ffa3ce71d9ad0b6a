use std::fmt;

use image::Rgba;

/// Tissue category assigned to a calibrated (Hounsfield) value.
///
/// `Unclassified` covers the gaps between the bands; it is never counted in
/// [`TissuePercentages`](crate::classifier::TissuePercentages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TissueClass {
    Air,
    Fat,
    Water,
    Blood,
    Muscle,
    Contrast,
    Bone,
    #[default]
    Unclassified,
}

impl TissueClass {
    /// Classes that take part in the percentage breakdown.
    pub const COUNTED: [TissueClass; 6] = [
        TissueClass::Fat,
        TissueClass::Water,
        TissueClass::Blood,
        TissueClass::Muscle,
        TissueClass::Contrast,
        TissueClass::Bone,
    ];

    /// Overlay color. Air and unclassified voxels are fully transparent.
    pub fn color(self) -> Rgba<u8> {
        match self {
            TissueClass::Air | TissueClass::Unclassified => Rgba([0, 0, 0, 0]),
            TissueClass::Fat => Rgba([255, 255, 0, 255]),
            TissueClass::Water => Rgba([0, 128, 255, 255]),
            TissueClass::Blood => Rgba([200, 0, 0, 255]),
            TissueClass::Muscle => Rgba([255, 105, 180, 255]),
            TissueClass::Contrast => Rgba([0, 255, 0, 255]),
            TissueClass::Bone => Rgba([255, 255, 255, 255]),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TissueClass::Air => "air",
            TissueClass::Fat => "fat",
            TissueClass::Water => "water",
            TissueClass::Blood => "blood",
            TissueClass::Muscle => "muscle",
            TissueClass::Contrast => "contrast",
            TissueClass::Bone => "bone",
            TissueClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for TissueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// What to do when a single file in a series cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Abort the load on the first failure.
    #[default]
    FailFast,
    /// Leave the file out of the volume and record it in the load report.
    SkipAndReport,
}

/// Pipeline stage a progress value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Load,
    Convert,
    Classify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Convert => "convert",
            Stage::Classify => "classify",
        };
        f.pad(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_are_distinct_for_counted_classes() {
        let mut colors: Vec<_> = TissueClass::COUNTED.iter().map(|c| c.color().0).collect();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), TissueClass::COUNTED.len());
    }

    #[test]
    fn air_and_unclassified_are_transparent() {
        assert_eq!(TissueClass::Air.color()[3], 0);
        assert_eq!(TissueClass::Unclassified.color()[3], 0);
        assert!(TissueClass::COUNTED.iter().all(|c| c.color()[3] == 255));
    }
}
