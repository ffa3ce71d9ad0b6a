use std::path::{Path, PathBuf};

use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

use crate::decoder::CalibrationParams;

/// Stored (uncalibrated) pixel values of a series, stacked along axis 0.
///
/// Slice `i` was decoded from `sources()[i]` and is rescaled with
/// `calibrations()[i]`.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    data: Array3<f64>,
    calibrations: Vec<CalibrationParams>,
    sources: Vec<PathBuf>,
}

impl Volume {
    pub fn new(
        data: Array3<f64>,
        calibrations: Vec<CalibrationParams>,
        sources: Vec<PathBuf>,
    ) -> Self {
        debug_assert_eq!(data.dim().0, calibrations.len());
        debug_assert_eq!(data.dim().0, sources.len());
        Self {
            data,
            calibrations,
            sources,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn slice_count(&self) -> usize {
        self.data.dim().0
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn calibrations(&self) -> &[CalibrationParams] {
        &self.calibrations
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> Option<&Path> {
        self.sources.get(index).map(PathBuf::as_path)
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.slice_count()).then(|| self.data.slice(s![index, .., ..]))
    }
}

/// Volume in calibrated units, same shape as the [`Volume`] it came from.
#[derive(Debug, Clone, Default)]
pub struct CalibratedVolume {
    data: Array3<f64>,
}

impl CalibratedVolume {
    pub fn new(data: Array3<f64>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn slice_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.slice_count()).then(|| self.data.slice(s![index, .., ..]))
    }
}

/// Display window over calibrated values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub center: f64,
    pub width: f64,
}

impl Window {
    pub const SOFT_TISSUE: Window = Window {
        center: 40.0,
        width: 400.0,
    };
    pub const BONE: Window = Window {
        center: 400.0,
        width: 1800.0,
    };
    pub const LUNG: Window = Window {
        center: -600.0,
        width: 1500.0,
    };

    #[inline]
    pub fn to_u8(&self, value: f64) -> u8 {
        if self.width <= 0.0 {
            return if value < self.center { 0 } else { 255 };
        }
        let lower = self.center - self.width / 2.0;
        (((value - lower) / self.width) * 255.0).clamp(0.0, 255.0) as u8
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::SOFT_TISSUE
    }
}

/// Render a calibrated slice as 8-bit grayscale through `window`.
pub fn slice_to_image(slice: &ArrayView2<'_, f64>, window: Window) -> Option<GrayImage> {
    let (height, width) = slice.dim();
    let standard = slice.as_standard_layout();
    let pixel_data: Vec<u8> = standard
        .view()
        .into_par_iter()
        .map(|&v| window.to_u8(v))
        .collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}
