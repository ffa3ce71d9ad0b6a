//! Per-file decoding of a scan slice and its rescale calibration.

use std::path::{Path, PathBuf};

use dicom::{
    object::open_file,
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("unreadable file {path}: {reason}")]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("missing rescale slope/intercept in {path}")]
    MissingCalibration { path: PathBuf },
}

impl DecodeError {
    pub fn path(&self) -> &Path {
        match self {
            DecodeError::UnreadableFile { path, .. } | DecodeError::MissingCalibration { path } => {
                path
            }
        }
    }

    fn unreadable(path: &Path, reason: impl ToString) -> Self {
        DecodeError::UnreadableFile {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Linear rescale from stored values to calibrated units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationParams {
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationParams {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.intercept
    }
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

/// One decoded slice: stored pixel values (rows, columns) plus calibration.
#[derive(Debug, Clone)]
pub struct DecodedSlice {
    pub pixels: Array2<f64>,
    pub calibration: CalibrationParams,
}

/// Reads a single scan file.
///
/// Implementations must be shareable across the decode worker pool.
pub trait SliceDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedSlice, DecodeError>;
}

impl<F> SliceDecoder for F
where
    F: Fn(&Path) -> Result<DecodedSlice, DecodeError> + Send + Sync,
{
    fn decode(&self, path: &Path) -> Result<DecodedSlice, DecodeError> {
        self(path)
    }
}

/// [`SliceDecoder`] backed by dicom-rs.
///
/// Only the first frame and the first sample of each pixel is used. Pixel
/// values are returned as stored, the rescale is left to the converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomSliceDecoder;

impl SliceDecoder for DicomSliceDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedSlice, DecodeError> {
        let dicom_object = open_file(path).map_err(|e| DecodeError::unreadable(path, e))?;

        let slope = dicom_object
            .element(tags::RESCALE_SLOPE)
            .ok()
            .and_then(|element| element.to_float64().ok());
        let intercept = dicom_object
            .element(tags::RESCALE_INTERCEPT)
            .ok()
            .and_then(|element| element.to_float64().ok());
        let (Some(slope), Some(intercept)) = (slope, intercept) else {
            return Err(DecodeError::MissingCalibration {
                path: path.to_path_buf(),
            });
        };

        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| DecodeError::unreadable(path, e))?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        let pixels = pixel_data
            .to_ndarray_with_options::<f64>(&options)
            .map_err(|e| DecodeError::unreadable(path, e))?
            .slice_move(s![0, .., .., 0]);

        Ok(DecodedSlice {
            pixels,
            calibration: CalibrationParams::new(slope, intercept),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_is_linear_without_clamping() {
        let calibration = CalibrationParams::new(2.0, -1024.0);
        assert_eq!(calibration.apply(0.0), -1024.0);
        assert_eq!(calibration.apply(100.0), -824.0);
        assert_eq!(calibration.apply(-3000.0), -7024.0);
    }

    #[test]
    fn non_dicom_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.dcm");
        std::fs::write(&path, b"definitely not a dicom file").unwrap();

        let err = DicomSliceDecoder.decode(&path).unwrap_err();
        assert!(matches!(err, DecodeError::UnreadableFile { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn closures_are_decoders() {
        let decoder = |_: &Path| {
            Ok::<_, DecodeError>(DecodedSlice {
                pixels: Array2::zeros((2, 3)),
                calibration: CalibrationParams::default(),
            })
        };
        let slice = decoder.decode(Path::new("any.dcm")).unwrap();
        assert_eq!(slice.pixels.dim(), (2, 3));
    }
}
