use crate::{
    decoder::{DecodeError, DecodedSlice, DicomSliceDecoder, SliceDecoder},
    enums::{DecodePolicy, Stage},
    progress::{NoProgress, ProgressSink, StageProgress},
    volume::Volume,
};

use ndarray::{Array3, s};
use rayon::prelude::*;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_EXTENSION: &str = "dcm";

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No .{extension} files found in {}", path.display())]
    EmptyDirectory { path: PathBuf, extension: String },

    #[error("No input files given")]
    NoInputFiles,

    #[error("No valid images: all {skipped} files failed to decode")]
    NoValidImages { skipped: usize },

    #[error("Inconsistent image dimensions: {} is {found:?}, expected {expected:?}", path.display())]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Missing rescale slope/intercept in {}", path.display())]
    MissingCalibration { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] walkdir::Error),

    #[error("Load cancelled")]
    Cancelled,
}

impl From<DecodeError> for VolumeLoaderError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::MissingCalibration { path } => {
                VolumeLoaderError::MissingCalibration { path }
            }
            source => VolumeLoaderError::Decode {
                path: source.path().to_path_buf(),
                source,
            },
        }
    }
}

/// How files are found and what happens to the ones that fail.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// File extension without the dot, compared case-sensitively.
    pub extension: String,
    /// Descend into subdirectories.
    pub recursive: bool,
    pub policy: DecodePolicy,
}

impl LoadOptions {
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_policy(mut self, policy: DecodePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            recursive: true,
            policy: DecodePolicy::FailFast,
        }
    }
}

/// A file left out of the volume under [`DecodePolicy::SkipAndReport`].
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: DecodeError,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug)]
pub struct LoadedVolume {
    pub volume: Volume,
    pub report: LoadReport,
}

pub struct VolumeLoader<D = DicomSliceDecoder> {
    decoder: D,
    options: LoadOptions,
}

impl VolumeLoader<DicomSliceDecoder> {
    pub fn new(options: LoadOptions) -> Self {
        Self::with_decoder(DicomSliceDecoder, options)
    }
}

impl Default for VolumeLoader<DicomSliceDecoder> {
    fn default() -> Self {
        Self::new(LoadOptions::default())
    }
}

impl<D: SliceDecoder> VolumeLoader<D> {
    pub fn with_decoder(decoder: D, options: LoadOptions) -> Self {
        Self { decoder, options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// List the eligible files under `path`, sorted by full path.
    ///
    /// The same list drives both the progress total and the decode, so the
    /// two can never disagree.
    pub fn scan_directory(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>, VolumeLoaderError> {
        let max_depth = if self.options.recursive { usize::MAX } else { 1 };
        let mut paths = Vec::new();
        for entry in WalkDir::new(path.as_ref())
            .follow_links(false)
            .max_depth(max_depth)
        {
            let entry = entry?;
            if entry.file_type().is_file() && self.is_eligible(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Load a volume from a directory containing scan files
    pub fn load_from_directory(
        &self,
        path: impl AsRef<Path>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let path = path.as_ref();
        let paths = self.scan_directory(path)?;
        info!(
            "Found {} .{} file(s) in {}",
            paths.len(),
            self.options.extension,
            path.display()
        );

        if paths.is_empty() {
            return Err(VolumeLoaderError::EmptyDirectory {
                path: path.to_path_buf(),
                extension: self.options.extension.clone(),
            });
        }

        self.load_from_file_paths(&paths, progress, cancel)
    }

    /// Load a volume from file paths, keeping their order
    ///
    /// # Errors
    ///
    /// Under [`DecodePolicy::FailFast`] the error of the earliest failing path
    /// is returned. Dimensions must agree with the first decoded slice.
    pub fn load_from_file_paths(
        &self,
        paths: &[impl AsRef<Path> + Sync],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoInputFiles);
        }

        let stage = StageProgress::start(Stage::Load, paths.len(), progress);
        let failed = AtomicBool::new(false);
        let fail_fast = self.options.policy == DecodePolicy::FailFast;

        // Results stay at their input index whatever order workers finish in.
        let results: Vec<Option<Result<DecodedSlice, DecodeError>>> = paths
            .par_iter()
            .map(|path| {
                if cancel.is_cancelled() || (fail_fast && failed.load(Ordering::Relaxed)) {
                    return None;
                }
                let path = path.as_ref();
                let result = self.decoder.decode(path);
                match &result {
                    Ok(slice) => debug!("Decoded {} {:?}", path.display(), slice.pixels.dim()),
                    Err(_) => failed.store(true, Ordering::Relaxed),
                }
                stage.tick();
                Some(result)
            })
            .collect();

        if cancel.is_cancelled() {
            info!("Load cancelled after {} file(s)", stage.done());
            return Err(VolumeLoaderError::Cancelled);
        }

        let mut images = Vec::with_capacity(paths.len());
        let mut report = LoadReport::default();
        for (path, result) in paths.iter().zip(results) {
            let path = path.as_ref();
            match result {
                Some(Ok(slice)) => images.push((path.to_path_buf(), slice)),
                Some(Err(error)) if !fail_fast => {
                    warn!("Skipping {}: {}", path.display(), error);
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        error,
                    });
                }
                Some(Err(error)) => return Err(error.into()),
                // Only reachable in fail-fast mode, after an earlier failure.
                None => {}
            }
        }

        if images.is_empty() {
            return Err(VolumeLoaderError::NoValidImages {
                skipped: report.skipped.len(),
            });
        }

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let (sources, slices): (Vec<_>, Vec<_>) = images.into_iter().unzip();
        let calibrations = slices.iter().map(|slice| slice.calibration).collect();
        let volume = Volume::new(volume_array, calibrations, sources);

        stage.finish();
        info!(
            "Loaded volume {:?} ({} skipped)",
            volume.dim(),
            report.skipped.len()
        );

        Ok(LoadedVolume { volume, report })
    }

    /// Load without progress reporting or cancellation.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedVolume, VolumeLoaderError> {
        self.load_from_directory(path, &NoProgress, &CancellationToken::new())
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext == self.options.extension)
    }

    fn validate_dimensions(images: &[(PathBuf, DecodedSlice)]) -> Result<(), VolumeLoaderError> {
        let expected = images[0].1.pixels.dim();
        match images
            .iter()
            .find(|(_, image)| image.pixels.dim() != expected)
        {
            Some((path, image)) => Err(VolumeLoaderError::ShapeMismatch {
                path: path.clone(),
                expected,
                found: image.pixels.dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[(PathBuf, DecodedSlice)]) -> Array3<f64> {
        let (height, width) = images[0].1.pixels.dim();
        let depth = images.len();
        let mut volume = Array3::<f64>::zeros((depth, height, width));

        for (i, (_, image)) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&image.pixels);
        }

        volume
    }
}
