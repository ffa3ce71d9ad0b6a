//! Load → convert → classify, and the read-only session the result lives in.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use image::{GrayImage, RgbaImage};
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

use crate::{
    classifier::{LabelSlice, TissuePercentages, classify_slice, labels_to_image},
    converter::RadiometricConverter,
    decoder::{DicomSliceDecoder, SliceDecoder},
    enums::Stage,
    histogram::{DEFAULT_HISTOGRAM_BINS, Histogram},
    progress::{NoProgress, Progress, ProgressSink, StageProgress},
    volume::{CalibratedVolume, Volume, Window, slice_to_image},
    volume_loader::{LoadOptions, LoadReport, LoadedVolume, VolumeLoader, VolumeLoaderError},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Slice index {index} out of range 0..{bound}")]
    IndexOutOfRange { index: isize, bound: usize },

    #[error("Could not render slice {index}")]
    Render { index: usize },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(VolumeLoaderError),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Pipeline worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<VolumeLoaderError> for PipelineError {
    fn from(error: VolumeLoaderError) -> Self {
        match error {
            VolumeLoaderError::Cancelled => PipelineError::Cancelled,
            error => PipelineError::Load(error),
        }
    }
}

/// Runs the stages in order and publishes a [`ScanSession`] only once all of
/// them completed.
pub struct VolumePipeline<D = DicomSliceDecoder> {
    loader: VolumeLoader<D>,
    histogram_bins: usize,
    eager: bool,
}

impl VolumePipeline<DicomSliceDecoder> {
    pub fn new(options: LoadOptions) -> Self {
        Self::with_decoder(DicomSliceDecoder, options)
    }
}

impl Default for VolumePipeline<DicomSliceDecoder> {
    fn default() -> Self {
        Self::new(LoadOptions::default())
    }
}

impl<D: SliceDecoder> VolumePipeline<D> {
    pub fn with_decoder(decoder: D, options: LoadOptions) -> Self {
        Self {
            loader: VolumeLoader::with_decoder(decoder, options),
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            eager: false,
        }
    }

    pub fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = bins.max(1);
        self
    }

    /// Classify every slice up front instead of on first request.
    pub fn with_eager_classification(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    pub fn run(
        &self,
        path: impl AsRef<Path>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanSession, PipelineError> {
        let LoadedVolume { volume, report } =
            self.loader.load_from_directory(path, progress, cancel)?;

        let calibrated = RadiometricConverter::convert(&volume, progress, cancel)
            .ok_or(PipelineError::Cancelled)?;

        let session = ScanSession::new(volume, calibrated, report, self.histogram_bins);

        if self.eager {
            session.classify_all(progress, cancel);
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
        }

        info!("Scan session ready with {} slice(s)", session.slice_count());
        Ok(session)
    }
}

impl<D: SliceDecoder + 'static> VolumePipeline<D> {
    /// Run the pipeline on the blocking pool of the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(self, path: impl Into<PathBuf>) -> PipelineHandle {
        let (sender, receiver) = watch::channel(Progress::default());
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let path = path.into();

        let task = tokio::task::spawn_blocking(move || self.run(&path, &sender, &worker_cancel));

        PipelineHandle {
            progress: receiver,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
            task,
        }
    }
}

/// A pipeline running in the background. Dropping it cancels the run.
pub struct PipelineHandle {
    progress: watch::Receiver<Progress>,
    cancel: CancellationToken,
    _guard: DropGuard,
    task: JoinHandle<Result<ScanSession, PipelineError>>,
}

impl PipelineHandle {
    /// Latest progress of the current stage; intermediate values may be skipped.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<ScanSession, PipelineError> {
        // Dropping this future before the task ends cancels the run.
        let PipelineHandle {
            _guard,
            task,
            ..
        } = self;
        task.await?
    }
}

#[derive(Debug)]
struct SessionInner {
    volume: Volume,
    calibrated: CalibratedVolume,
    report: LoadReport,
    histogram_bins: usize,
    labels: Vec<OnceLock<Arc<LabelSlice>>>,
    percentages: Vec<OnceLock<TissuePercentages>>,
    histograms: Vec<OnceLock<Arc<Histogram>>>,
}

/// Read-only result of a pipeline run.
///
/// Clones share the same volumes and caches, and can be queried from any
/// number of threads. Derived views are computed on first request per
/// slice and kept.
#[derive(Clone, Debug)]
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

impl ScanSession {
    pub fn new(
        volume: Volume,
        calibrated: CalibratedVolume,
        report: LoadReport,
        histogram_bins: usize,
    ) -> Self {
        let count = calibrated.slice_count();
        Self {
            inner: Arc::new(SessionInner {
                volume,
                calibrated,
                report,
                histogram_bins: histogram_bins.max(1),
                labels: (0..count).map(|_| OnceLock::new()).collect(),
                percentages: (0..count).map(|_| OnceLock::new()).collect(),
                histograms: (0..count).map(|_| OnceLock::new()).collect(),
            }),
        }
    }

    pub fn slice_count(&self) -> usize {
        self.inner.calibrated.slice_count()
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.inner.calibrated.dim()
    }

    pub fn volume(&self) -> &Volume {
        &self.inner.volume
    }

    pub fn calibrated(&self) -> &CalibratedVolume {
        &self.inner.calibrated
    }

    pub fn report(&self) -> &LoadReport {
        &self.inner.report
    }

    pub fn histogram_bins(&self) -> usize {
        self.inner.histogram_bins
    }

    pub fn get_slice(&self, index: isize) -> Result<ArrayView2<'_, f64>, SessionError> {
        let index = self.check_index(index)?;
        Ok(self.calibrated_slice(index))
    }

    pub fn get_label_slice(&self, index: isize) -> Result<Arc<LabelSlice>, SessionError> {
        let index = self.check_index(index)?;
        Ok(Arc::clone(self.labels(index)))
    }

    pub fn get_percentages(&self, index: isize) -> Result<TissuePercentages, SessionError> {
        let index = self.check_index(index)?;
        Ok(self.percentages(index).clone())
    }

    pub fn get_histogram(&self, index: isize) -> Result<Arc<Histogram>, SessionError> {
        let index = self.check_index(index)?;
        let histogram = self.inner.histograms[index].get_or_init(|| {
            Arc::new(Histogram::from_slice(
                &self.calibrated_slice(index),
                self.inner.histogram_bins,
            ))
        });
        Ok(Arc::clone(histogram))
    }

    /// Calibrated slice rendered as grayscale through `window`.
    pub fn get_image(&self, index: isize, window: Window) -> Result<GrayImage, SessionError> {
        let index = self.check_index(index)?;
        slice_to_image(&self.calibrated_slice(index), window).ok_or(SessionError::Render { index })
    }

    /// Tissue labels of a slice as an RGBA overlay.
    pub fn get_overlay(&self, index: isize) -> Result<RgbaImage, SessionError> {
        let index = self.check_index(index)?;
        labels_to_image(self.labels(index)).ok_or(SessionError::Render { index })
    }

    fn classify_all(&self, progress: &dyn ProgressSink, cancel: &CancellationToken) {
        let stage = StageProgress::start(Stage::Classify, self.slice_count(), progress);
        (0..self.slice_count()).into_par_iter().for_each(|index| {
            if cancel.is_cancelled() {
                return;
            }
            self.percentages(index);
            stage.tick();
        });
        if !cancel.is_cancelled() {
            stage.finish();
        }
    }

    fn check_index(&self, index: isize) -> Result<usize, SessionError> {
        let bound = self.slice_count();
        usize::try_from(index)
            .ok()
            .filter(|&i| i < bound)
            .ok_or(SessionError::IndexOutOfRange { index, bound })
    }

    // Callers have checked `index`.
    fn calibrated_slice(&self, index: usize) -> ArrayView2<'_, f64> {
        self.inner.calibrated.data().index_axis(Axis(0), index)
    }

    fn labels(&self, index: usize) -> &Arc<LabelSlice> {
        self.inner.labels[index]
            .get_or_init(|| Arc::new(classify_slice(&self.calibrated_slice(index))))
    }

    fn percentages(&self, index: usize) -> &TissuePercentages {
        self.inner.percentages[index]
            .get_or_init(|| TissuePercentages::from_labels(self.labels(index)))
    }
}

/// Run the whole pipeline on `path` with the DICOM decoder and defaults.
pub fn open_series(path: impl AsRef<Path>) -> Result<ScanSession, PipelineError> {
    VolumePipeline::default().run(path, &NoProgress, &CancellationToken::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decoder::CalibrationParams, enums::TissueClass};
    use ndarray::Array3;

    fn session(values: Array3<f64>) -> ScanSession {
        let depth = values.dim().0;
        let volume = Volume::new(
            values.clone(),
            vec![CalibrationParams::default(); depth],
            (0..depth).map(|i| PathBuf::from(format!("{i}.dcm"))).collect(),
        );
        ScanSession::new(volume, CalibratedVolume::new(values), LoadReport::default(), 10)
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let session = session(Array3::zeros((2, 2, 2)));
        for index in [-1, 2, isize::MAX, isize::MIN] {
            assert!(matches!(
                session.get_slice(index),
                Err(SessionError::IndexOutOfRange { bound: 2, .. })
            ));
            assert!(session.get_label_slice(index).is_err());
            assert!(session.get_percentages(index).is_err());
            assert!(session.get_histogram(index).is_err());
            assert!(session.get_overlay(index).is_err());
        }
    }

    #[test]
    fn derived_views_are_cached() {
        let session = session(Array3::from_elem((1, 3, 3), 40.0));
        let first = session.get_label_slice(0).unwrap();
        let second = session.get_label_slice(0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.iter().all(|&label| label == TissueClass::Muscle));

        let histogram = session.get_histogram(0).unwrap();
        assert!(Arc::ptr_eq(&histogram, &session.get_histogram(0).unwrap()));
        assert_eq!(histogram.total(), 9);
    }

    #[test]
    fn clones_share_caches_across_threads() {
        let session = session(Array3::from_elem((4, 8, 8), 0.0));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let session = session.clone();
                std::thread::spawn(move || session.get_percentages(i).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().get(TissueClass::Water), Some(100.0));
        }
    }

    #[test]
    fn session_is_debuggable() {
        let session = session(Array3::zeros((1, 1, 1)));
        let result: Result<ScanSession, PipelineError> = Ok(session);
        assert!(format!("{result:?}").contains("ScanSession"));
    }

    #[test]
    fn rendering_matches_slice_shape() {
        let session = session(Array3::from_elem((1, 2, 5), 0.0));
        assert_eq!(session.get_image(0, Window::default()).unwrap().dimensions(), (5, 2));
        assert_eq!(session.get_overlay(0).unwrap().dimensions(), (5, 2));
    }
}
