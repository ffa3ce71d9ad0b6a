use ndarray::{Array3, Axis, Zip};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    enums::Stage,
    progress::{ProgressSink, StageProgress},
    volume::{CalibratedVolume, Volume},
};

/// Applies each slice's rescale: `calibrated = raw * slope + intercept`.
///
/// Values stay in f64 and are never clamped.
pub struct RadiometricConverter;

impl RadiometricConverter {
    /// Returns `None` if `cancel` fired before every slice was converted.
    pub fn convert(
        volume: &Volume,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Option<CalibratedVolume> {
        let stage = StageProgress::start(Stage::Convert, volume.slice_count(), progress);
        let mut calibrated = Array3::<f64>::zeros(volume.dim());

        calibrated
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(volume.data().axis_iter(Axis(0)).into_par_iter())
            .zip(volume.calibrations().par_iter())
            .for_each(|((mut out, raw), calibration)| {
                if cancel.is_cancelled() {
                    return;
                }
                Zip::from(&mut out)
                    .and(&raw)
                    .for_each(|out, &raw| *out = calibration.apply(raw));
                stage.tick();
            });

        if cancel.is_cancelled() {
            return None;
        }
        stage.finish();
        info!("Converted {} slice(s) to calibrated units", volume.slice_count());

        Some(CalibratedVolume::new(calibrated))
    }
}
