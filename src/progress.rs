//! Stage-scoped progress accounting.
//!
//! Each pipeline stage owns a [`StageProgress`] counter that is shared by the
//! workers of that stage. Every finished item is turned into a
//! [`Progress`] snapshot and handed to a [`ProgressSink`]. Sinks must not
//! block: a sink that cannot keep up may drop intermediate values, but the
//! last snapshot of a completed stage always has `fraction == 1.0`.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use crate::enums::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    pub stage: Stage,
    /// Completed fraction of the stage in `[0.0, 1.0]`.
    pub fraction: f32,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Latest value wins; never blocks and never fails, even without receivers.
impl ProgressSink for watch::Sender<Progress> {
    fn report(&self, progress: Progress) {
        self.send_replace(progress);
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

pub struct StageProgress<'a> {
    stage: Stage,
    total: usize,
    done: Mutex<usize>,
    sink: &'a dyn ProgressSink,
}

impl<'a> StageProgress<'a> {
    /// Starts a stage of `total` items and reports `0.0`.
    pub fn start(stage: Stage, total: usize, sink: &'a dyn ProgressSink) -> Self {
        sink.report(Progress {
            stage,
            fraction: 0.0,
        });
        Self {
            stage,
            total,
            done: Mutex::new(0),
            sink,
        }
    }

    /// Marks one item as done and reports the new fraction.
    ///
    /// The counter lock is held while reporting so that concurrent workers
    /// deliver strictly non-decreasing fractions.
    pub fn tick(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = (*done + 1).min(self.total);
        self.sink.report(Progress {
            stage: self.stage,
            fraction: Self::fraction(*done, self.total),
        });
    }

    /// Reports `1.0` unless the stage already got there through ticks.
    pub fn finish(&self) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        if *done < self.total || self.total == 0 {
            self.sink.report(Progress {
                stage: self.stage,
                fraction: 1.0,
            });
        }
    }

    pub fn done(&self) -> usize {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fraction(done: usize, total: usize) -> f32 {
        if total == 0 {
            1.0
        } else {
            done as f32 / total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn ticks_reach_exactly_one() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: Progress| seen.lock().unwrap().push(p);
        let progress = StageProgress::start(Stage::Load, 3, &sink);
        for _ in 0..3 {
            progress.tick();
        }
        progress.finish();
        drop(progress);

        let fractions: Vec<f32> = seen.into_inner().unwrap().iter().map(|p| p.fraction).collect();
        assert_eq!(fractions.first(), Some(&0.0));
        assert_eq!(fractions.last(), Some(&1.0));
        // finish() does not repeat a 1.0 that was already delivered
        assert_eq!(fractions.len(), 4);
    }

    #[test]
    fn concurrent_ticks_are_monotonic() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: Progress| seen.lock().unwrap().push(p);
        let progress = StageProgress::start(Stage::Convert, 500, &sink);
        (0..500).into_par_iter().for_each(|_| progress.tick());
        assert_eq!(progress.done(), 500);
        drop(progress);

        let seen = seen.into_inner().unwrap();
        assert!(seen.windows(2).all(|w| w[0].fraction <= w[1].fraction));
        assert!(seen.iter().all(|p| p.stage == Stage::Convert));
        assert_eq!(seen.last().map(|p| p.fraction), Some(1.0));
    }

    #[test]
    fn watch_sender_keeps_latest() {
        let (tx, rx) = watch::channel(Progress::default());
        let progress = StageProgress::start(Stage::Load, 2, &tx);
        progress.tick();
        progress.tick();
        assert_eq!(rx.borrow().fraction, 1.0);
    }
}
