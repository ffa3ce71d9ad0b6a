//! # DICOM-survey library
//!
//! Loads a directory of DICOM slices into a volume, rescales it to
//! Hounsfield units and surveys it slice by slice: a tissue label overlay,
//! the tissue composition of each slice and an intensity histogram.
//!
//! The pipeline runs in three stages, each reporting its progress as a
//! fraction in `[0, 1]`:
//!  - Load: every file with the configured extension (`.dcm` by default,
//!    matched case-sensitively) below the directory is decoded in parallel
//!    with rayon. Slices are stacked in path order.
//!  - Convert: stored values are rescaled with each slice's own
//!    Rescale Slope and Rescale Intercept.
//!  - Classify: optional, labels are otherwise computed on first request.
//!
//! The result is a [`ScanSession`](pipeline::ScanSession): read-only,
//! cheap to clone and safe to query from several threads.
//!
//! Tissue bands, checked in this order (first match wins):
//!
//! | class    | band (HU)          |
//! |----------|--------------------|
//! | Air      | `< -700`           |
//! | Fat      | `[-100, -80)`      |
//! | Water    | `[-5, 5]`          |
//! | Blood    | `[70, 90]`         |
//! | Muscle   | `[30, 50]`         |
//! | Contrast | `[120, 140]`       |
//! | Bone     | `> 130`            |
//!
//! Anything else is `Unclassified`. Percentages leave out Air and
//! Unclassified voxels.
//!
//! # Examples
//!
//! ## Surveying the center slice of a series
//!
//! ```no_run
//! # use dicom_survey::{enums::TissueClass, pipeline::open_series};
//! let session = open_series("dicom").expect("should have loaded files from directory");
//! let center = (session.slice_count() / 2) as isize;
//! let percentages = session
//!     .get_percentages(center)
//!     .expect("should have classified the center slice");
//! println!("bone: {:.1}%", percentages.get(TissueClass::Bone).unwrap_or(0.0));
//! session
//!     .get_overlay(center)
//!     .expect("should have rendered the overlay")
//!     .save("overlay.png")
//!     .expect("should have written the overlay");
//! ```
//!
//! ## Running in the background
//!
//! ```no_run
//! # use dicom_survey::{pipeline::VolumePipeline, volume_loader::LoadOptions};
//! # async fn run() {
//! let handle = VolumePipeline::new(LoadOptions::default()).spawn("dicom");
//! let mut progress = handle.progress();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let p = *progress.borrow();
//!         println!("{}: {:.0}%", p.stage, p.fraction * 100.0);
//!     }
//! });
//! let session = handle.wait().await.expect("should have loaded the series");
//! # }
//! ```

pub mod classifier;
pub mod converter;
pub mod decoder;
pub mod enums;
pub mod histogram;
pub mod pipeline;
pub mod progress;
pub mod volume;
pub mod volume_loader;
