//! Point spread function characterisation from bead calibration images.
//!
//! Detects sub-resolution fluorescent beads in 3D microscope stacks, fits
//! intensity profiles through each bead along all three axes, measures FWHM
//! resolution, classifies beads through layered exclusion flags, and builds
//! a registered average bead per channel. The entry point is
//! [`analyse_psf_beads`].

pub mod averaging;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod diagnostics;
pub mod error;
pub mod filters;
pub mod fitting;
pub mod outliers;
pub mod processor;
pub mod registration;
pub mod report;
pub mod stats;

mod analysis;

pub use analysis::analyse_psf_beads;
pub use config::AnalysisConfig;
pub use dataset::{BeadDataset, BeadId, BeadImage, ChannelIndex, ImageId, VoxelSize};
pub use diagnostics::{AnalysisEvent, EventSink, MemorySink, TracingSink};
pub use error::{AnalysisError, FittingError, SaturationError};
pub use fitting::ProfileModel;
pub use processor::ProfileAxis;
pub use report::{FlagClass, PsfBeadsOutput};
