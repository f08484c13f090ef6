//! `groundtex-dataset` – what goes in and what comes out.
//!
//! # Modules
//!
//! - [`trajectory`] – loads the `x,y,yaw` CSV that drives a capture run.
//! - [`writer`] – [`DataWriter`][writer::DataWriter]: persists one indexed
//!   `(image, pose, calibration)` triple per call, plus the camera matrices
//!   and the per-run list files.
//! - [`sequence`] – names images and list files after the capture run.

use std::path::PathBuf;

use groundtex_types::GroundTexError;
use thiserror::Error;

pub mod sequence;
pub mod trajectory;
pub mod writer;

pub use sequence::SequenceNaming;
pub use trajectory::{load_trajectory, parse_trajectory};
pub use writer::{DataWriter, ListEntry};

/// Errors raised while reading trajectories or writing output files.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse line {line_number} ({line:?}): {reason}")]
    Parse {
        line_number: usize,
        line: String,
        reason: String,
    },

    #[error("Unsupported pixel format {0}; only RGB_INT8 can be written")]
    UnsupportedPixelFormat(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("PNG encoding error: {0}")]
    PngEncoding(String),
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<DatasetError> for GroundTexError {
    fn from(err: DatasetError) -> Self {
        GroundTexError::Dataset(err.to_string())
    }
}
