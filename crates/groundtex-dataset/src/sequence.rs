//! Sequence-based dataset naming.
//!
//! A sequence is one capture run over one ground texture.  Images are filed
//! under
//!
//! ```text
//! <type>/<yymmdd>/seq<NNNN>/HDG2_t<TTT>_<type>_<YYYY-MM-DD>_s<NNNN>_<camera>_i<IIIIIII>.png
//! ```
//!
//! and the three list files share the base name `<type>_<yymmdd>`.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Names images and list files after the run that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceNaming {
    /// Kind of run, e.g. `"random"` or `"grid"`.
    pub sequence_type: String,
    pub sequence_number: u32,
    pub texture_number: u32,
    /// Camera tag embedded in image names.
    pub camera_name: String,
    /// Collection date; defaults to today.
    pub date: NaiveDate,
}

impl Default for SequenceNaming {
    fn default() -> Self {
        Self {
            sequence_type: "sequence".to_string(),
            sequence_number: 0,
            texture_number: 0,
            camera_name: "c01".to_string(),
            date: Local::now().date_naive(),
        }
    }
}

impl SequenceNaming {
    /// Names must be usable as single path components.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("sequence_type", &self.sequence_type),
            ("camera_name", &self.camera_name),
        ] {
            if value.is_empty() {
                return Err(format!("{field} must not be empty"));
            }
            if value.contains(['/', '\\']) || value.chars().any(char::is_whitespace) {
                return Err(format!(
                    "{field} must not contain separators or whitespace, got {value:?}"
                ));
            }
        }
        Ok(())
    }

    /// `<type>_<yymmdd>`, shared by the list files.
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.sequence_type, self.date.format("%y%m%d"))
    }

    /// Image path for record `index`, relative to the output directory.
    pub fn image_path(&self, index: u64) -> PathBuf {
        let file_name = format!(
            "HDG2_t{:03}_{}_{}_s{:04}_{}_i{:07}.png",
            self.texture_number,
            self.sequence_type,
            self.date.format("%Y-%m-%d"),
            self.sequence_number,
            self.camera_name,
            index
        );
        PathBuf::from(&self.sequence_type)
            .join(self.date.format("%y%m%d").to_string())
            .join(format!("seq{:04}", self.sequence_number))
            .join(file_name)
    }

    /// List of image paths only.
    pub fn test_list_file(&self) -> String {
        format!("{}.test", self.base_name())
    }

    /// Image paths alternating with metric robot poses.
    pub fn meters_list_file(&self) -> String {
        format!("{}_meters.txt", self.base_name())
    }

    /// Image paths alternating with pixel-space corner poses.
    pub fn pixels_list_file(&self) -> String {
        format!("{}.txt", self.base_name())
    }
}
