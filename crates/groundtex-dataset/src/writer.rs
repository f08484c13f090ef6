//! Indexed output triples.
//!
//! Every [`DataWriter::write`] call produces three files named after the
//! writer's running index:
//!
//! | File | Contents |
//! |---|---|
//! | `000000.png` | the image, re-packed to tight RGB rows and PNG-encoded |
//! | `000000.txt` | `x,y,z,roll,pitch,yaw` on a single line |
//! | `000000_calib.txt` | the camera-info dump |
//!
//! The index advances after every attempt, successful or not, so a retry
//! never overwrites files from an earlier attempt.
//!
//! With a [`SequenceNaming`] attached, images are filed under the sequence
//! layout instead of `000000.png`; the pose and calibration files keep their
//! indexed names.
//!
//! Once per run the writer can also record
//!
//! | File | Contents |
//! |---|---|
//! | `camera_properties/<camera>_intrinsic_matrix.txt` | the 3×3 camera matrix |
//! | `camera_properties/<camera>_pose.txt` | the 4×4 camera mount in the robot frame |
//! | `<base>.test` | one image path per line |
//! | `<base>_meters.txt` | image path, then its metric robot pose as a flattened 3×3 |
//! | `<base>.txt` | image path, then its pixel-space corner pose as a flattened 3×3 |
//!
//! Matrices are written one row per line, space separated, six decimals.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use groundtex_perception::transform::{Matrix4, rpy_from_quaternion, transform_matrix};
use groundtex_types::{CameraInfo, Image, PixelFormat, Pose2D, Pose3D};
use png::{BitDepth, ColorType, Encoder};
use tracing::{debug, error, info};

use crate::DatasetError;
use crate::sequence::SequenceNaming;

/// Folder under the output directory holding the camera matrices.
pub const CAMERA_PROPERTIES_DIR: &str = "camera_properties";

/// List-file base name when no [`SequenceNaming`] is attached.
pub const DEFAULT_LIST_BASE: &str = "trajectory";

/// One record's entry in the list files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListEntry {
    pub index: u64,
    /// Robot pose in metres and radians.
    pub robot_pose: Pose2D,
    /// Top-left image corner `[x px, y px, yaw rad]`.
    pub pixel_pose: [f64; 3],
}

/// Writes `(image, pose, calibration)` triples into one directory.
#[derive(Debug)]
pub struct DataWriter {
    output_dir: PathBuf,
    index: u64,
    naming: Option<SequenceNaming>,
}

impl DataWriter {
    /// Create a writer targeting `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let mut writer = Self {
            output_dir: PathBuf::new(),
            index: 0,
            naming: None,
        };
        writer.set_output_directory(dir)?;
        Ok(writer)
    }

    /// Point the writer at `dir`.
    ///
    /// Intermediate directories are created; an existing directory is reused
    /// as-is and its contents are left alone.  The index is not reset.
    pub fn set_output_directory(&mut self, dir: impl AsRef<Path>) -> Result<(), DatasetError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| DatasetError::io(dir, e))?;
        info!(dir = %dir.display(), "output directory set");
        self.output_dir = dir.to_path_buf();
        Ok(())
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_dir
    }

    /// File images under `naming`'s sequence layout from now on.
    pub fn set_sequence_naming(&mut self, naming: SequenceNaming) {
        info!(base = %naming.base_name(), "sequence naming enabled");
        self.naming = Some(naming);
    }

    pub fn sequence_naming(&self) -> Option<&SequenceNaming> {
        self.naming.as_ref()
    }

    /// Path of record `index`'s image, relative to the output directory.
    pub fn image_path(&self, index: u64) -> PathBuf {
        match &self.naming {
            Some(naming) => naming.image_path(index),
            None => PathBuf::from(format!("{index:06}.png")),
        }
    }

    /// Index the next [`write`](Self::write) will use.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Write one triple and return the index it was written under.
    ///
    /// All three files are attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn write(
        &mut self,
        image: &Image,
        pose: &Pose3D,
        camera_info: &CameraInfo,
    ) -> Result<u64, DatasetError> {
        let index = self.index;
        self.index += 1;
        let stem = format!("{index:06}");

        let results = [
            self.write_image(index, image),
            self.write_text(&format!("{stem}.txt"), &format_pose_line(pose)),
            self.write_text(&format!("{stem}_calib.txt"), &camera_info.to_string()),
        ];

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                error!(index, error = %e, "output file not written");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(index, "triple written");
                Ok(index)
            }
        }
    }

    /// Write the camera matrix and the camera mount pose under
    /// `camera_properties/`.  Both files are attempted; the first failure is
    /// returned.
    pub fn write_camera_properties(
        &self,
        camera_name: &str,
        intrinsics: &[f64; 9],
        camera_mount: &Matrix4,
    ) -> Result<(), DatasetError> {
        let dir = self.output_dir.join(CAMERA_PROPERTIES_DIR);
        fs::create_dir_all(&dir).map_err(|e| DatasetError::io(&dir, e))?;

        let k_rows = intrinsics.chunks(3);
        let mount_rows = camera_mount.iter().map(|row| row.as_slice());
        let intrinsic_path = dir.join(format!("{camera_name}_intrinsic_matrix.txt"));
        let pose_path = dir.join(format!("{camera_name}_pose.txt"));
        let first = fs::write(&intrinsic_path, format_matrix(k_rows))
            .map_err(|e| DatasetError::io(&intrinsic_path, e));
        let second = fs::write(&pose_path, format_matrix(mount_rows))
            .map_err(|e| DatasetError::io(&pose_path, e));
        first.and(second)?;
        debug!(camera = camera_name, "camera properties written");
        Ok(())
    }

    /// Write the three list files for `entries`, in order.
    pub fn write_lists(&self, entries: &[ListEntry]) -> Result<(), DatasetError> {
        let base = self
            .naming
            .as_ref()
            .map_or_else(|| DEFAULT_LIST_BASE.to_string(), SequenceNaming::base_name);

        let mut test = String::new();
        let mut meters = String::new();
        let mut pixels = String::new();
        for entry in entries {
            let image = format!("{}\n", self.image_path(entry.index).display());
            let r = entry.robot_pose;
            let [u, v, yaw] = entry.pixel_pose;
            test.push_str(&image);
            meters.push_str(&image);
            meters.push_str(&planar_pose_row(r.x, r.y, r.yaw));
            pixels.push_str(&image);
            pixels.push_str(&planar_pose_row(u, v, yaw));
        }

        for (name, contents) in [
            (format!("{base}.test"), test),
            (format!("{base}_meters.txt"), meters),
            (format!("{base}.txt"), pixels),
        ] {
            self.write_text(&name, &contents)?;
        }
        info!(records = entries.len(), base = %base, "list files written");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn write_image(&self, index: u64, image: &Image) -> Result<(), DatasetError> {
        let rgb = packed_rgb(image)?;
        let path = self.output_dir.join(self.image_path(index));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| DatasetError::io(&path, e))?;

        let mut encoder = Encoder::new(BufWriter::new(file), image.width, image.height);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| DatasetError::PngEncoding(e.to_string()))?;
        writer
            .write_image_data(&rgb)
            .map_err(|e| DatasetError::PngEncoding(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| DatasetError::PngEncoding(e.to_string()))
    }

    fn write_text(&self, name: &str, contents: &str) -> Result<(), DatasetError> {
        let path = self.output_dir.join(name);
        fs::write(&path, contents).map_err(|e| DatasetError::io(&path, e))
    }
}

/// `x,y,z,roll,pitch,yaw\n` using shortest round-trip float formatting.
pub fn format_pose_line(pose: &Pose3D) -> String {
    let (roll, pitch, yaw) = rpy_from_quaternion(&pose.orientation);
    let p = pose.position;
    format!("{},{},{},{},{},{}\n", p.x, p.y, p.z, roll, pitch, yaw)
}

/// Rows of a matrix, space separated with six decimals, one row per line.
pub fn format_matrix<'a>(rows: impl IntoIterator<Item = &'a [f64]>) -> String {
    let mut out = String::new();
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        out.push_str(&cells.join(" "));
        out.push('\n');
    }
    out
}

/// A planar pose as its homogeneous 3×3 matrix flattened onto one line.
pub fn planar_pose_row(x: f64, y: f64, yaw: f64) -> String {
    let m = transform_matrix(x, y, 0.0, 0.0, 0.0, yaw);
    let row = [m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], 0.0, 0.0, 1.0];
    format_matrix([row.as_slice()])
}

/// Copy the pixel rows of an RGB8 image into a tightly packed buffer,
/// dropping any per-row padding.
pub fn packed_rgb(image: &Image) -> Result<Vec<u8>, DatasetError> {
    if image.pixel_format != PixelFormat::Rgb8 {
        return Err(DatasetError::UnsupportedPixelFormat(
            image.pixel_format.to_string(),
        ));
    }
    if image.width == 0 || image.height == 0 {
        return Err(DatasetError::InvalidImage(format!(
            "empty {}x{} image",
            image.width, image.height
        )));
    }

    let row_len = image.width as usize * 3;
    let step = image.step as usize;
    if step < row_len {
        return Err(DatasetError::InvalidImage(format!(
            "row step {step} is shorter than {row_len} bytes of pixels"
        )));
    }
    let needed = step * (image.height as usize - 1) + row_len;
    if image.data.len() < needed {
        return Err(DatasetError::InvalidImage(format!(
            "{} bytes of data, {needed} needed for {}x{} with step {step}",
            image.data.len(),
            image.width,
            image.height
        )));
    }

    let mut rgb = Vec::with_capacity(row_len * image.height as usize);
    for row in 0..image.height as usize {
        let start = row * step;
        rgb.extend_from_slice(&image.data[start..start + row_len]);
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundtex_types::{Quaternion, Vec3};

    fn sample_image() -> Image {
        // 2x2, with two bytes of padding per row.
        Image {
            width: 2,
            height: 2,
            step: 8,
            pixel_format: PixelFormat::Rgb8,
            data: vec![
                255, 0, 0, 0, 255, 0, 0xAA, 0xAA, //
                0, 0, 255, 9, 9, 9, 0xAA, 0xAA,
            ],
        }
    }

    fn sample_info() -> CameraInfo {
        CameraInfo {
            frame_id: "camera".into(),
            width: 2,
            height: 2,
            distortion_model: "plumb_bob".into(),
            distortion: vec![0.0; 5],
            intrinsics: [500.0, 0.0, 1.0, 0.0, 500.0, 1.0, 0.0, 0.0, 1.0],
            projection: [0.0; 12],
        }
    }

    fn identity_pose() -> Pose3D {
        Pose3D::new(Vec3::new(1.1, 2.2, 3.3), Quaternion::identity())
    }

    #[test]
    fn pose_line_keeps_negative_zero_pitch() {
        assert_eq!(format_pose_line(&identity_pose()), "1.1,2.2,3.3,0,-0,0\n");
    }

    #[test]
    fn consecutive_writes_use_consecutive_indices() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("nested").join("output");
        let mut writer = DataWriter::new(&dir)?;

        assert_eq!(writer.write(&sample_image(), &identity_pose(), &sample_info())?, 0);
        assert_eq!(writer.write(&sample_image(), &identity_pose(), &sample_info())?, 1);
        assert_eq!(writer.index(), 2);

        for stem in ["000000", "000001"] {
            assert!(dir.join(format!("{stem}.png")).is_file());
            assert!(dir.join(format!("{stem}_calib.txt")).is_file());
            assert_eq!(
                fs::read_to_string(dir.join(format!("{stem}.txt")))?,
                "1.1,2.2,3.3,0,-0,0\n"
            );
        }
        Ok(())
    }

    #[test]
    fn calibration_file_is_the_camera_info_dump() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut writer = DataWriter::new(dir.path())?;
        writer.write(&sample_image(), &identity_pose(), &sample_info())?;

        let calib = fs::read_to_string(dir.path().join("000000_calib.txt"))?;
        assert_eq!(calib, sample_info().to_string());
        assert!(calib.starts_with("frame_id: \"camera\"\n"));
        Ok(())
    }

    #[test]
    fn png_holds_packed_rgb_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut writer = DataWriter::new(dir.path())?;
        writer.write(&sample_image(), &identity_pose(), &sample_info())?;

        let file = File::open(dir.path().join("000000.png"))?;
        let mut reader = png::Decoder::new(file).read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;

        assert_eq!((info.width, info.height), (2, 2));
        assert_eq!(info.color_type, ColorType::Rgb);
        assert_eq!(
            &buf[..info.buffer_size()],
            &[255, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9]
        );
        Ok(())
    }

    #[test]
    fn existing_directory_contents_survive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let keep = dir.path().join("notes.md");
        fs::write(&keep, "keep me")?;

        let mut writer = DataWriter::new(dir.path())?;
        writer.set_output_directory(dir.path())?;
        assert_eq!(fs::read_to_string(&keep)?, "keep me");
        assert_eq!(writer.output_directory(), dir.path());
        Ok(())
    }

    #[test]
    fn unsupported_format_fails_but_advances_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut writer = DataWriter::new(dir.path())?;
        let mono = Image::packed(2, 2, PixelFormat::Mono8, vec![0; 4]);

        let err = writer
            .write(&mono, &identity_pose(), &sample_info())
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedPixelFormat(_)));
        assert_eq!(writer.index(), 1);

        // The other two files were still attempted.
        assert!(!dir.path().join("000000.png").exists());
        assert!(dir.path().join("000000.txt").is_file());
        assert!(dir.path().join("000000_calib.txt").is_file());

        assert_eq!(writer.write(&sample_image(), &identity_pose(), &sample_info())?, 1);
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut image = sample_image();
        image.data.truncate(10);
        assert!(matches!(
            packed_rgb(&image),
            Err(DatasetError::InvalidImage(_))
        ));
    }

    #[test]
    fn last_row_needs_no_padding() -> Result<(), DatasetError> {
        let mut image = sample_image();
        image.data.truncate(14);
        assert_eq!(packed_rgb(&image)?.len(), 12);
        Ok(())
    }

    #[test]
    fn camera_properties_are_six_decimal_matrices() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let writer = DataWriter::new(dir.path())?;
        let mount = transform_matrix(0.1, 0.0, 0.25, 0.0, 0.0, 0.0);
        writer.write_camera_properties("camera", &sample_info().intrinsics, &mount)?;

        let props = dir.path().join(CAMERA_PROPERTIES_DIR);
        assert_eq!(
            fs::read_to_string(props.join("camera_intrinsic_matrix.txt"))?,
            "500.000000 0.000000 1.000000\n\
             0.000000 500.000000 1.000000\n\
             0.000000 0.000000 1.000000\n"
        );
        assert_eq!(
            fs::read_to_string(props.join("camera_pose.txt"))?,
            "1.000000 0.000000 0.000000 0.100000\n\
             0.000000 1.000000 0.000000 0.000000\n\
             0.000000 0.000000 1.000000 0.250000\n\
             0.000000 0.000000 0.000000 1.000000\n"
        );
        Ok(())
    }

    #[test]
    fn list_files_pair_images_with_poses() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let writer = DataWriter::new(dir.path())?;
        let entries = [
            ListEntry {
                index: 0,
                robot_pose: Pose2D::new(1.0, 2.0, 0.0),
                pixel_pose: [0.0, -20.0, 0.0],
            },
            ListEntry {
                index: 1,
                robot_pose: Pose2D::new(0.0, 0.5, std::f64::consts::FRAC_PI_2),
                pixel_pose: [10.0, 90.0, std::f64::consts::FRAC_PI_2],
            },
        ];
        writer.write_lists(&entries)?;

        assert_eq!(
            fs::read_to_string(dir.path().join("trajectory.test"))?,
            "000000.png\n000001.png\n"
        );
        let meters = fs::read_to_string(dir.path().join("trajectory_meters.txt"))?;
        let lines: Vec<&str> = meters.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "000000.png");
        assert_eq!(
            lines[1],
            "1.000000 0.000000 1.000000 0.000000 1.000000 2.000000 0.000000 0.000000 1.000000"
        );
        assert_eq!(lines[2], "000001.png");
        assert_eq!(
            lines[3],
            "0.000000 -1.000000 0.000000 1.000000 0.000000 0.500000 0.000000 0.000000 1.000000"
        );

        let pixels = fs::read_to_string(dir.path().join("trajectory.txt"))?;
        assert_eq!(
            pixels.lines().nth(1),
            Some("1.000000 0.000000 0.000000 0.000000 1.000000 -20.000000 0.000000 0.000000 1.000000")
        );
        Ok(())
    }

    #[test]
    fn sequence_naming_files_images_by_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut writer = DataWriter::new(dir.path())?;
        let naming = SequenceNaming {
            sequence_type: "grid".to_string(),
            sequence_number: 3,
            texture_number: 5,
            camera_name: "c01".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 1, 31).unwrap_or_default(),
        };
        writer.set_sequence_naming(naming.clone());

        let index = writer.write(&sample_image(), &identity_pose(), &sample_info())?;
        let image = dir.path().join(naming.image_path(index));
        assert!(image.is_file(), "{} missing", image.display());
        assert!(dir.path().join("000000.txt").is_file());
        assert!(!dir.path().join("000000.png").exists());

        writer.write_lists(&[ListEntry {
            index,
            robot_pose: Pose2D::new(0.0, 0.0, 0.0),
            pixel_pose: [0.0, 0.0, 0.0],
        }])?;
        assert_eq!(
            fs::read_to_string(dir.path().join("grid_250131.test"))?,
            "grid/250131/seq0003/HDG2_t005_grid_2025-01-31_s0003_c01_i0000000.png\n"
        );
        assert!(dir.path().join("grid_250131_meters.txt").is_file());
        assert!(dir.path().join("grid_250131.txt").is_file());
        Ok(())
    }
}
