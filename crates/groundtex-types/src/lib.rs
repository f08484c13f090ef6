use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A planar pose: position on the ground plane plus heading.
///
/// `yaw` is in radians and may be any real value at input; consumers wrap it
/// to `[-π, π]` before use.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    /// Location along the X-axis, in metres.
    pub x: f64,
    /// Location along the Y-axis, in metres.
    pub y: f64,
    /// Rotation about the Z-axis, in radians.
    pub yaw: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }
}

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
///
/// `q` and `-q` encode the same rotation; compare orientations with
/// `groundtex_perception::transform::same_rotation`, never with `==`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// A full 3-D pose: position plus quaternion orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose3D {
    pub position: Vec3,
    pub orientation: Quaternion,
}

impl Pose3D {
    pub fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

/// One model's pose inside a pose-list sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPose {
    /// Model name in the simulated world, e.g. `"camera"`.
    pub name: String,
    pub pose: Pose3D,
}

/// A body-frame velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    /// Linear velocity (m/s): `x` forward, `y` left, `z` up.
    pub linear: Vec3,
    /// Angular velocity (rad/s) about each body axis.
    pub angular: Vec3,
}

// ────────────────────────────────────────────────────────────────────────────
// Images and calibration
// ────────────────────────────────────────────────────────────────────────────

/// Pixel layouts a camera feed may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgr8,
    Mono8,
}

impl PixelFormat {
    /// Number of bytes a single pixel occupies.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Mono8 => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgb8 => "RGB_INT8",
            PixelFormat::Rgba8 => "RGBA_INT8",
            PixelFormat::Bgr8 => "BGR_INT8",
            PixelFormat::Mono8 => "L_INT8",
        };
        f.write_str(name)
    }
}

/// A raw image frame as delivered by a camera feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Length of one row in bytes.  May exceed `width * bytes_per_pixel`
    /// when the producer pads rows.
    pub step: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl Image {
    /// Build a tightly packed image (`step = width * bytes_per_pixel`).
    pub fn packed(width: u32, height: u32, pixel_format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            step: width * pixel_format.bytes_per_pixel() as u32,
            pixel_format,
            data,
        }
    }
}

/// Camera calibration as published alongside each image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    /// e.g. `"plumb_bob"`.
    pub distortion_model: String,
    pub distortion: Vec<f64>,
    /// Row-major 3x3 intrinsic matrix `K`.
    pub intrinsics: [f64; 9],
    /// Row-major 3x4 projection matrix `P`.
    pub projection: [f64; 12],
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, values: &[f64]) -> fmt::Result {
    let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    writeln!(f, "{name}: [{}]", joined.join(", "))
}

/// Human-readable dump, one `field: value` per line.
impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frame_id: \"{}\"", self.frame_id)?;
        writeln!(f, "width: {}", self.width)?;
        writeln!(f, "height: {}", self.height)?;
        writeln!(f, "distortion_model: \"{}\"", self.distortion_model)?;
        write_list(f, "distortion", &self.distortion)?;
        write_list(f, "intrinsics", &self.intrinsics)?;
        write_list(f, "projection", &self.projection)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topic samples
// ────────────────────────────────────────────────────────────────────────────

/// The message type a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKind {
    Image,
    CameraInfo,
    PoseList,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleKind::Image => "image",
            SampleKind::CameraInfo => "camera_info",
            SampleKind::PoseList => "pose_list",
        };
        f.write_str(name)
    }
}

/// Typed payload carried by a [`TopicSample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplePayload {
    Image(Image),
    CameraInfo(CameraInfo),
    PoseList(Vec<NamedPose>),
}

impl SamplePayload {
    pub fn kind(&self) -> SampleKind {
        match self {
            SamplePayload::Image(_) => SampleKind::Image,
            SamplePayload::CameraInfo(_) => SampleKind::CameraInfo,
            SamplePayload::PoseList(_) => SampleKind::PoseList,
        }
    }
}

/// A sample that arrived on a named feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSample {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"/camera_info"`
    pub topic: String,
    /// Per-topic publish counter stamped by the feed bus (first sample is 1).
    /// Zero means the sample never went through a bus.
    #[serde(default)]
    pub sequence: u64,
    pub payload: SamplePayload,
}

impl TopicSample {
    /// Wrap `payload` for `topic` with a fresh id and the current time.
    pub fn new(topic: impl Into<String>, payload: SamplePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            sequence: 0,
            payload,
        }
    }

    pub fn kind(&self) -> SampleKind {
        self.payload.kind()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actuation
// ────────────────────────────────────────────────────────────────────────────

/// Request to teleport a model to a pose in the simulated world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub model_name: String,
    pub pose: Pose3D,
}

/// Reply from the pose service.
///
/// `executed` reports whether the transport delivered the request,
/// `accepted` whether the service took it, and `ok` the service's own
/// boolean answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub executed: bool,
    pub accepted: bool,
    pub ok: bool,
}

impl MoveResponse {
    pub fn success() -> Self {
        Self {
            executed: true,
            accepted: true,
            ok: true,
        }
    }

    /// All three flags must hold for the move to count.
    pub fn is_success(&self) -> bool {
        self.executed && self.accepted && self.ok
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning configuration, feeds, actuation and output.
#[derive(Error, Debug)]
pub enum GroundTexError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Topic Registration Failed for {topic}: {reason}")]
    TopicRegistration { topic: String, reason: String },

    #[error("Unexpected Sample on {topic}: expected {expected}, got {actual}")]
    SampleKind {
        topic: String,
        expected: SampleKind,
        actual: SampleKind,
    },

    #[error("Missing Sample: {0}")]
    MissingSample(String),

    #[error("Actuation Failed via {service}: {details}")]
    Actuation { service: String, details: String },

    #[error("Timed Out after {waited:?} while {stage}")]
    Timeout { stage: String, waited: Duration },

    #[error("Cancelled while {0}")]
    Cancelled(String),

    #[error("Middleware Channel Error: {0}")]
    Channel(String),

    #[error("Dataset Error: {0}")]
    Dataset(String),
}
