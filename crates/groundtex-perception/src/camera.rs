//! Pinhole intrinsics from physical lens parameters.
//!
//! The simulated world describes its camera the way a 3-D modelling tool
//! does: focal length and sensor size in millimetres plus a render
//! resolution.  [`intrinsic_matrix`] turns that into the row-major 3×3 `K`
//! published on the camera-info feed.

use serde::{Deserialize, Serialize};

use groundtex_types::CameraInfo;

/// Which sensor dimension the focal length is fitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFit {
    #[default]
    Auto,
    Horizontal,
    Vertical,
}

/// Physical description of a simulated camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensParams {
    pub focal_length_mm: f64,
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub resolution_x: u32,
    pub resolution_y: u32,
    /// Render scale in percent; 100 renders at `resolution_x × resolution_y`.
    pub resolution_percentage: f64,
    pub pixel_aspect_x: f64,
    pub pixel_aspect_y: f64,
    #[serde(default)]
    pub sensor_fit: SensorFit,
}

impl Default for LensParams {
    fn default() -> Self {
        Self {
            focal_length_mm: 50.0,
            sensor_width_mm: 36.0,
            sensor_height_mm: 24.0,
            resolution_x: 320,
            resolution_y: 240,
            resolution_percentage: 100.0,
            pixel_aspect_x: 1.0,
            pixel_aspect_y: 1.0,
            sensor_fit: SensorFit::Auto,
        }
    }
}

impl LensParams {
    /// Rendered image size in pixels after applying the resolution scale.
    pub fn image_size(&self) -> (u32, u32) {
        let scale = self.resolution_percentage / 100.0;
        (
            (f64::from(self.resolution_x) * scale).round() as u32,
            (f64::from(self.resolution_y) * scale).round() as u32,
        )
    }
}

/// Row-major intrinsic matrix `[αu, 0, u0, 0, αv, v0, 0, 0, 1]`.
pub fn intrinsic_matrix(lens: &LensParams) -> [f64; 9] {
    let scale = lens.resolution_percentage / 100.0;
    let res_x = f64::from(lens.resolution_x);
    let res_y = f64::from(lens.resolution_y);
    let aspect = lens.pixel_aspect_x / lens.pixel_aspect_y;

    let (s_u, s_v) = match lens.sensor_fit {
        SensorFit::Vertical => (
            res_x * scale / lens.sensor_width_mm / aspect,
            res_y * scale / lens.sensor_height_mm,
        ),
        SensorFit::Auto | SensorFit::Horizontal => (
            res_x * scale / lens.sensor_width_mm,
            res_y * scale * aspect / lens.sensor_height_mm,
        ),
    };

    let alpha_u = lens.focal_length_mm * s_u;
    let alpha_v = lens.focal_length_mm * s_v;
    let u0 = res_x * scale / 2.0;
    let v0 = res_y * scale / 2.0;

    [alpha_u, 0.0, u0, 0.0, alpha_v, v0, 0.0, 0.0, 1.0]
}

/// Distortion-free calibration for `lens`, with `P = [K | 0]`.
pub fn camera_info_from_lens(frame_id: impl Into<String>, lens: &LensParams) -> CameraInfo {
    let k = intrinsic_matrix(lens);
    let (width, height) = lens.image_size();
    let projection = [
        k[0], k[1], k[2], 0.0, //
        k[3], k[4], k[5], 0.0, //
        k[6], k[7], k[8], 0.0,
    ];

    CameraInfo {
        frame_id: frame_id.into(),
        width,
        height,
        distortion_model: "plumb_bob".to_string(),
        distortion: vec![0.0; 5],
        intrinsics: k,
        projection,
    }
}
