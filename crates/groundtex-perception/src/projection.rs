//! Image-corner projection for a downward camera mounted on a planar robot.
//!
//! Image coordinates have x to the right of the image, y down the image and
//! z along the optical axis.  The camera model looks straight down its own
//! −z axis with image-right along −y and image-down along −x, which is the
//! fixed rotation [`IMAGE_TO_CAMERA`].

use groundtex_types::GroundTexError;

use crate::transform::{Matrix4, matrix_multiply, rigid_inverse, transform_point};

/// Image-frame → camera-frame rotation.
pub const IMAGE_TO_CAMERA: Matrix4 = [
    [0.0, -1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, -1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Maps robot poses to camera poses and to pixel-space image poses.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProjector {
    camera_mount: Matrix4,
    intrinsics: [f64; 9],
}

impl ImageProjector {
    /// `camera_mount` is the camera pose in the robot frame; its z
    /// translation is the distance to the ground.  `intrinsics` is the
    /// row-major 3×3 camera matrix.
    pub fn new(camera_mount: Matrix4, intrinsics: [f64; 9]) -> Result<Self, GroundTexError> {
        let (fx, fy) = (intrinsics[0], intrinsics[4]);
        if !(fx.is_finite() && fy.is_finite()) || fx == 0.0 || fy == 0.0 {
            return Err(GroundTexError::Config(format!(
                "intrinsic matrix is singular (fx = {fx}, fy = {fy})"
            )));
        }
        let height = camera_mount[2][3];
        if !(height > 0.0) {
            return Err(GroundTexError::Config(format!(
                "camera must sit above the ground to project, mount z = {height}"
            )));
        }
        Ok(Self {
            camera_mount,
            intrinsics,
        })
    }

    pub fn camera_mount(&self) -> &Matrix4 {
        &self.camera_mount
    }

    pub fn intrinsics(&self) -> &[f64; 9] {
        &self.intrinsics
    }

    /// Camera pose in the world for a robot at `robot_pose`.
    pub fn camera_to_world(&self, robot_pose: &Matrix4) -> Matrix4 {
        matrix_multiply(robot_pose, &self.camera_mount)
    }

    /// Pixel-space `[x, y, yaw]` of the image's top-left corner, measured in
    /// the image the camera would take with the robot at the world origin.
    ///
    /// The robot at the origin yields `[0, 0, 0]`.
    pub fn project_image_corner(&self, robot_pose: &Matrix4) -> [f64; 3] {
        let height = self.camera_mount[2][3];
        let (x, y) = self.unproject(0.0, 0.0);
        let corner_image = [x * height, y * height, height, 1.0];

        let image_in_robot = matrix_multiply(&self.camera_mount, &IMAGE_TO_CAMERA);
        let corner_robot = transform_point(&image_in_robot, corner_image);
        let corner_world = transform_point(robot_pose, corner_robot);
        let corner_origin_image = transform_point(&rigid_inverse(&image_in_robot), corner_world);

        let (u, v) = self.project(
            corner_origin_image[0] / height,
            corner_origin_image[1] / height,
        );
        let yaw = robot_pose[1][0].atan2(robot_pose[0][0]);
        [u, v, yaw]
    }

    /// Normalised image coordinates of pixel `(u, v)`.
    fn unproject(&self, u: f64, v: f64) -> (f64, f64) {
        let k = &self.intrinsics;
        let y = (v - k[5]) / k[4];
        let x = (u - k[2] - k[1] * y) / k[0];
        (x, y)
    }

    fn project(&self, x: f64, y: f64) -> (f64, f64) {
        let k = &self.intrinsics;
        (k[0] * x + k[1] * y + k[2], k[4] * y + k[5])
    }
}
