//! `groundtex-perception` – pose and camera geometry.
//!
//! Pure math shared by the follower, the dataset writer and the simulated
//! world.  Nothing here touches I/O.
//!
//! # Modules
//!
//! - [`transform`] – planar/3-D pose conversion, quaternion ↔ roll/pitch/yaw,
//!   angle wrapping, tolerance comparisons, pose composition and homogeneous
//!   matrices.
//! - [`camera`] – pinhole intrinsics derived from physical lens parameters.
//! - [`projection`] – camera mount and image-corner projection.

pub mod camera;
pub mod projection;
pub mod transform;

pub use camera::{LensParams, SensorFit, camera_info_from_lens, intrinsic_matrix};
pub use projection::ImageProjector;
pub use transform::{
    Matrix4, angle_difference, compose_poses, matrix_from_pose, pose_from_pose2d,
    poses_within_tolerance, quaternion_from_euler, quaternion_from_yaw, rpy_from_quaternion,
    same_rotation, transform_matrix, wrap_angle,
};
