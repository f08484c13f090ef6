//! The actuation seam.
//!
//! The follower never talks to a simulator directly.  It sends a
//! [`MoveRequest`] through a [`PoseService`], and whatever sits behind the
//! trait (the in-process simulated world, a transport bridge, a test double)
//! teleports the model.
//!
//! # Contract
//!
//! * A transport-level failure (service unreachable, request lost) is an
//!   `Err`.
//! * A request that arrived but was refused is an `Ok` [`MoveResponse`] with
//!   at least one flag cleared.  Callers treat anything other than
//!   [`MoveResponse::is_success`] as a failed move.

use async_trait::async_trait;
use groundtex_types::{GroundTexError, MoveRequest, MoveResponse};

/// Something that can set the pose of a model in the world.
#[async_trait]
pub trait PoseService: Send + Sync {
    /// Name used in logs and error messages, e.g. `/world/ground_texture/set_pose`.
    fn service_name(&self) -> &str;

    /// Ask the world to place `request.model_name` at `request.pose`.
    async fn set_pose(&self, request: MoveRequest) -> Result<MoveResponse, GroundTexError>;
}
