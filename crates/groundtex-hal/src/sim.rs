//! In-process simulated world for headless runs and CI.
//!
//! [`SimWorld`] stands in for a real simulator: it owns one camera model
//! hovering over a textured ground plane, accepts teleport requests through
//! [`PoseService`], and publishes the three feeds the capture pipeline
//! consumes on a [`FeedBus`]:
//!
//! | Feed | Payload |
//! |---|---|
//! | pose topic | pose list with the camera model and a static `ground_plane` |
//! | camera-info topic | calibration derived from [`LensParams`] |
//! | image topic | RGB8 render of the procedural ground texture under the camera |
//!
//! A commanded pose is not reached instantly: the position is interpolated
//! over `settle_ticks` publish ticks and then snapped exactly onto the
//! target, so consumers must genuinely wait for convergence.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use groundtex_hal::sim::{SimWorld, SimWorldConfig};
//! use groundtex_middleware::FeedBus;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), groundtex_types::GroundTexError> {
//! let bus = FeedBus::default();
//! let world = Arc::new(SimWorld::new(SimWorldConfig::default(), bus.clone())?);
//! let cancel = CancellationToken::new();
//! let task = Arc::clone(&world).spawn(cancel.clone());
//! // ... drive the world through `PoseService::set_pose` ...
//! cancel.cancel();
//! let _ = task.await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use groundtex_middleware::{FeedBus, PoseService};
use groundtex_perception::camera::{LensParams, camera_info_from_lens, intrinsic_matrix};
use groundtex_perception::transform::{quaternion_from_euler, rpy_from_quaternion};
use groundtex_types::{
    CameraInfo, GroundTexError, Image, MoveRequest, MoveResponse, NamedPose, PixelFormat, Pose3D,
    SampleKind, SamplePayload, Twist, Vec3,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the static ground model in every pose list.
pub const GROUND_MODEL: &str = "ground_plane";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Static description of the simulated world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimWorldConfig {
    pub model_name: String,
    pub service_name: String,
    pub image_topic: String,
    pub camera_info_topic: String,
    pub pose_topic: String,
    pub lens: LensParams,
    /// Time between feed publications when running via [`SimWorld::spawn`].
    #[serde(with = "millis")]
    pub publish_interval: Duration,
    /// Ticks a teleport takes to complete; 0 teleports instantly.
    pub settle_ticks: u32,
    /// Extra bytes appended to every image row.
    pub row_padding: usize,
    pub initial_pose: Pose3D,
}

impl Default for SimWorldConfig {
    fn default() -> Self {
        Self {
            model_name: "camera".to_string(),
            service_name: "/world/ground_texture/set_pose".to_string(),
            image_topic: "/camera".to_string(),
            camera_info_topic: "/camera_info".to_string(),
            pose_topic: "/world/ground_texture/dynamic_pose/info".to_string(),
            lens: LensParams::default(),
            publish_interval: Duration::from_millis(20),
            settle_ticks: 3,
            row_padding: 0,
            initial_pose: Pose3D::new(Vec3::new(0.0, 0.0, 0.25), Default::default()),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// World state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: Pose3D,
    to: Pose3D,
    elapsed_ticks: u32,
}

#[derive(Debug)]
struct WorldState {
    current: Pose3D,
    motion: Option<Motion>,
    moves_handled: u64,
    fail_after: Option<u64>,
}

/// The simulated world. Share it behind an [`Arc`].
pub struct SimWorld {
    config: SimWorldConfig,
    bus: FeedBus,
    camera_info: CameraInfo,
    state: Mutex<WorldState>,
}

impl SimWorld {
    /// Create the world and advertise its three feeds on `bus`.
    pub fn new(config: SimWorldConfig, bus: FeedBus) -> Result<Self, GroundTexError> {
        if config.settle_ticks > 0 && config.publish_interval.is_zero() {
            return Err(GroundTexError::Config(
                "publish_interval must be non-zero".to_string(),
            ));
        }
        bus.advertise(&config.image_topic, SampleKind::Image)?;
        bus.advertise(&config.camera_info_topic, SampleKind::CameraInfo)?;
        bus.advertise(&config.pose_topic, SampleKind::PoseList)?;

        let camera_info = camera_info_from_lens(&config.model_name, &config.lens);
        info!(
            model = %config.model_name,
            width = camera_info.width,
            height = camera_info.height,
            "simulated world ready"
        );
        Ok(Self {
            state: Mutex::new(WorldState {
                current: config.initial_pose,
                motion: None,
                moves_handled: 0,
                fail_after: None,
            }),
            config,
            bus,
            camera_info,
        })
    }

    pub fn config(&self) -> &SimWorldConfig {
        &self.config
    }

    /// Current pose of the camera model.
    pub fn pose(&self) -> Pose3D {
        self.lock().current
    }

    /// `true` while a teleport is still in progress.
    pub fn is_moving(&self) -> bool {
        self.lock().motion.is_some()
    }

    /// Answer `ok = false` to every move request after the first `n`.
    pub fn fail_moves_after(&self, n: u64) {
        self.lock().fail_after = Some(n);
    }

    /// Integrate a body-frame velocity for `dt`. Cancels any teleport in
    /// progress.
    pub fn apply_twist(&self, twist: &Twist, dt: Duration) {
        let dt = dt.as_secs_f64();
        let mut state = self.lock();
        state.motion = None;

        let (roll, pitch, yaw) = rpy_from_quaternion(&state.current.orientation);
        let (sin, cos) = yaw.sin_cos();
        let p = &mut state.current.position;
        p.x += (twist.linear.x * cos - twist.linear.y * sin) * dt;
        p.y += (twist.linear.x * sin + twist.linear.y * cos) * dt;
        p.z += twist.linear.z * dt;
        state.current.orientation = quaternion_from_euler(
            roll + twist.angular.x * dt,
            pitch + twist.angular.y * dt,
            yaw + twist.angular.z * dt,
        );
    }

    /// Advance any teleport by one step and publish every feed once.
    pub fn tick(&self) -> Result<(), GroundTexError> {
        let pose = self.step();

        self.bus.publish(
            &self.config.pose_topic,
            SamplePayload::PoseList(vec![
                NamedPose {
                    name: self.config.model_name.clone(),
                    pose,
                },
                NamedPose {
                    name: GROUND_MODEL.to_string(),
                    pose: Pose3D::default(),
                },
            ]),
        )?;
        self.bus.publish(
            &self.config.camera_info_topic,
            SamplePayload::CameraInfo(self.camera_info.clone()),
        )?;
        self.bus
            .publish(&self.config.image_topic, SamplePayload::Image(self.render(&pose)))?;
        Ok(())
    }

    /// Run [`tick`](Self::tick) every `publish_interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.publish_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("simulated world stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick() {
                            warn!(error = %e, "simulated world publish failed");
                        }
                    }
                }
            }
        })
    }

    /// Render the ground texture seen from `pose`, looking straight down.
    pub fn render(&self, pose: &Pose3D) -> Image {
        let k = intrinsic_matrix(&self.config.lens);
        let (fx, u0, fy, v0) = (k[0], k[2], k[4], k[5]);
        let width = self.camera_info.width;
        let height = self.camera_info.height;
        let step = width as usize * 3 + self.config.row_padding;

        let (_, _, yaw) = rpy_from_quaternion(&pose.orientation);
        let (sin, cos) = yaw.sin_cos();
        let altitude = pose.position.z.max(1e-3);

        let mut data = vec![0u8; step * height as usize];
        for v in 0..height as usize {
            let row = &mut data[v * step..v * step + width as usize * 3];
            for (u, pixel) in row.chunks_exact_mut(3).enumerate() {
                // Image right is camera -y, image down is camera -x.
                let forward = -(v as f64 - v0) * altitude / fy;
                let left = -(u as f64 - u0) * altitude / fx;
                let gx = pose.position.x + forward * cos - left * sin;
                let gy = pose.position.y + forward * sin + left * cos;
                pixel.copy_from_slice(&ground_texture(gx, gy));
            }
        }

        Image {
            width,
            height,
            step: step as u32,
            pixel_format: PixelFormat::Rgb8,
            data,
        }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn step(&self) -> Pose3D {
        let settle = self.config.settle_ticks;
        let mut state = self.lock();
        if let Some(mut motion) = state.motion {
            motion.elapsed_ticks += 1;
            if motion.elapsed_ticks >= settle {
                state.current = motion.to;
                state.motion = None;
            } else {
                let t = f64::from(motion.elapsed_ticks) / f64::from(settle);
                let (a, b) = (motion.from.position, motion.to.position);
                state.current = Pose3D::new(
                    Vec3::new(
                        a.x + (b.x - a.x) * t,
                        a.y + (b.y - a.y) * t,
                        a.z + (b.z - a.z) * t,
                    ),
                    motion.from.orientation,
                );
                state.motion = Some(motion);
            }
        }
        state.current
    }
}

/// Deterministic, aperiodic-looking RGB pattern over the ground plane.
fn ground_texture(x: f64, y: f64) -> [u8; 3] {
    let grain = ((x * 37.0).sin() * (y * 41.0).cos() + (x * 13.0 + y * 7.0).sin()) * 0.25 + 0.5;
    let tile = ((x * 4.0).floor() + (y * 4.0).floor()).rem_euclid(2.0);
    let base = 90.0 + 100.0 * grain;
    [
        (base + 30.0 * tile).clamp(0.0, 255.0) as u8,
        (base * 0.85).clamp(0.0, 255.0) as u8,
        (base * 0.6 + 40.0 * (1.0 - tile)).clamp(0.0, 255.0) as u8,
    ]
}

#[async_trait]
impl PoseService for SimWorld {
    fn service_name(&self) -> &str {
        &self.config.service_name
    }

    async fn set_pose(&self, request: MoveRequest) -> Result<MoveResponse, GroundTexError> {
        let mut state = self.lock();
        state.moves_handled += 1;

        if request.model_name != self.config.model_name {
            warn!(model = %request.model_name, "move requested for unknown model");
            return Ok(MoveResponse {
                executed: true,
                accepted: false,
                ok: false,
            });
        }
        if state.fail_after.is_some_and(|n| state.moves_handled > n) {
            warn!(request = state.moves_handled, "injected move failure");
            return Ok(MoveResponse {
                executed: true,
                accepted: true,
                ok: false,
            });
        }

        if self.config.settle_ticks == 0 {
            state.current = request.pose;
            state.motion = None;
        } else {
            state.motion = Some(Motion {
                from: state.current,
                to: request.pose,
                elapsed_ticks: 0,
            });
        }
        debug!(model = %request.model_name, "move accepted");
        Ok(MoveResponse::success())
    }
}
