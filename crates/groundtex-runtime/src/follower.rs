//! Trajectory capture state machine.
//!
//! For every waypoint the follower walks through
//!
//! ```text
//! Idle → Commanding → AwaitingConvergence → Synchronizing → Writing → Idle
//! ```
//!
//! * **Commanding** – send the wrapped waypoint, lifted to the camera height,
//!   to the [`PoseService`].  Transport errors, timeouts and any cleared
//!   response flag fail the waypoint; there is no retry.
//! * **AwaitingConvergence** – poll the pose feed until the camera model's
//!   reported pose matches the target within tolerance, backing off
//!   exponentially between polls.
//! * **Synchronizing** – one [`DataSynchronizer::get_messages`] round.
//! * **Writing** – hand the image, reported pose and calibration to the
//!   [`DataWriter`].  The first record also writes the camera matrix and
//!   mount; a fully captured run ends with the list files.
//!
//! The camera rides on a planar robot: each waypoint is the robot's pose and
//! the commanded camera pose is that pose composed with the camera mount.
//!
//! The first failing waypoint aborts the run, so no later index is ever
//! written.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use groundtex_dataset::{DataWriter, ListEntry, SequenceNaming};
use groundtex_middleware::{DataSynchronizer, FeedBus, PoseService};
use groundtex_perception::ImageProjector;
use groundtex_perception::transform::{
    compose_poses, matrix_from_pose, pose_from_pose2d, poses_within_tolerance, transform_matrix,
    wrap_angle,
};
use groundtex_types::{
    CameraInfo, GroundTexError, MoveRequest, NamedPose, Pose2D, Pose3D, SampleKind,
    SamplePayload, Vec3,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Everything the follower needs to know about the world and the output.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowerConfig {
    /// Height of the camera above the ground plane, metres.
    pub camera_height: f64,
    pub camera_model_name: String,
    pub image_topic: String,
    pub camera_info_topic: String,
    pub pose_topic: String,
    pub move_service: String,
    pub output_dir: PathBuf,
    pub move_timeout: Duration,
    /// Absolute per-component tolerance for x, y, z, roll, pitch and yaw.
    pub convergence_tolerance: f64,
    pub convergence_timeout: Duration,
    /// First delay between convergence polls; doubles up to `max_poll_interval`.
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub sync_timeout: Duration,
    /// Camera pose relative to the robot base; `camera_height` is added to
    /// its z.
    pub camera_mount: Pose3D,
    /// Sequence layout for images and list files; `None` keeps `000000.png`
    /// and the `trajectory` list base name.
    pub sequence: Option<SequenceNaming>,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            camera_height: 0.25,
            camera_model_name: "camera".to_string(),
            image_topic: "/camera".to_string(),
            camera_info_topic: "/camera_info".to_string(),
            pose_topic: "/world/ground_texture/dynamic_pose/info".to_string(),
            move_service: "/world/ground_texture/set_pose".to_string(),
            output_dir: PathBuf::from("output"),
            move_timeout: Duration::from_secs(1),
            convergence_tolerance: 1e-6,
            convergence_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            max_poll_interval: Duration::from_millis(200),
            sync_timeout: Duration::from_secs(5),
            camera_mount: Pose3D::default(),
            sequence: None,
        }
    }
}

impl FollowerConfig {
    /// Camera pose in the robot frame, lifted by `camera_height`.
    pub fn mount_pose(&self) -> Pose3D {
        let lift = Pose3D::new(Vec3::new(0.0, 0.0, self.camera_height), Default::default());
        compose_poses(&lift, &self.camera_mount)
    }
}

fn validate_height(height: f64) -> Result<(), GroundTexError> {
    if height.is_finite() && height >= 0.0 {
        Ok(())
    } else {
        Err(GroundTexError::Config(format!(
            "camera height must be non-negative, got {height}"
        )))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stage and report
// ────────────────────────────────────────────────────────────────────────────

/// Where the follower is in the per-waypoint cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Idle,
    Commanding,
    AwaitingConvergence,
    Synchronizing,
    Writing,
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureStage::Idle => "idle",
            CaptureStage::Commanding => "commanding",
            CaptureStage::AwaitingConvergence => "awaiting convergence",
            CaptureStage::Synchronizing => "synchronizing",
            CaptureStage::Writing => "writing",
        };
        f.write_str(name)
    }
}

/// Outcome of a fully captured trajectory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub waypoints: usize,
    /// Output index written for each waypoint, in visitation order.
    pub records: Vec<u64>,
}

// ────────────────────────────────────────────────────────────────────────────
// TrajectoryFollower
// ────────────────────────────────────────────────────────────────────────────

pub struct TrajectoryFollower {
    config: FollowerConfig,
    service: Arc<dyn PoseService>,
    synchronizer: DataSynchronizer,
    writer: DataWriter,
    stage: CaptureStage,
    cancel: CancellationToken,
    entries: Vec<ListEntry>,
    properties_written: bool,
}

impl TrajectoryFollower {
    /// Validate `config`, prepare the output directory and register the
    /// image, camera-info and pose feeds.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: FollowerConfig,
        bus: FeedBus,
        service: Arc<dyn PoseService>,
    ) -> Result<Self, GroundTexError> {
        validate_height(config.camera_height)?;
        if !(config.convergence_tolerance > 0.0) {
            return Err(GroundTexError::Config(format!(
                "convergence tolerance must be positive, got {}",
                config.convergence_tolerance
            )));
        }
        if config.poll_interval.is_zero() {
            return Err(GroundTexError::Config(
                "poll interval must be non-zero".to_string(),
            ));
        }

        let mut writer = DataWriter::new(&config.output_dir)?;
        if let Some(naming) = &config.sequence {
            naming.validate().map_err(GroundTexError::Config)?;
            writer.set_sequence_naming(naming.clone());
        }
        let cancel = CancellationToken::new();
        let mut synchronizer = DataSynchronizer::new(bus)
            .with_timeout(config.sync_timeout)
            .with_cancellation(cancel.clone());
        synchronizer.register_topic(&config.image_topic, SampleKind::Image)?;
        synchronizer.register_topic(&config.camera_info_topic, SampleKind::CameraInfo)?;
        synchronizer.register_topic(&config.pose_topic, SampleKind::PoseList)?;

        if service.service_name() != config.move_service {
            warn!(
                expected = %config.move_service,
                actual = service.service_name(),
                "pose service name differs from configuration"
            );
        }
        info!(
            model = %config.camera_model_name,
            height = config.camera_height,
            output = %config.output_dir.display(),
            "trajectory follower ready"
        );

        Ok(Self {
            config,
            service,
            synchronizer,
            writer,
            stage: CaptureStage::Idle,
            cancel,
            entries: Vec::new(),
            properties_written: false,
        })
    }

    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    pub fn camera_height(&self) -> f64 {
        self.config.camera_height
    }

    /// Change the camera height; negative values are rejected and leave the
    /// current height in place.
    pub fn set_camera_height(&mut self, height: f64) -> Result<(), GroundTexError> {
        validate_height(height)?;
        self.config.camera_height = height;
        Ok(())
    }

    pub fn stage(&self) -> CaptureStage {
        self.stage
    }

    /// Token that aborts an in-progress capture when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pose commanded for `waypoint`: the robot at the waypoint with its yaw
    /// wrapped, composed with the lifted camera mount.
    pub fn target_pose(&self, waypoint: &Pose2D) -> Pose3D {
        compose_poses(
            &pose_from_pose2d(&wrapped(waypoint)),
            &self.config.mount_pose(),
        )
    }

    /// Visit every waypoint in order, stopping at the first failure.
    pub async fn capture_trajectory(
        &mut self,
        waypoints: &[Pose2D],
    ) -> Result<CaptureReport, GroundTexError> {
        info!(waypoints = waypoints.len(), "capture started");
        let mut report = CaptureReport {
            waypoints: waypoints.len(),
            records: Vec::with_capacity(waypoints.len()),
        };
        self.entries.clear();

        for (number, waypoint) in waypoints.iter().enumerate() {
            let outcome = self.capture_pose(number, waypoint).await;
            let stage = self.stage;
            self.set_stage(CaptureStage::Idle);
            match outcome {
                Ok(index) => report.records.push(index),
                Err(e) => {
                    error!(waypoint = number, %stage, error = %e, "waypoint failed");
                    return Err(e);
                }
            }
        }

        if !self.entries.is_empty() {
            self.writer.write_lists(&self.entries)?;
        }
        info!(records = report.records.len(), "capture complete");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    #[instrument(skip(self, waypoint), fields(x = waypoint.x, y = waypoint.y, yaw = waypoint.yaw))]
    async fn capture_pose(&mut self, number: usize, waypoint: &Pose2D) -> Result<u64, GroundTexError> {
        let target = self.target_pose(waypoint);

        self.set_stage(CaptureStage::Commanding);
        self.command(&target).await?;

        self.set_stage(CaptureStage::AwaitingConvergence);
        self.await_convergence(&target).await?;

        self.set_stage(CaptureStage::Synchronizing);
        let bundle = self.synchronizer.get_messages().await?;

        self.set_stage(CaptureStage::Writing);
        let image = bundle.image(&self.config.image_topic)?;
        let camera_info = bundle.camera_info(&self.config.camera_info_topic)?;
        let reported = find_model(
            bundle.pose_list(&self.config.pose_topic)?,
            &self.config.camera_model_name,
        )
        .ok_or_else(|| self.model_missing())?;

        let index = self.writer.write(image, &reported, camera_info)?;
        self.record_outputs(index, wrapped(waypoint), camera_info)?;
        info!(waypoint = number, index, "waypoint captured");
        Ok(index)
    }

    async fn command(&self, target: &Pose3D) -> Result<(), GroundTexError> {
        let service_name = self.service.service_name().to_string();
        let request = MoveRequest {
            model_name: self.config.camera_model_name.clone(),
            pose: *target,
        };

        let reply = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(GroundTexError::Cancelled(CaptureStage::Commanding.to_string()));
            }
            reply = tokio::time::timeout(self.config.move_timeout, self.service.set_pose(request)) => reply,
        };

        let response = match reply {
            Err(_) => {
                return Err(GroundTexError::Timeout {
                    stage: format!("requesting {service_name}"),
                    waited: self.config.move_timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(GroundTexError::Actuation {
                    service: service_name,
                    details: e.to_string(),
                });
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Err(GroundTexError::Actuation {
                service: service_name,
                details: format!(
                    "move not completed (executed: {}, accepted: {}, ok: {})",
                    response.executed, response.accepted, response.ok
                ),
            });
        }
        debug!("move accepted");
        Ok(())
    }

    async fn await_convergence(&self, target: &Pose3D) -> Result<(), GroundTexError> {
        let deadline = Instant::now() + self.config.convergence_timeout;
        let timed_out = || GroundTexError::Timeout {
            stage: CaptureStage::AwaitingConvergence.to_string(),
            waited: self.config.convergence_timeout,
        };
        let mut delay = self.config.poll_interval;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let poll = tokio::time::timeout_at(
                deadline,
                self.synchronizer.get_message(&self.config.pose_topic),
            )
            .await
            .map_err(|_| timed_out())?;
            // A quiet pose feed is only fatal once the convergence deadline
            // has passed.
            let sample = match poll {
                Ok(sample) => Some(sample),
                Err(GroundTexError::Timeout { waited, .. }) => {
                    debug!(?waited, "pose feed quiet");
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(SamplePayload::PoseList(poses)) = sample.as_ref().map(|s| &s.payload) {
                match find_model(poses, &self.config.camera_model_name) {
                    Some(reported)
                        if poses_within_tolerance(
                            &reported,
                            target,
                            self.config.convergence_tolerance,
                        ) =>
                    {
                        debug!(polls, "pose converged");
                        return Ok(());
                    }
                    Some(_) => {}
                    None => debug!("camera model absent from pose list"),
                }
            }

            if Instant::now() + delay >= deadline {
                return Err(timed_out());
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(GroundTexError::Cancelled(
                        CaptureStage::AwaitingConvergence.to_string(),
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.max_poll_interval);
        }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn set_stage(&mut self, stage: CaptureStage) {
        if self.stage != stage {
            debug!(from = %self.stage, to = %stage, "stage transition");
            self.stage = stage;
        }
    }

    /// Camera properties on the first record, and this record's list entry.
    fn record_outputs(
        &mut self,
        index: u64,
        robot_pose: Pose2D,
        camera_info: &CameraInfo,
    ) -> Result<(), GroundTexError> {
        let mount = matrix_from_pose(&self.config.mount_pose());
        if !self.properties_written {
            let camera = match &self.config.sequence {
                Some(naming) => naming.camera_name.as_str(),
                None => self.config.camera_model_name.as_str(),
            };
            self.writer
                .write_camera_properties(camera, &camera_info.intrinsics, &mount)?;
            self.properties_written = true;
        }

        let projector = ImageProjector::new(mount, camera_info.intrinsics)?;
        let robot = transform_matrix(robot_pose.x, robot_pose.y, 0.0, 0.0, 0.0, robot_pose.yaw);
        self.entries.push(ListEntry {
            index,
            robot_pose,
            pixel_pose: projector.project_image_corner(&robot),
        });
        Ok(())
    }

    fn model_missing(&self) -> GroundTexError {
        GroundTexError::MissingSample(format!(
            "{} not in pose list on {}",
            self.config.camera_model_name, self.config.pose_topic
        ))
    }
}

fn wrapped(waypoint: &Pose2D) -> Pose2D {
    Pose2D::new(waypoint.x, waypoint.y, wrap_angle(waypoint.yaw))
}

fn find_model(poses: &[NamedPose], name: &str) -> Option<Pose3D> {
    poses.iter().find(|p| p.name == name).map(|p| p.pose)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use groundtex_dataset::writer::format_pose_line;
    use groundtex_hal::sim::{SimWorld, SimWorldConfig};
    use groundtex_perception::camera::LensParams;
    use groundtex_types::MoveResponse;
    use std::f64::consts::PI;
    use std::path::Path;

    struct Harness {
        world: Arc<SimWorld>,
        follower: TrajectoryFollower,
        stop: CancellationToken,
        _dir: tempfile::TempDir,
        output: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.stop.cancel();
        }
    }

    fn world_config() -> SimWorldConfig {
        SimWorldConfig {
            lens: LensParams {
                resolution_x: 8,
                resolution_y: 6,
                ..LensParams::default()
            },
            publish_interval: Duration::from_millis(2),
            row_padding: 2,
            ..SimWorldConfig::default()
        }
    }

    fn follower_config(output: &Path) -> FollowerConfig {
        FollowerConfig {
            output_dir: output.to_path_buf(),
            poll_interval: Duration::from_millis(1),
            max_poll_interval: Duration::from_millis(8),
            convergence_timeout: Duration::from_secs(3),
            sync_timeout: Duration::from_secs(2),
            ..FollowerConfig::default()
        }
    }

    fn harness_with(
        configure: impl FnOnce(&mut FollowerConfig),
        service: Option<Arc<dyn PoseService>>,
    ) -> Result<Harness, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("run");
        let bus = FeedBus::default();
        let world = Arc::new(SimWorld::new(world_config(), bus.clone())?);
        let stop = CancellationToken::new();
        Arc::clone(&world).spawn(stop.clone());

        let mut config = follower_config(&output);
        configure(&mut config);
        let service = service.unwrap_or_else(|| world.clone() as Arc<dyn PoseService>);
        let follower = TrajectoryFollower::new(config, bus, service)?;
        Ok(Harness {
            world,
            follower,
            stop,
            _dir: dir,
            output,
        })
    }

    fn harness() -> Result<Harness, Box<dyn std::error::Error>> {
        harness_with(|_| {}, None)
    }

    /// Closed square, finishing with a half-turn flip at the origin.
    fn square_plus_flip() -> Vec<Pose2D> {
        vec![
            Pose2D::new(0.0, 0.0, 0.0),
            Pose2D::new(0.5, 0.0, PI / 2.0),
            Pose2D::new(0.5, 0.5, PI),
            Pose2D::new(0.0, 0.5, -PI / 2.0),
            Pose2D::new(0.0, 0.0, 3.0 * PI),
        ]
    }

    fn assert_row(line: &str, expected: &[f64]) -> Result<(), Box<dyn std::error::Error>> {
        let values = line
            .split(' ')
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(values.len(), expected.len(), "{line}");
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6, "{line}");
        }
        Ok(())
    }

    fn triple_exists(dir: &Path, index: u64) -> bool {
        ["png", "txt"]
            .iter()
            .all(|ext| dir.join(format!("{index:06}.{ext}")).is_file())
            && dir.join(format!("{index:06}_calib.txt")).is_file()
    }

    #[tokio::test]
    async fn captures_every_waypoint_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        let path = square_plus_flip();

        let report = h.follower.capture_trajectory(&path).await?;

        assert_eq!(report.waypoints, 5);
        assert_eq!(report.records, vec![0, 1, 2, 3, 4]);
        assert_eq!(h.follower.stage(), CaptureStage::Idle);
        for (index, waypoint) in path.iter().enumerate() {
            assert!(triple_exists(&h.output, index as u64));
            let line = std::fs::read_to_string(h.output.join(format!("{index:06}.txt")))?;
            assert_eq!(line, format_pose_line(&h.follower.target_pose(waypoint)));
        }
        assert!(!h.output.join("000005.txt").exists());
        assert_eq!(h.world.pose(), h.follower.target_pose(&path[4]));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_move_stops_before_later_indices() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        h.world.fail_moves_after(2);

        let result = h.follower.capture_trajectory(&square_plus_flip()).await;

        assert!(matches!(result, Err(GroundTexError::Actuation { .. })));
        assert!(triple_exists(&h.output, 0));
        assert!(triple_exists(&h.output, 1));
        for index in 2..5 {
            assert!(!h.output.join(format!("{index:06}.txt")).exists());
        }
        assert_eq!(h.follower.stage(), CaptureStage::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_model_fails_first_waypoint() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness_with(|c| c.camera_model_name = "tripod".to_string(), None)?;
        let result = h.follower.capture_trajectory(&square_plus_flip()).await;
        assert!(matches!(result, Err(GroundTexError::Actuation { .. })));
        assert!(!h.output.join("000000.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn empty_trajectory_succeeds_trivially() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        let report = h.follower.capture_trajectory(&[]).await?;
        assert_eq!(report, CaptureReport::default());
        Ok(())
    }

    /// Accepts every move but never moves anything.
    struct StuckService;

    #[async_trait]
    impl PoseService for StuckService {
        fn service_name(&self) -> &str {
            "/stuck"
        }

        async fn set_pose(&self, _request: MoveRequest) -> Result<MoveResponse, GroundTexError> {
            Ok(MoveResponse::success())
        }
    }

    #[tokio::test]
    async fn convergence_is_bounded_by_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness_with(
            |c| c.convergence_timeout = Duration::from_millis(100),
            Some(Arc::new(StuckService)),
        )?;

        let result = h
            .follower
            .capture_trajectory(&[Pose2D::new(5.0, 5.0, 0.0)])
            .await;
        match result {
            Err(GroundTexError::Timeout { stage, .. }) => {
                assert_eq!(stage, CaptureStage::AwaitingConvergence.to_string());
            }
            other => panic!("expected a convergence timeout, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn silent_pose_feed_times_out_awaiting_convergence()
    -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let bus = FeedBus::default();
        // Advertises its feeds but is never spawned, so nothing is published.
        let _world = SimWorld::new(world_config(), bus.clone())?;
        let config = FollowerConfig {
            sync_timeout: Duration::from_millis(20),
            convergence_timeout: Duration::from_millis(150),
            ..follower_config(&dir.path().join("run"))
        };
        let mut follower = TrajectoryFollower::new(config, bus, Arc::new(StuckService))?;

        let result = follower.capture_trajectory(&[Pose2D::new(0.0, 0.0, 0.0)]).await;
        match result {
            Err(GroundTexError::Timeout { stage, .. }) => {
                assert_eq!(stage, CaptureStage::AwaitingConvergence.to_string());
            }
            other => panic!("expected a convergence timeout, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_token_aborts_capture() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        h.follower.cancellation_token().cancel();
        let result = h.follower.capture_trajectory(&square_plus_flip()).await;
        assert!(matches!(result, Err(GroundTexError::Cancelled(_))));
        assert!(!h.output.join("000000.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn camera_height_validation() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        assert_eq!(h.follower.camera_height(), 0.25);
        assert!(h.follower.set_camera_height(-0.1).is_err());
        assert_eq!(h.follower.camera_height(), 0.25);
        h.follower.set_camera_height(0.0)?;
        assert_eq!(h.follower.camera_height(), 0.0);

        let bad = harness_with(|c| c.camera_height = -1.0, None);
        assert!(bad.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn target_pose_wraps_yaw_and_lifts() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness()?;
        let target = h.follower.target_pose(&Pose2D::new(1.0, 2.0, 3.0 * PI));
        let direct = h.follower.target_pose(&Pose2D::new(1.0, 2.0, PI));
        assert_eq!(target.position, groundtex_types::Vec3::new(1.0, 2.0, 0.25));
        assert!(poses_within_tolerance(&target, &direct, 1e-9));
        Ok(())
    }

    #[tokio::test]
    async fn camera_mount_offsets_the_target() -> Result<(), Box<dyn std::error::Error>> {
        let mount = Pose3D::new(groundtex_types::Vec3::new(0.1, 0.0, 0.05), Default::default());
        let h = harness_with(|c| c.camera_mount = mount, None)?;
        let target = h.follower.target_pose(&Pose2D::new(1.0, 0.0, PI / 2.0));
        // The forward offset swings to +y with the robot.
        assert!((target.position.x - 1.0).abs() < 1e-9);
        assert!((target.position.y - 0.1).abs() < 1e-9);
        assert!((target.position.z - 0.3).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn run_writes_camera_properties_and_lists() -> Result<(), Box<dyn std::error::Error>> {
        use groundtex_dataset::writer::{CAMERA_PROPERTIES_DIR, format_matrix, planar_pose_row};

        let mut h = harness()?;
        let path = [Pose2D::new(0.0, 0.0, 0.0), Pose2D::new(0.5, 0.0, PI / 2.0)];
        h.follower.capture_trajectory(&path).await?;

        let properties = h.output.join(CAMERA_PROPERTIES_DIR);
        let intrinsics = std::fs::read_to_string(properties.join("camera_intrinsic_matrix.txt"))?;
        assert_eq!(intrinsics.lines().count(), 3);
        let mount = matrix_from_pose(&FollowerConfig::default().mount_pose());
        let pose = std::fs::read_to_string(properties.join("camera_pose.txt"))?;
        assert_eq!(pose, format_matrix(mount.iter().map(|row| &row[..])));

        let test = std::fs::read_to_string(h.output.join("trajectory.test"))?;
        assert_eq!(test, "000000.png\n000001.png\n");
        let meters = std::fs::read_to_string(h.output.join("trajectory_meters.txt"))?;
        let lines: Vec<&str> = meters.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "000001.png");
        assert_row(lines[3], &[0.0, -1.0, 0.5, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0])?;
        let pixels = std::fs::read_to_string(h.output.join("trajectory.txt"))?;
        let first = pixels.lines().nth(1).ok_or("missing pixel pose")?;
        assert_row(first, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_run_writes_no_lists() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness()?;
        h.world.fail_moves_after(1);
        let result = h.follower.capture_trajectory(&square_plus_flip()).await;
        assert!(result.is_err());
        assert!(triple_exists(&h.output, 0));
        assert!(!h.output.join("trajectory.test").exists());
        Ok(())
    }

    #[tokio::test]
    async fn sequence_naming_moves_images_and_lists() -> Result<(), Box<dyn std::error::Error>> {
        let naming = SequenceNaming {
            sequence_type: "grid".to_string(),
            sequence_number: 2,
            texture_number: 9,
            camera_name: "c02".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 6, 1).ok_or("date")?,
        };
        let mut h = harness_with(|c| c.sequence = Some(naming.clone()), None)?;
        h.follower.capture_trajectory(&[Pose2D::new(0.0, 0.0, 0.0)]).await?;

        assert!(h.output.join(naming.image_path(0)).is_file());
        assert!(!h.output.join("000000.png").exists());
        assert!(h.output.join("000000.txt").is_file());
        assert!(h.output.join(naming.test_list_file()).is_file());
        assert!(h.output.join("camera_properties/c02_pose.txt").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_sequence_naming_is_rejected() {
        let naming = SequenceNaming {
            camera_name: "front cam".to_string(),
            ..SequenceNaming::default()
        };
        assert!(harness_with(|c| c.sequence = Some(naming), None).is_err());
    }
}
