//! Runs the tracker on a synthetic sequence.
//!
//! usage: mono-slam-rs [tracker_config.json] [output_directory]

use std::path::PathBuf;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mono_slam_rs::camera::PinholeCamera;
use mono_slam_rs::config::TrackerConfig;
use mono_slam_rs::global_types::{FrameIndex, ObjectPointId, Vector3};
use mono_slam_rs::save;
use mono_slam_rs::simulation::{SyntheticScene, Trajectory};
use mono_slam_rs::tracking::{CameraPose, EstimatedMotion, FrameTracker, PointTrack, PoseQuality};

const NUMBER_POINTS: usize = 300;
const NUMBER_FRAMES: usize = 60;
/// Noise of the image observations, in pixel.
const OBSERVATION_NOISE: f64 = 0.5;
const OUTLIER_RATIO: f64 = 0.05;
/// Frames between two optimizations of the map points.
const OPTIMIZATION_INTERVAL: FrameIndex = 10;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_nanos()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    let output_directory = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    log::info!("config: {:?}", config);

    let mut rng = SmallRng::seed_from_u64(config.random_seed.wrapping_add(1));
    let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
    let scene = SyntheticScene::new(
        &mut rng,
        NUMBER_POINTS,
        1.5,
        NUMBER_FRAMES,
        Trajectory::Arc {
            radius: 6.0,
            angle: 1.0,
        },
    );

    let mut tracker = FrameTracker::new(camera, config);

    // the map is bootstrapped with the known poses of the first two frames
    for frame_index in 0..2 {
        tracker.camera_poses().set_pose(
            frame_index,
            std::sync::Arc::new(CameraPose::new(
                *scene.world_t_camera(frame_index),
                PoseQuality::High,
                EstimatedMotion::Unknown,
            )),
        );
    }
    for id in 0..NUMBER_POINTS as ObjectPointId {
        let (Some(first), Some(second)) = (
            scene.observation(tracker.camera(), 0, id),
            scene.observation(tracker.camera(), 1, id),
        ) else {
            continue;
        };
        let noise = Vector3::new(
            rng.gen_range(-0.01..0.01),
            rng.gen_range(-0.01..0.01),
            rng.gen_range(-0.01..0.01),
        );
        tracker.add_object_point(
            &PointTrack::new(0, vec![first, second]),
            Some(scene.object_point(id) + noise),
        );
    }
    log::info!("map bootstrapped with {} points", tracker.localized_object_points().len());

    let mut lost_frames = 0;
    for frame_index in 2..NUMBER_FRAMES as FrameIndex {
        let observations = scene.observations(
            tracker.camera(),
            frame_index,
            &mut rng,
            OBSERVATION_NOISE,
            OUTLIER_RATIO,
        );

        let tracking_correspondences = tracker.tracking_correspondences(frame_index - 1, &observations);
        let tracked = tracker
            .track_frame(frame_index, &tracking_correspondences, None)
            .is_some();

        if tracked {
            tracker.extend_map(frame_index);
        } else if tracker.relocalize(frame_index, &observations, None).is_none() {
            lost_frames += 1;
            continue;
        }

        if frame_index % OPTIMIZATION_INTERVAL == 0 {
            let optimized = tracker.optimize_map_points(frame_index);
            log::info!("Frame {}: optimized {} object points", frame_index, optimized);
        }
    }

    let mut max_translation_error = 0.0f64;
    for frame_index in 0..NUMBER_FRAMES as FrameIndex {
        if let Some(camera_pose) = tracker.camera_poses().has_pose(frame_index) {
            let error = (camera_pose.world_t_camera().translation.vector
                - scene.world_t_camera(frame_index).translation.vector)
                .norm();
            max_translation_error = max_translation_error.max(error);
        }
    }
    log::info!(
        "{} frames lost, maximal translation error {:.4}",
        lost_frames,
        max_translation_error
    );

    std::fs::create_dir_all(&output_directory)?;
    let map_path = output_directory.join("map.bin");
    save::write_map_file(&map_path, tracker.localized_object_points())?;
    let trajectory_path = output_directory.join("trajectory.csv");
    let rows = save::trajectory::write_trajectory(&trajectory_path, tracker.camera_poses())?;
    log::info!(
        "wrote {} and {} with {} poses",
        map_path.display(),
        trajectory_path.display(),
        rows
    );

    Ok(())
}
