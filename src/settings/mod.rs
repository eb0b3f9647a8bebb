use clap::{ArgAction, Args, Parser, Subcommand, value_parser};
use itertools::Itertools;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CACHE_SIZE: u32 = 128;
pub const MIN_CACHE_SIZE: u32 = 16;
pub const DEFAULT_DRAW_DISTANCE: f32 = 128.0;
pub const DEFAULT_SCENE_LOAD_MIN_RADIUS: f32 = 32.0;
pub const DEFAULT_FRONT_PIXEL_THRESHOLD: f32 = 1.0;
pub const DEFAULT_REAR_PIXEL_THRESHOLD: f32 = 400.0;
pub const DEFAULT_REAR_MAX_RADIUS_FRACTION: f32 = 75.0;
pub const DEFAULT_NON_VISIBLE_FRAMES: u32 = 64;
pub const DEFAULT_CREATION_THROTTLE: i32 = 200;
pub const DEFAULT_MISS_BATCH_SIZE: usize = 255;
pub const DEFAULT_REMOVAL_THRESHOLD_SECS: u64 = 600;

#[derive(Parser, Debug)]
#[command(name = "objcache")]
#[command(version = concat!(env!("VERGEN_GIT_BRANCH"), "/",env!("VERGEN_GIT_SHA")))]
#[command(about = "Region object cache: simulation and cache file inspection")]
pub struct CliArgs {
    #[command(flatten)]
    pub cache: CacheSettings,

    #[command(subcommand)]
    pub operation_mode: OperationMode,
}

#[derive(Subcommand, Debug)]
pub enum OperationMode {
    /// Runs two sessions against a synthetic region and reports how well the second one is served from disk.
    Simulate {
        #[arg(long, default_value_t = 2000)]
        objects: u32,
        #[arg(long, default_value_t = 300)]
        frames: u32,
        #[arg(long, env = "OBJCACHE_SEED")]
        seed: Option<u64>,
        /// Global region handle, x in the upper and y in the lower 32 bits (meters)
        #[arg(long, default_value_t = (256_000u64 << 32) | 256_000)]
        region_handle: u64,
        #[arg(long, value_parser = value_parser!(Vector3), default_value = "(128, 128, 40)")]
        camera: Vector3,
    },
    /// Dumps the records of a single objects_<x>_<y>.slc file.
    Inspect { file: PathBuf },
}

/// Every tunable of the object cache and the visibility scheduler. Parsed as part of [`CliArgs`], but
/// the library only ever sees this struct.
#[derive(Args, Debug, Clone)]
pub struct CacheSettings {
    #[arg(long, env = "OBJCACHE_CACHE_DIR", default_value_t = default_cache_dir())]
    pub cache_dir: String,

    #[arg(long, env = "OBJCACHE_CACHE_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub cache_enabled: bool,

    #[arg(long, env = "OBJCACHE_CACHE_READS", default_value_t = true, action = ArgAction::Set)]
    pub cache_reads: bool,

    #[arg(long, env = "OBJCACHE_CACHE_WRITES", default_value_t = true, action = ArgAction::Set)]
    pub cache_writes: bool,

    /// Maximum number of region files kept on disk
    #[arg(long, env = "OBJCACHE_CACHE_SIZE", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: u32,

    #[arg(long, env = "OBJCACHE_DRAW_DISTANCE", default_value_t = DEFAULT_DRAW_DISTANCE)]
    pub draw_distance: f32,

    /// Everything within this radius around the camera is loaded, regardless of its size
    #[arg(long, env = "OBJCACHE_SCENE_LOAD_MIN_RADIUS", default_value_t = DEFAULT_SCENE_LOAD_MIN_RADIUS)]
    pub scene_load_min_radius: f32,

    #[arg(long, env = "OBJCACHE_FRONT_PIXEL_THRESHOLD", default_value_t = DEFAULT_FRONT_PIXEL_THRESHOLD)]
    pub front_pixel_threshold: f32,

    #[arg(long, env = "OBJCACHE_REAR_PIXEL_THRESHOLD", default_value_t = DEFAULT_REAR_PIXEL_THRESHOLD)]
    pub rear_pixel_threshold: f32,

    /// Radius of the sphere behind the camera that still loads objects, in percent of the draw distance
    #[arg(long, env = "OBJCACHE_REAR_MAX_RADIUS_FRACTION", default_value_t = DEFAULT_REAR_MAX_RADIUS_FRACTION)]
    pub rear_max_radius_fraction: f32,

    /// Frames an active object survives without being seen
    #[arg(long, env = "OBJCACHE_NON_VISIBLE_FRAMES", default_value_t = DEFAULT_NON_VISIBLE_FRAMES)]
    pub non_visible_frames: u32,

    /// Promotions per frame: -1 is unlimited, 0 pauses creation
    #[arg(long, env = "OBJCACHE_CREATION_THROTTLE", default_value_t = DEFAULT_CREATION_THROTTLE, allow_hyphen_values = true)]
    pub creation_throttle: i32,

    #[arg(long, env = "OBJCACHE_MISS_BATCH_SIZE", default_value_t = DEFAULT_MISS_BATCH_SIZE)]
    pub miss_batch_size: usize,

    /// Unconfirmed entries are dropped on save once a region has been around for this long
    #[arg(long, env = "OBJCACHE_REMOVAL_THRESHOLD_SECS", default_value_t = DEFAULT_REMOVAL_THRESHOLD_SECS)]
    pub removal_threshold_secs: u64,
}

pub fn default_cache_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.join("_cache"))
        .unwrap_or_else(|_| PathBuf::from("_cache"))
        .to_string_lossy()
        .to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            cache_dir: default_cache_dir(),
            cache_enabled: true,
            cache_reads: true,
            cache_writes: true,
            cache_size: DEFAULT_CACHE_SIZE,
            draw_distance: DEFAULT_DRAW_DISTANCE,
            scene_load_min_radius: DEFAULT_SCENE_LOAD_MIN_RADIUS,
            front_pixel_threshold: DEFAULT_FRONT_PIXEL_THRESHOLD,
            rear_pixel_threshold: DEFAULT_REAR_PIXEL_THRESHOLD,
            rear_max_radius_fraction: DEFAULT_REAR_MAX_RADIUS_FRACTION,
            non_visible_frames: DEFAULT_NON_VISIBLE_FRAMES,
            creation_throttle: DEFAULT_CREATION_THROTTLE,
            miss_batch_size: DEFAULT_MISS_BATCH_SIZE,
            removal_threshold_secs: DEFAULT_REMOVAL_THRESHOLD_SECS,
        }
    }
}

/// How many entries may be promoted per frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CreationThrottle {
    Unlimited,
    /// Neither promotion nor decay happens, e.g. while a teleport screen is up.
    Paused,
    PerFrame(u32),
}

impl From<i32> for CreationThrottle {
    fn from(value: i32) -> Self {
        match value {
            v if v < 0 => CreationThrottle::Unlimited,
            0 => CreationThrottle::Paused,
            v => CreationThrottle::PerFrame(v as u32),
        }
    }
}

/// The values the scheduler actually works with, computed once from [`CacheSettings`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SceneLoadParameters {
    pub draw_distance: f32,
    pub near_radius: f32,
    pub rear_far_radius: f32,
    pub front_pixel_threshold: f32,
    pub rear_pixel_threshold: f32,
    /// Frames an entry counts as visible after it was last seen
    pub min_frame_range: u32,
    pub creation_throttle: CreationThrottle,
}

impl SceneLoadParameters {
    /// Squared screen-space threshold a scene contribution has to exceed.
    pub fn contribution_threshold(&self, front_cull: bool, pixel_meter_ratio: f32) -> f32 {
        let pixels = if front_cull {
            self.front_pixel_threshold
        } else {
            self.rear_pixel_threshold
        };
        let meters = pixels / pixel_meter_ratio.max(f32::EPSILON);
        meters * meters
    }

    /// Distance up to which contributions are computed at all.
    pub fn distance_threshold(&self, front_cull: bool) -> f32 {
        if front_cull {
            self.draw_distance
        } else {
            self.rear_far_radius
        }
    }
}

impl CacheSettings {
    /// Clamped number of region files the store keeps.
    pub fn max_region_files(&self) -> usize {
        self.cache_size.clamp(MIN_CACHE_SIZE, DEFAULT_CACHE_SIZE) as usize
    }

    pub fn derive(&self) -> SceneLoadParameters {
        let draw_distance = self.draw_distance.max(1.0);
        let near_radius = self.scene_load_min_radius.clamp(1.0, draw_distance);
        let rear_far_radius = (draw_distance * self.rear_max_radius_fraction / 100.0)
            .max(near_radius)
            .min(draw_distance);
        let front_pixel_threshold = self.front_pixel_threshold.max(0.0);
        let rear_pixel_threshold = self.rear_pixel_threshold.max(front_pixel_threshold);

        SceneLoadParameters {
            draw_distance,
            near_radius,
            rear_far_radius,
            front_pixel_threshold,
            rear_pixel_threshold,
            min_frame_range: self.non_visible_frames.max(1) - 1,
            creation_throttle: CreationThrottle::from(self.creation_throttle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vector3> for glam::Vec3 {
    fn from(value: Vector3) -> Self {
        glam::Vec3::new(value.x, value.y, value.z)
    }
}

fn trim_brackets(input: &str) -> &str {
    let mut chars = input.chars();
    chars.next(); // skip first
    chars.next_back(); // skip last
    chars.as_str()
}

impl FromStr for Vector3 {
    type Err = String;

    // (-a, b, c)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let string: String = s.chars().filter(|&c| !c.is_whitespace()).collect();
        if !string.starts_with('(') || !string.ends_with(')') {
            return Err("Missing start or end bracket".to_string());
        }

        let splits = trim_brackets(string.as_str()).split(',').collect_vec();
        if splits.len() != 3 {
            return Err(format!("Comma splitting resulted in {} splits, not 3!", splits.len()));
        }

        let components = splits
            .iter()
            .map(|&split| {
                split
                    .parse::<f32>()
                    .map_err(|err| format!("Failed to parse component {}: {}", split, err))
            })
            .collect::<Result<Vec<f32>, String>>()?;

        Ok(Vector3 {
            x: components[0],
            y: components[1],
            z: components[2],
        })
    }
}
