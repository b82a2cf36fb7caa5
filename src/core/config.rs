//! Engine configuration persisted as JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::logging::DEFAULT_FILTER;
use crate::core::types::{Result, Vec3};
use crate::streaming::world::WorldSettings;
use crate::terrain::TerrainParams;

/// Largest load distance accepted from a config file (chunks per direction)
pub const MAX_LOAD_DISTANCE: u8 = 64;

/// Initial camera placement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Initial world position
    pub position: [f32; 3],
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: [0.0, 64.0, 0.0],
            fov_degrees: 70.0,
        }
    }
}

impl CameraSettings {
    /// Build the camera described by these settings
    pub fn to_camera(&self) -> Camera {
        Camera::new(Vec3::from_array(self.position), self.fov_degrees)
    }
}

/// Shared chunk buffer sizing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Size of the shared chunk buffer in megabytes
    pub size_mb: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { size_mb: 64 }
    }
}

impl BufferSettings {
    /// Buffer size in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_mb * 1024 * 1024
    }
}

/// Top-level configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub world: WorldSettings,
    pub camera: CameraSettings,
    pub terrain: TerrainParams,
    pub buffer: BufferSettings,
    /// env_logger filter used unless RUST_LOG is set
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            world: WorldSettings::default(),
            camera: CameraSettings::default(),
            terrain: TerrainParams::default(),
            buffer: BufferSettings::default(),
            log_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load the config at `path`, writing the defaults there first if the file
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }

        Self::load(path)
    }

    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values the streaming core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.world.load_distance == 0 || self.world.load_distance > MAX_LOAD_DISTANCE {
            return Err(Error::InvalidConfig(format!(
                "world.load_distance must be in 1..={}, got {}",
                MAX_LOAD_DISTANCE, self.world.load_distance
            )));
        }
        if self.buffer.size_mb == 0 {
            return Err(Error::InvalidConfig("buffer.size_mb must be non-zero".into()));
        }
        if self.terrain.octaves == 0 {
            return Err(Error::InvalidConfig("terrain.octaves must be non-zero".into()));
        }
        Ok(())
    }
}
