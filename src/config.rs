use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

use crate::grid::Grid;
use crate::simulation::SimulationParams;
use crate::sources::{SourcePoint, SourceSet};

/// Grid configuration: physical extent plus spacing, `nx = lx/dx` points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_lx")]
    pub lx: f64,
    #[serde(default = "default_ly")]
    pub ly: f64,
    #[serde(default = "default_dx")]
    pub dx: f64,
    #[serde(default = "default_dy")]
    pub dy: f64,
}

fn default_lx() -> f64 {
    100.0
}

fn default_ly() -> f64 {
    100.0
}

fn default_dx() -> f64 {
    1.0
}

fn default_dy() -> f64 {
    1.0
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            lx: default_lx(),
            ly: default_ly(),
            dx: default_dx(),
            dy: default_dy(),
        }
    }
}

impl GridConfig {
    fn validate(&self) -> Result<()> {
        if self.dx <= 0.0 || self.dy <= 0.0 {
            return Err(anyhow!(
                "grid spacing must be positive (dx={}, dy={})",
                self.dx,
                self.dy
            ));
        }
        if self.lx <= 0.0 || self.ly <= 0.0 {
            return Err(anyhow!(
                "grid extent must be positive (lx={}, ly={})",
                self.lx,
                self.ly
            ));
        }
        let grid = self.grid();
        if grid.nx < 3 || grid.ny < 3 {
            return Err(anyhow!(
                "grid resolves to {}x{} points; at least 3 per axis are required",
                grid.nx,
                grid.ny
            ));
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::from_extent(self.lx, self.ly, self.dx, self.dy)
    }
}

/// Fixed simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_wave_speed")]
    pub wave_speed: f64,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_total_time")]
    pub total_time: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(default = "default_damping_region")]
    pub damping_region: usize,
    #[serde(default = "default_damping_factor")]
    pub damping_factor: f64,
    #[serde(default = "default_report_period")]
    pub report_period: usize,
}

fn default_wave_speed() -> f64 {
    343.0 // speed of sound in air
}

fn default_dt() -> f64 {
    0.002
}

fn default_total_time() -> f64 {
    10.0
}

fn default_amplitude() -> f64 {
    1.5
}

fn default_damping_region() -> usize {
    5
}

fn default_damping_factor() -> f64 {
    0.9
}

fn default_report_period() -> usize {
    100
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            wave_speed: default_wave_speed(),
            dt: default_dt(),
            total_time: default_total_time(),
            amplitude: default_amplitude(),
            damping_region: default_damping_region(),
            damping_factor: default_damping_factor(),
            report_period: default_report_period(),
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.wave_speed <= 0.0 {
            return Err(anyhow!("wave speed must be positive, got {}", self.wave_speed));
        }
        if self.dt <= 0.0 {
            return Err(anyhow!("dt must be positive, got {}", self.dt));
        }
        if self.total_time <= 0.0 {
            return Err(anyhow!("total_time must be positive, got {}", self.total_time));
        }
        if !self.amplitude.is_finite() {
            return Err(anyhow!("amplitude must be finite, got {}", self.amplitude));
        }
        if self.damping_factor <= 0.0 || self.damping_factor > 1.0 {
            return Err(anyhow!(
                "damping_factor must be in (0, 1], got {}",
                self.damping_factor
            ));
        }
        if self.report_period == 0 {
            return Err(anyhow!("report_period must be at least 1"));
        }
        Ok(())
    }

    pub fn params(&self) -> SimulationParams {
        SimulationParams {
            wave_speed: self.wave_speed,
            dt: self.dt,
            amplitude: self.amplitude,
            damping_region: self.damping_region,
            damping_factor: self.damping_factor,
        }
    }

    /// Number of timesteps covering `total_time`.
    pub fn nt(&self) -> usize {
        (self.total_time / self.dt).round() as usize
    }
}

/// Initial drive signal settings; frequency and phase stay mutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub phase: f64,
    #[serde(default = "default_active_set")]
    pub active_set: String,
}

fn default_frequency() -> f64 {
    1000.0
}

fn default_active_set() -> String {
    "pair".to_string()
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            frequency: default_frequency(),
            phase: 0.0,
            active_set: default_active_set(),
        }
    }
}

impl DriveConfig {
    fn validate(&self) -> Result<()> {
        if self.frequency <= 0.0 {
            return Err(anyhow!("frequency must be positive, got {}", self.frequency));
        }
        if !self.phase.is_finite() {
            return Err(anyhow!("phase must be finite, got {}", self.phase));
        }
        Ok(())
    }
}

/// One named source set: grid coordinates forced with the drive signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSetConfig {
    pub name: String,
    pub points: Vec<[usize; 2]>,
}

fn default_source_sets() -> Vec<SourceSetConfig> {
    vec![SourceSetConfig {
        name: "pair".to_string(),
        points: vec![[10, 20], [10, 80]],
    }]
}

/// Visualisation configuration for the PNG frame dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualisationConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    #[serde(default = "default_video_length")]
    pub video_length: f64,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_value_range")]
    pub value_range: f64,
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_image_width() -> u32 {
    1200
}

fn default_image_height() -> u32 {
    1000
}

fn default_video_length() -> f64 {
    10.0
}

fn default_fps() -> f64 {
    30.0
}

fn default_value_range() -> f64 {
    2.0
}

impl Default for VisualisationConfig {
    fn default() -> Self {
        VisualisationConfig {
            output_dir: default_output_dir(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            video_length: default_video_length(),
            fps: default_fps(),
            value_range: default_value_range(),
        }
    }
}

impl VisualisationConfig {
    fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(anyhow!(
                "image dimensions must be positive (width={}, height={})",
                self.image_width,
                self.image_height
            ));
        }
        if self.video_length <= 0.0 {
            return Err(anyhow!("video_length must be positive, got {}", self.video_length));
        }
        if self.fps <= 0.0 {
            return Err(anyhow!("fps must be positive, got {}", self.fps));
        }
        if self.value_range <= 0.0 {
            return Err(anyhow!("value_range must be positive, got {}", self.value_range));
        }
        Ok(())
    }

    /// Steps between rendered frames so that `nt` steps fill the target video.
    pub fn frame_interval(&self, nt: usize) -> usize {
        let frames = self.fps * self.video_length;
        ((nt as f64 / frames).round() as usize).max(1)
    }
}

/// Complete simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default = "default_source_sets")]
    pub source_sets: Vec<SourceSetConfig>,
    #[serde(default)]
    pub visualisation: VisualisationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            grid: GridConfig::default(),
            simulation: SimulationConfig::default(),
            drive: DriveConfig::default(),
            source_sets: default_source_sets(),
            visualisation: VisualisationConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file '{}': {}", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("failed to parse TOML config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.simulation.validate()?;
        self.drive.validate()?;
        self.visualisation.validate()?;

        if self.source_sets.is_empty() {
            return Err(anyhow!("at least one source set must be defined"));
        }
        let grid = self.grid.grid();
        for (idx, set) in self.source_sets.iter().enumerate() {
            if set.points.is_empty() {
                return Err(anyhow!("source set '{}' has no points", set.name));
            }
            if self.source_sets[..idx].iter().any(|s| s.name == set.name) {
                return Err(anyhow!("duplicate source set name '{}'", set.name));
            }
            for &[x, y] in &set.points {
                if !grid.in_bounds(x, y) {
                    return Err(anyhow!(
                        "source at ({}, {}) in set '{}' is outside grid bounds ({}, {})",
                        x,
                        y,
                        set.name,
                        grid.nx,
                        grid.ny
                    ));
                }
            }
        }
        if !self.source_sets.iter().any(|s| s.name == self.drive.active_set) {
            return Err(anyhow!(
                "active source set '{}' is not defined",
                self.drive.active_set
            ));
        }
        Ok(())
    }

    pub fn source_sets(&self) -> Vec<SourceSet> {
        self.source_sets
            .iter()
            .map(|set| {
                SourceSet::new(
                    set.name.clone(),
                    set.points
                        .iter()
                        .map(|&[x, y]| SourcePoint { x, y })
                        .collect(),
                )
            })
            .collect()
    }

    pub fn log_summary(&self) {
        let grid = self.grid.grid();
        let params = self.simulation.params();
        info!(
            nx = grid.nx,
            ny = grid.ny,
            dx = grid.dx,
            dy = grid.dy,
            width = grid.width(),
            height = grid.height(),
            "grid"
        );
        info!(
            wave_speed = params.wave_speed,
            dt = params.dt,
            nt = self.simulation.nt(),
            total_time = self.simulation.total_time,
            cfl = params.cfl_number(grid.dx),
            "simulation"
        );
        info!(
            frequency = self.drive.frequency,
            phase = self.drive.phase,
            amplitude = params.amplitude,
            active_set = %self.drive.active_set,
            sets = self.source_sets.len(),
            "drive"
        );
    }
}
