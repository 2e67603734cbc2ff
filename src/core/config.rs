//! # Configuration
//!
//! Engine configuration. Every section has defaults, so a JSON file only
//! needs to name what it overrides.
//!
//! ```json
//! { "width": 96, "height": 96, "ingest": { "steps": 500, "seed": 7 } }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::{MycoError, MycoResult};

/// Largest grid accepted, in cells (2048 x 2048). Every field layer
/// allocates one f32 per cell.
pub const MAX_GRID_CELLS: usize = 1 << 22;

/// Check a grid size against the cell cap
pub fn grid_size_ok(width: usize, height: usize) -> bool {
    width > 0 && height > 0 && width.checked_mul(height).map_or(false, |cells| cells <= MAX_GRID_CELLS)
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MycoConfig {
    /// Grid width in cells
    pub width: usize,

    /// Grid height in cells
    pub height: usize,

    /// Radius used when a query does not name one
    pub default_radius: f32,

    /// Edge length of a spatial-index bucket
    pub bucket_size: f32,

    /// Merge automatically once this many delta records are pending
    pub auto_merge: Option<usize>,

    /// Swarm ingestion
    pub ingest: IngestConfig,

    /// Field decay / diffusion
    pub fields: FieldConfig,
}

/// Swarm ingestion parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub agent_count: usize,

    /// Step budget of a full ingest
    pub steps: usize,

    /// Step budget of the re-cluster pass after a merge
    pub recluster_steps: usize,

    pub seed: u64,

    /// Where agents spawn; grid center when absent
    pub spawn: Option<(f32, f32)>,

    /// Aggregate displacement per step below which a step counts as quiet
    pub convergence_threshold: f32,

    /// Quiet steps in a row before stopping early
    pub convergence_patience: usize,

    /// Distance to the parent at which a carried payload is deposited
    pub arrival_tolerance: f32,

    /// Max offset of a deposited payload from its parent
    pub deposit_spread: f32,

    /// Look-ahead distance of the three sensors
    pub sensor_distance: f32,

    /// Angle between the front sensor and the side sensors (radians)
    pub sensor_angle: f32,

    /// Distance an agent moves per step
    pub step_length: f32,

    /// Successful steps in a row before the path field is reinforced
    pub reinforce_after: u32,

    /// Explorator / Integrator / Regulator / Innovator population shares
    pub species_mix: [f32; 4],

    /// Reproduction and genome mutation on/off
    pub evolution: bool,

    /// Base genome mutation sigma (scaled per species)
    pub mutation_sigma: f32,

    pub energy: EnergyConfig,
}

/// Agent energy budget
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub initial: f32,

    /// Drain per step
    pub metabolism: f32,

    /// Gain per successful deposit
    pub deposit_reward: f32,

    /// Energy above which an agent reproduces
    pub reproduce_threshold: f32,

    /// Population floor kept while work remains
    pub min_agents: usize,
}

/// Decay/diffusion of one field
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldParams {
    /// Fraction lost per step (0..1)
    pub decay: f32,

    /// Fraction exchanged with the 4-neighbourhood per step (0..1)
    pub diffusion: f32,

    /// Intensity clamp
    pub max: f32,
}

impl FieldParams {
    pub const fn new(decay: f32, diffusion: f32, max: f32) -> Self {
        Self { decay, diffusion, max }
    }
}

impl Default for FieldParams {
    fn default() -> Self {
        Self::new(0.05, 0.15, 10.0)
    }
}

/// Parameters of every field family
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Short-lived anti-reversal signal
    pub signal: FieldParams,

    /// Attractant / repellent trails
    pub trail: FieldParams,

    /// Long-lived reinforced path
    pub reinforcement: FieldParams,

    /// Per-table signature fields
    pub signature: FieldParams,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            signal: FieldParams::new(0.35, 0.25, 10.0),
            trail: FieldParams::new(0.05, 0.15, 10.0),
            reinforcement: FieldParams::new(0.002, 0.02, 50.0),
            signature: FieldParams::new(0.02, 0.15, 10.0),
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            initial: 1.0,
            metabolism: 0.002,
            deposit_reward: 0.4,
            reproduce_threshold: 2.0,
            min_agents: 8,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            agent_count: 64,
            steps: 2000,
            recluster_steps: 300,
            seed: 42,
            spawn: None,
            convergence_threshold: 0.05,
            convergence_patience: 20,
            arrival_tolerance: 1.5,
            deposit_spread: 1.0,
            sensor_distance: 2.0,
            sensor_angle: std::f32::consts::FRAC_PI_4,
            step_length: 1.0,
            reinforce_after: 3,
            species_mix: [0.40, 0.25, 0.20, 0.15],
            evolution: true,
            mutation_sigma: 0.05,
            energy: EnergyConfig::default(),
        }
    }
}

impl Default for MycoConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            default_radius: 5.0,
            bucket_size: 4.0,
            auto_merge: None,
            ingest: IngestConfig::default(),
            fields: FieldConfig::default(),
        }
    }
}

impl MycoConfig {
    /// Default configuration on a `width x height` grid
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> MycoResult<Self> {
        let config: MycoConfig = serde_json::from_str(json)
            .map_err(|e| MycoError::LoadFailure(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> MycoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject configurations the swarm cannot run with
    pub fn validate(&self) -> MycoResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MycoError::Ingest("grid must be at least 1x1".into()));
        }
        if !grid_size_ok(self.width, self.height) {
            return Err(MycoError::Ingest(format!(
                "grid {}x{} exceeds {} cells",
                self.width, self.height, MAX_GRID_CELLS
            )));
        }
        if self.ingest.agent_count == 0 {
            return Err(MycoError::Ingest("agent_count must be positive".into()));
        }
        if !(self.bucket_size > 0.0) {
            return Err(MycoError::Ingest("bucket_size must be positive".into()));
        }
        if self.ingest.species_mix.iter().any(|f| *f < 0.0)
            || self.ingest.species_mix.iter().sum::<f32>() <= 0.0
        {
            return Err(MycoError::Ingest("species_mix must be non-negative and not all zero".into()));
        }
        Ok(())
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.default_radius = radius;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ingest.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.ingest.steps = steps;
        self
    }

    pub fn with_agents(mut self, agent_count: usize) -> Self {
        self.ingest.agent_count = agent_count;
        self
    }

    pub fn with_auto_merge(mut self, threshold: Option<usize>) -> Self {
        self.auto_merge = threshold;
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: f32) -> Self {
        self.bucket_size = bucket_size;
        self
    }
}
