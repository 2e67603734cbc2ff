//! # Fields
//!
//! Decaying scalar grids (the swarm's shared memory). Each cell holds a
//! non-negative, clamped intensity.
//!
//! One update step is decay plus a discrete Laplacian diffusion over the
//! 4-neighbourhood. The step reads the old grid and writes a second buffer,
//! so the result does not depend on sweep order.

use crate::core::config::{FieldConfig, FieldParams};
use crate::core::Position;

/// Dense scalar grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridField {
    width: usize,
    height: usize,
    params: FieldParams,
    data: Vec<f32>,
    scratch: Vec<f32>,
}

impl GridField {
    pub fn new(width: usize, height: usize, params: FieldParams) -> Self {
        let cells = width * height;
        Self {
            width,
            height,
            params,
            data: vec![0.0; cells],
            scratch: vec![0.0; cells],
        }
    }

    /// Rebuild from a snapshot; values are clamped into range
    pub fn from_data(width: usize, height: usize, params: FieldParams, data: Vec<f32>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        let mut field = Self::new(width, height, params);
        for (dst, v) in field.data.iter_mut().zip(data) {
            *dst = clamp_intensity(v, params.max);
        }
        Some(field)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn params(&self) -> FieldParams {
        self.params
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }

    /// Intensity at the cell containing `pos` (0 outside the grid)
    pub fn sample(&self, pos: Position) -> f32 {
        if pos.x < 0.0 || pos.y < 0.0 {
            return 0.0;
        }
        let (x, y) = (pos.x as usize, pos.y as usize);
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.at(x, y)
    }

    /// Add intensity at a cell (clamped)
    pub fn deposit(&mut self, pos: Position, amount: f32) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let (x, y) = pos.cell(self.width, self.height);
        let i = self.idx(x, y);
        self.data[i] = clamp_intensity(self.data[i] + amount, self.params.max);
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let i = self.idx(x, y);
        self.data[i] = clamp_intensity(value, self.params.max);
    }

    pub fn fill(&mut self, value: f32) {
        let v = clamp_intensity(value, self.params.max);
        self.data.iter_mut().for_each(|c| *c = v);
    }

    pub fn total(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Visit the 3x3 neighbourhood around `pos` (cut at the border)
    fn neighbourhood(&self, pos: Position) -> impl Iterator<Item = f32> + '_ {
        let (cx, cy) = pos.cell(self.width, self.height);
        let xs = cx.saturating_sub(1)..=(cx + 1).min(self.width - 1);
        let ys = cy.saturating_sub(1)..=(cy + 1).min(self.height - 1);
        ys.flat_map(move |y| xs.clone().map(move |x| self.at(x, y)))
    }

    /// Sum of the 3x3 neighbourhood around `pos`
    pub fn local_sum(&self, pos: Position) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        self.neighbourhood(pos).sum()
    }

    /// Variance of the 3x3 neighbourhood around `pos`
    pub fn local_variance(&self, pos: Position) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut n = 0.0;
        for v in self.neighbourhood(pos) {
            sum += v;
            sum_sq += v * v;
            n += 1.0;
        }
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }

    /// One decay + diffusion step (double-buffered)
    pub fn step(&mut self) {
        let FieldParams { decay, diffusion, max } = self.params;
        let keep = (1.0 - decay).clamp(0.0, 1.0);
        let diffusion = diffusion.clamp(0.0, 1.0);
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let c = self.data[y * w + x];
                // Missing neighbours at the border reflect the cell itself
                let left = if x > 0 { self.data[y * w + x - 1] } else { c };
                let right = if x + 1 < w { self.data[y * w + x + 1] } else { c };
                let up = if y > 0 { self.data[(y - 1) * w + x] } else { c };
                let down = if y + 1 < h { self.data[(y + 1) * w + x] } else { c };
                let mean = (left + right + up + down) * 0.25;
                let mixed = (1.0 - diffusion) * c + diffusion * mean;
                self.scratch[y * w + x] = clamp_intensity(keep * mixed, max);
            }
        }
        std::mem::swap(&mut self.data, &mut self.scratch);
    }
}

fn clamp_intensity(v: f32, max: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, max)
    }
}

/// Which grid of a `FieldSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Signal,
    Attractant,
    Repellent,
    Reinforcement,
}

/// All fields of one engine
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    /// Short-lived: marks recently visited cells
    pub signal: GridField,

    /// Medium-lived: successful deposits
    pub attractant: GridField,

    /// Medium-lived: over-dense regions
    pub repellent: GridField,

    /// Long-lived: repeatedly used paths
    pub reinforcement: GridField,

    /// Per-table signature, one grid per table id
    pub signatures: Vec<GridField>,

    /// Payload count per cell, recomputed each step (not decaying)
    pub density: GridField,
}

impl FieldSet {
    pub fn new(width: usize, height: usize, tables: usize, config: &FieldConfig) -> Self {
        Self {
            signal: GridField::new(width, height, config.signal),
            attractant: GridField::new(width, height, config.trail),
            repellent: GridField::new(width, height, config.trail),
            reinforcement: GridField::new(width, height, config.reinforcement),
            signatures: (0..tables)
                .map(|_| GridField::new(width, height, config.signature))
                .collect(),
            density: GridField::new(width, height, FieldParams::new(0.0, 0.0, f32::MAX)),
        }
    }

    pub fn width(&self) -> usize {
        self.signal.width()
    }

    pub fn height(&self) -> usize {
        self.signal.height()
    }

    pub fn get(&self, kind: FieldKind) -> &GridField {
        match kind {
            FieldKind::Signal => &self.signal,
            FieldKind::Attractant => &self.attractant,
            FieldKind::Repellent => &self.repellent,
            FieldKind::Reinforcement => &self.reinforcement,
        }
    }

    pub fn get_mut(&mut self, kind: FieldKind) -> &mut GridField {
        match kind {
            FieldKind::Signal => &mut self.signal,
            FieldKind::Attractant => &mut self.attractant,
            FieldKind::Repellent => &mut self.repellent,
            FieldKind::Reinforcement => &mut self.reinforcement,
        }
    }

    /// Make sure a signature grid exists for every table
    pub fn ensure_tables(&mut self, tables: usize, config: &FieldConfig) {
        let (w, h) = (self.width(), self.height());
        while self.signatures.len() < tables {
            self.signatures.push(GridField::new(w, h, config.signature));
        }
    }

    /// Advance every decaying field by one step
    pub fn step(&mut self) {
        self.signal.step();
        self.attractant.step();
        self.repellent.step();
        self.reinforcement.step();
        for sig in &mut self.signatures {
            sig.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FieldParams {
        FieldParams::new(0.1, 0.2, 5.0)
    }

    #[test]
    fn test_deposit_is_clamped() {
        let mut field = GridField::new(4, 4, params());
        field.deposit(Position::new(1.5, 1.5), 100.0);
        assert_eq!(field.at(1, 1), 5.0);
        field.deposit(Position::new(1.5, 1.5), -100.0);
        assert_eq!(field.at(1, 1), 0.0);
    }

    #[test]
    fn test_step_decays_monotonically() {
        let mut field = GridField::new(8, 8, params());
        field.deposit(Position::new(4.0, 4.0), 5.0);
        let mut last_total = field.total();
        let mut last_max = field.max_value();
        for _ in 0..50 {
            field.step();
            assert!(field.total() <= last_total + 1e-5);
            assert!(field.max_value() <= last_max + 1e-6);
            assert!(field.data().iter().all(|v| *v >= 0.0));
            last_total = field.total();
            last_max = field.max_value();
        }
        assert!(last_total < 1.0);
    }

    #[test]
    fn test_step_spreads_to_neighbours() {
        let mut field = GridField::new(5, 5, FieldParams::new(0.0, 0.5, 10.0));
        field.set(2, 2, 4.0);
        field.step();
        assert!(field.at(2, 2) < 4.0);
        assert!(field.at(1, 2) > 0.0);
        assert!(field.at(2, 3) > 0.0);
        assert_eq!(field.at(0, 0), 0.0);
    }

    #[test]
    fn test_step_is_sweep_order_independent() {
        // A symmetric input must stay symmetric; an in-place sweep would skew it
        let mut field = GridField::new(5, 1, FieldParams::new(0.0, 0.8, 10.0));
        field.set(2, 0, 8.0);
        field.step();
        assert!((field.at(1, 0) - field.at(3, 0)).abs() < 1e-6);
    }

    #[test]
    fn test_sample_outside_grid_is_zero() {
        let mut field = GridField::new(4, 4, params());
        field.fill(1.0);
        assert_eq!(field.sample(Position::new(-1.0, 2.0)), 0.0);
        assert_eq!(field.sample(Position::new(2.0, 9.0)), 0.0);
        assert_eq!(field.sample(Position::new(2.0, 2.0)), 1.0);
    }

    #[test]
    fn test_local_variance() {
        let mut field = GridField::new(3, 3, params());
        assert_eq!(field.local_variance(Position::new(1.0, 1.0)), 0.0);
        field.set(1, 1, 3.0);
        assert!(field.local_variance(Position::new(1.0, 1.0)) > 0.0);
    }

    #[test]
    fn test_local_sum_cut_at_border() {
        let mut field = GridField::new(3, 3, params());
        field.fill(1.0);
        assert_eq!(field.local_sum(Position::new(1.0, 1.0)), 9.0);
        assert_eq!(field.local_sum(Position::new(0.0, 0.0)), 4.0);
    }

    #[test]
    fn test_from_data_checks_size() {
        assert!(GridField::from_data(2, 2, params(), vec![0.0; 3]).is_none());
        let field = GridField::from_data(2, 2, params(), vec![1.0, 9.0, -1.0, 0.5]).unwrap();
        assert_eq!(field.data(), &[1.0, 5.0, 0.0, 0.5]);
    }

    #[test]
    fn test_field_set_tables() {
        let config = FieldConfig::default();
        let mut set = FieldSet::new(8, 8, 1, &config);
        set.ensure_tables(3, &config);
        assert_eq!(set.signatures.len(), 3);
        set.get_mut(FieldKind::Signal).deposit(Position::new(1.0, 1.0), 1.0);
        set.step();
        assert!(set.get(FieldKind::Signal).at(1, 1) < 1.0);
    }
}
