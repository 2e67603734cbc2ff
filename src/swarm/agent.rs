//! # Agents
//!
//! Carrier agents and their behavioural profiles.
//!
//! Species are data, not code paths: every species runs the same
//! sense -> score -> choose loop, only the weight profile differs.

use rand::Rng;

use super::field::FieldSet;
use crate::core::{Position, TableId};

/// Behavioural profile tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Species {
    /// Low path weight, high novelty
    Explorator,
    /// High path / attractant weight
    Integrator,
    /// High repellent weight, thins out over-dense regions
    Regulator,
    /// Elevated mutation, seeks high-variance neighbourhoods
    Innovator,
}

impl Species {
    pub const ALL: [Species; 4] = [
        Species::Explorator,
        Species::Integrator,
        Species::Regulator,
        Species::Innovator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Explorator => "explorator",
            Species::Integrator => "integrator",
            Species::Regulator => "regulator",
            Species::Innovator => "innovator",
        }
    }

    pub fn profile(&self) -> SpeciesProfile {
        match self {
            Species::Explorator => SpeciesProfile {
                path_weight: 0.2,
                attract_weight: 0.6,
                repel_weight: 0.8,
                novelty_weight: 1.4,
                density_weight: 0.2,
                entropy_weight: 0.0,
                mutation_mul: 1.0,
                density_threshold: None,
            },
            Species::Integrator => SpeciesProfile {
                path_weight: 1.5,
                attract_weight: 1.4,
                repel_weight: 1.0,
                novelty_weight: 0.1,
                density_weight: 0.6,
                entropy_weight: 0.0,
                mutation_mul: 1.0,
                density_threshold: None,
            },
            Species::Regulator => SpeciesProfile {
                path_weight: 0.8,
                attract_weight: 0.8,
                repel_weight: 1.8,
                novelty_weight: 0.3,
                density_weight: 0.0,
                entropy_weight: 0.0,
                mutation_mul: 1.0,
                density_threshold: Some(4.0),
            },
            Species::Innovator => SpeciesProfile {
                path_weight: 0.6,
                attract_weight: 0.7,
                repel_weight: 0.9,
                novelty_weight: 0.8,
                density_weight: 0.2,
                entropy_weight: 1.2,
                mutation_mul: 1.6,
                density_threshold: None,
            },
        }
    }

    /// Draw a species according to population shares
    pub fn pick<R: Rng>(rng: &mut R, mix: &[f32; 4]) -> Species {
        let total: f32 = mix.iter().map(|f| f.max(0.0)).sum();
        if total <= 0.0 {
            return Species::Explorator;
        }
        let r = rng.gen::<f32>() * total;
        let mut acc = 0.0;
        for (species, share) in Species::ALL.iter().zip(mix.iter()) {
            acc += share.max(0.0);
            if r < acc {
                return *species;
            }
        }
        Species::Innovator
    }
}

/// Weight multipliers consumed by the shared movement rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeciesProfile {
    pub path_weight: f32,
    pub attract_weight: f32,
    pub repel_weight: f32,
    pub novelty_weight: f32,
    pub density_weight: f32,
    pub entropy_weight: f32,
    pub mutation_mul: f32,
    /// Payloads per 3x3 block above which the agent lays repellent
    pub density_threshold: Option<f32>,
}

/// Fixed-length parameter vector:
/// `[sense_gain, field_gain, exploration_bias, target_gain]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Genome(pub [f32; 4]);

const GENOME_BOUNDS: [(f32, f32); 4] = [(0.2, 3.0), (0.2, 3.0), (0.0, 1.0), (0.5, 3.0)];

impl Genome {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Genome([
            rng.gen_range(0.6..1.4),
            rng.gen_range(0.6..1.4),
            rng.gen_range(0.2..0.8),
            rng.gen_range(0.8..1.4),
        ])
    }

    pub fn sense_gain(&self) -> f32 {
        self.0[0]
    }

    pub fn field_gain(&self) -> f32 {
        self.0[1]
    }

    pub fn exploration_bias(&self) -> f32 {
        self.0[2]
    }

    pub fn target_gain(&self) -> f32 {
        self.0[3]
    }

    /// Multiplicative jitter on the gains, additive on the bias; clamped
    pub fn mutated<R: Rng>(&self, rng: &mut R, sigma: f32) -> Self {
        let mut genes = self.0;
        if sigma > 0.0 {
            for (i, gene) in genes.iter_mut().enumerate() {
                if i == 2 {
                    *gene += rng.gen_range(-sigma..sigma);
                } else {
                    *gene *= rng.gen_range((1.0 - sigma)..(1.0 + sigma));
                }
            }
        }
        for (gene, (lo, hi)) in genes.iter_mut().zip(GENOME_BOUNDS) {
            *gene = gene.clamp(lo, hi);
        }
        Genome(genes)
    }
}

/// What an agent is hauling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cargo {
    /// Store index of the carried payload
    pub payload: usize,

    /// Store index of the payload it is heading for
    pub anchor: usize,

    /// Table whose signature field guides the trip
    pub anchor_table: TableId,

    /// Attraction strength (1.0 for foreign keys, lower for cluster hints)
    pub strength: f32,

    /// Foreign-key slot to mark settled on arrival
    pub fk_slot: Option<usize>,
}

/// A mobile carrier
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: u32,
    pub position: Position,
    /// Radians
    pub heading: f32,
    pub species: Species,
    pub energy: f32,
    pub genome: Genome,
    pub cargo: Option<Cargo>,
    /// Consecutive successful steps
    pub streak: u32,
}

/// Where a carrier is going, as seen by the scoring rule
#[derive(Debug, Clone, Copy)]
pub struct Steering {
    pub target: Position,
    pub table: TableId,
    pub strength: f32,
}

const TARGET_WEIGHT: f32 = 3.0;
const SIGNATURE_WEIGHT: f32 = 0.5;

impl Agent {
    pub fn new(id: u32, position: Position, heading: f32, species: Species, energy: f32, genome: Genome) -> Self {
        Self {
            id,
            position,
            heading,
            species,
            energy,
            genome,
            cargo: None,
            streak: 0,
        }
    }

    pub fn is_carrying(&self) -> bool {
        self.cargo.is_some()
    }

    /// Weighted, non-negative-normalised score of one sensor direction
    pub fn score(&self, fields: &FieldSet, sample: Position, direction: f32, steering: Option<&Steering>) -> f32 {
        let profile = self.species.profile();
        let squash = |v: f32| v / (1.0 + v);

        let path = squash(fields.reinforcement.sample(sample));
        let attract = squash(fields.attractant.sample(sample));
        let repel = squash(fields.repellent.sample(sample));
        let novelty = 1.0 / (1.0 + fields.signal.sample(sample));
        let density = squash(fields.density.sample(sample));
        let entropy = squash(fields.density.local_variance(sample));

        let field_term = profile.path_weight * path + profile.attract_weight * attract
            - profile.repel_weight * repel
            + profile.novelty_weight * novelty
            + profile.density_weight * density
            + profile.entropy_weight * entropy;
        let mut score = self.genome.sense_gain() * self.genome.field_gain() * field_term;

        if let Some(steer) = steering {
            let dx = steer.target.x - self.position.x;
            let dy = steer.target.y - self.position.y;
            let len = (dx * dx + dy * dy).sqrt();
            if len > f32::EPSILON {
                let align = (direction.cos() * dx + direction.sin() * dy) / len;
                score += self.genome.target_gain() * TARGET_WEIGHT * steer.strength * align.max(0.0);
            }
            if let Some(sig) = fields.signatures.get(steer.table.index()) {
                score += SIGNATURE_WEIGHT * squash(sig.sample(sample));
            }
        }
        score
    }

    /// Pick the next heading among left / front / right, with probabilities
    /// from a softmax over the direction scores.
    pub fn choose_heading<R: Rng>(
        &self,
        rng: &mut R,
        fields: &FieldSet,
        sensor_distance: f32,
        sensor_angle: f32,
        steering: Option<&Steering>,
    ) -> f32 {
        let candidates = [
            self.heading - sensor_angle,
            self.heading,
            self.heading + sensor_angle,
        ];
        let scores: Vec<f32> = candidates
            .iter()
            .map(|&dir| {
                let sample = Position::new(
                    self.position.x + dir.cos() * sensor_distance,
                    self.position.y + dir.sin() * sensor_distance,
                );
                self.score(fields, sample, dir, steering)
            })
            .collect();

        let weights = softmax(&scores, 0.15 + 0.6 * self.genome.exploration_bias());
        let r = rng.gen::<f32>();
        let mut acc = 0.0;
        for (dir, w) in candidates.iter().zip(weights.iter()) {
            acc += w;
            if r < acc {
                return *dir;
            }
        }
        candidates[2]
    }
}

/// Temperature softmax; always non-negative and sums to 1
pub fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let t = temperature.max(1e-3);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| ((s - max) / t).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return vec![1.0 / scores.len() as f32; scores.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FieldConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn agent(species: Species) -> Agent {
        Agent::new(0, Position::new(10.0, 10.0), 0.0, species, 1.0, Genome([1.0, 1.0, 0.5, 1.0]))
    }

    #[test]
    fn test_softmax_normalised() {
        let w = softmax(&[1.0, 2.0, 3.0], 0.5);
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(w[2] > w[1] && w[1] > w[0]);
        assert!(w.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_softmax_degenerate_inputs() {
        assert!(softmax(&[], 1.0).is_empty());
        let w = softmax(&[f32::NAN, 1.0], 1.0);
        assert_eq!(w, vec![0.5, 0.5]);
    }

    #[test]
    fn test_species_profiles_differ() {
        let e = Species::Explorator.profile();
        let i = Species::Integrator.profile();
        let r = Species::Regulator.profile();
        let n = Species::Innovator.profile();
        assert!(e.novelty_weight > i.novelty_weight);
        assert!(i.path_weight > e.path_weight);
        assert!(r.repel_weight > i.repel_weight);
        assert!(r.density_threshold.is_some());
        assert!(n.mutation_mul > e.mutation_mul);
        assert!(n.entropy_weight > 0.0);
    }

    #[test]
    fn test_species_pick_respects_mix() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(Species::pick(&mut rng, &[0.0, 1.0, 0.0, 0.0]), Species::Integrator);
        }
        assert_eq!(Species::pick(&mut rng, &[0.0; 4]), Species::Explorator);
    }

    #[test]
    fn test_genome_mutation_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut g = Genome([2.9, 0.25, 0.99, 2.9]);
        for _ in 0..200 {
            g = g.mutated(&mut rng, 0.5);
            for (gene, (lo, hi)) in g.0.iter().zip(GENOME_BOUNDS) {
                assert!(*gene >= lo && *gene <= hi);
            }
        }
    }

    #[test]
    fn test_steering_prefers_target_direction() {
        let fields = FieldSet::new(32, 32, 1, &FieldConfig::default());
        let a = agent(Species::Integrator);
        let steer = Steering {
            target: Position::new(20.0, 10.0),
            table: TableId(0),
            strength: 1.0,
        };
        let toward = a.score(&fields, Position::new(12.0, 10.0), 0.0, Some(&steer));
        let away = a.score(&fields, Position::new(8.0, 10.0), std::f32::consts::PI, Some(&steer));
        assert!(toward > away);
    }

    #[test]
    fn test_choose_heading_mostly_toward_target() {
        let fields = FieldSet::new(32, 32, 1, &FieldConfig::default());
        let mut a = agent(Species::Integrator);
        a.genome = Genome([1.0, 1.0, 0.0, 3.0]);
        // Target straight to the right of a heading of +pi/4
        a.heading = std::f32::consts::FRAC_PI_4;
        let steer = Steering {
            target: Position::new(30.0, 10.0),
            table: TableId(0),
            strength: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let right_turns = (0..200)
            .filter(|_| {
                let h = a.choose_heading(&mut rng, &fields, 2.0, std::f32::consts::FRAC_PI_4, Some(&steer));
                h.abs() < 1e-4
            })
            .count();
        assert!(right_turns > 100);
    }
}
