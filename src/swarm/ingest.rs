//! # Ingest
//!
//! The swarm-sort run loop. Carrier agents pick up payloads whose parent is
//! known, walk them toward the parent and drop them nearby.
//!
//! Per step:
//! 1. fields decay and diffuse, density and table signatures are refreshed
//! 2. every agent claims work, senses, turns, moves and deposits
//! 3. dead agents drop their cargo back into the queue, rich agents reproduce
//! 4. the aggregate payload displacement feeds the convergence check
//!
//! Work is queued parents first. When a payload is dropped, any payload
//! anchored on it that now lies out of reach goes back into the queue, so a
//! converged run leaves every child next to its parent's final position.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::agent::{Agent, Cargo, Genome, Species, Steering};
use super::field::FieldSet;
use crate::core::config::{FieldConfig, IngestConfig, MycoConfig};
use crate::core::{MycoError, PayloadKey, Position, Schema};
use crate::ports::PayloadStore;

// ============================================================================
// Inputs
// ============================================================================

/// Cooperative stop signal, checked once per step
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A soft, non-foreign-key attraction (trait or domain grouping)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterHint {
    pub child: PayloadKey,
    pub anchor: PayloadKey,
    pub strength: f32,
}

/// Which payloads a run may move
#[derive(Debug, Clone, PartialEq)]
pub enum IngestScope {
    /// Every payload with a resolvable target
    All,
    /// These payloads plus the direct children of each
    Subset(Vec<PayloadKey>),
}

// ============================================================================
// Report
// ============================================================================

/// A reference that did not resolve
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingRef {
    pub key: PayloadKey,
    pub column: String,
    pub parent_id: i64,
}

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Steps actually simulated
    pub steps: usize,

    /// Stopped early because displacement stayed below the threshold
    pub converged: bool,

    /// Stopped by a cancel token
    pub cancelled: bool,

    /// Payloads resting next to their target at the end of the run
    pub placed: usize,

    /// Foreign keys marked settled
    pub resolved: usize,

    /// Payloads that were still in transit or queued when the run ended
    pub unsettled: usize,

    pub dangling: Vec<DanglingRef>,

    /// Mean payload-to-target distance before the first step
    pub mean_distance_before: Option<f32>,

    /// Mean payload-to-target distance after the last step
    pub mean_distance_after: Option<f32>,

    pub agents_alive: usize,
    pub agents_born: usize,
    pub agents_died: usize,
}

impl IngestReport {
    pub fn dangling_count(&self) -> usize {
        self.dangling.len()
    }

    /// Dangling references as error values, with table names resolved
    pub fn dangling_errors(&self, schema: &Schema) -> Vec<MycoError> {
        self.dangling
            .iter()
            .map(|d| MycoError::DanglingForeignKey {
                table: schema.name(d.key.table).unwrap_or("?").to_string(),
                id: d.key.id,
                column: d.column.clone(),
            })
            .collect()
    }
}

// ============================================================================
// Target resolution
// ============================================================================

/// Where a payload wants to go
#[derive(Debug, Clone, Copy, PartialEq)]
struct Target {
    anchor: usize,
    strength: f32,
    fk_slot: Option<usize>,
}

/// Resolve one target per payload and flag dangling references.
///
/// The first foreign key whose parent exists wins; payloads without one fall
/// back to their cluster hint.
fn resolve_targets(
    store: &mut dyn PayloadStore,
    hints: &[ClusterHint],
    dangling: &mut Vec<DanglingRef>,
) -> Vec<Option<Target>> {
    let mut hint_for: HashMap<PayloadKey, &ClusterHint> = HashMap::new();
    for hint in hints {
        hint_for.entry(hint.child).or_insert(hint);
    }

    let mut targets = Vec::with_capacity(store.len());
    for i in 0..store.len() {
        let mut target = None;
        let mut is_dangling = false;
        let (key, parents): (PayloadKey, Vec<(usize, Option<PayloadKey>, String)>) = match store.at(i) {
            Some(p) => (
                p.key(),
                p.foreign_keys
                    .iter()
                    .enumerate()
                    .map(|(slot, fk)| (slot, fk.parent_key(), fk.column.clone()))
                    .collect(),
            ),
            None => {
                targets.push(None);
                continue;
            }
        };
        for (slot, parent, column) in parents {
            let Some(parent) = parent else { continue };
            match store.index_of(parent) {
                Some(j) if j != i => {
                    if target.is_none() {
                        target = Some(Target {
                            anchor: j,
                            strength: 1.0,
                            fk_slot: Some(slot),
                        });
                    }
                }
                Some(_) => {}
                None => {
                    is_dangling = true;
                    dangling.push(DanglingRef {
                        key,
                        column,
                        parent_id: parent.id,
                    });
                }
            }
        }
        if target.is_none() {
            if let Some(hint) = hint_for.get(&key) {
                if let Some(j) = store.index_of(hint.anchor).filter(|j| *j != i) {
                    target = Some(Target {
                        anchor: j,
                        strength: hint.strength.clamp(0.05, 1.0),
                        fk_slot: None,
                    });
                }
            }
        }
        if let Some(p) = store.at_mut(i) {
            p.dangling = is_dangling;
        }
        targets.push(target);
    }
    targets
}

fn mean_target_distance(store: &dyn PayloadStore, movers: &[usize], targets: &[Option<Target>]) -> Option<f32> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &i in movers {
        let Some(t) = targets[i] else { continue };
        let here = store.at(i).and_then(|p| p.position);
        let there = store.at(t.anchor).and_then(|p| p.position);
        if let (Some(a), Some(b)) = (here, there) {
            sum += a.distance(&b);
            n += 1;
        }
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f32)
    }
}

/// Number of anchor hops from a payload to a root (cycles stop at `len`)
fn chain_depth(i: usize, targets: &[Option<Target>]) -> usize {
    let mut depth = 0;
    let mut current = i;
    while let Some(t) = targets[current] {
        depth += 1;
        current = t.anchor;
        if depth >= targets.len() {
            break;
        }
    }
    depth
}

/// Queue plus per-payload bookkeeping for one run
struct Work {
    queue: VecDeque<usize>,
    /// Queued or in an agent's hands
    busy: Vec<bool>,
    /// Allowed to move in this run
    mover: Vec<bool>,
    /// Dropped next to its target in this run
    placed: Vec<bool>,
    /// Payloads anchored on each payload
    children: Vec<Vec<usize>>,
}

impl Work {
    fn new(len: usize, movers: &[usize], targets: &[Option<Target>]) -> Self {
        let mut children = vec![Vec::new(); len];
        for (i, t) in targets.iter().enumerate() {
            if let Some(t) = t {
                children[t.anchor].push(i);
            }
        }
        let mut work = Self {
            queue: VecDeque::with_capacity(movers.len()),
            busy: vec![false; len],
            mover: vec![false; len],
            placed: vec![false; len],
            children,
        };
        for &i in movers {
            work.push(i);
        }
        work
    }

    fn push(&mut self, i: usize) {
        self.busy[i] = true;
        self.mover[i] = true;
        self.queue.push_back(i);
    }

    fn movers(&self) -> Vec<usize> {
        (0..self.mover.len()).filter(|&i| self.mover[i]).collect()
    }
}

// ============================================================================
// Swarm
// ============================================================================

/// One ingestion run over a store
pub struct Swarm<'a> {
    config: &'a IngestConfig,
    field_config: &'a FieldConfig,
    width: usize,
    height: usize,
    rng: StdRng,
    agents: Vec<Agent>,
    next_agent: u32,
    born: usize,
    died: usize,
}

impl<'a> Swarm<'a> {
    pub fn new(config: &'a MycoConfig) -> Self {
        Self {
            config: &config.ingest,
            field_config: &config.fields,
            width: config.width,
            height: config.height,
            rng: StdRng::seed_from_u64(config.ingest.seed),
            agents: Vec::new(),
            next_agent: 0,
            born: 0,
            died: 0,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    fn spawn_point(&self) -> Position {
        match self.config.spawn {
            Some((x, y)) => Position::new(x, y).clamped(self.width, self.height),
            None => Position::new(self.width as f32 / 2.0, self.height as f32 / 2.0),
        }
    }

    fn spawn_agent(&mut self) {
        let species = Species::pick(&mut self.rng, &self.config.species_mix);
        let genome = Genome::random(&mut self.rng);
        let heading = self.rng.gen_range(0.0..(2.0 * PI));
        let agent = Agent::new(
            self.next_agent,
            self.spawn_point(),
            heading,
            species,
            self.config.energy.initial,
            genome,
        );
        self.next_agent += 1;
        self.agents.push(agent);
    }

    fn random_position(&mut self) -> Position {
        Position::new(
            self.rng.gen_range(0.0..self.width as f32),
            self.rng.gen_range(0.0..self.height as f32),
        )
        .clamped(self.width, self.height)
    }

    fn near(&mut self, center: Position) -> Position {
        let angle = self.rng.gen_range(0.0..(2.0 * PI));
        let r = self.rng.gen::<f32>() * self.config.deposit_spread.max(0.0);
        Position::new(center.x + angle.cos() * r, center.y + angle.sin() * r).clamped(self.width, self.height)
    }

    /// Run up to `steps` steps over the payloads selected by `scope`.
    pub fn run(
        &mut self,
        store: &mut dyn PayloadStore,
        fields: &mut FieldSet,
        tables: usize,
        hints: &[ClusterHint],
        scope: &IngestScope,
        steps: usize,
        cancel: Option<&CancelToken>,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let targets = resolve_targets(store, hints, &mut report.dangling);
        if !report.dangling.is_empty() {
            warn!(dangling = report.dangling.len(), "Unresolved foreign keys");
        }

        let mut movers = self.select_movers(store, &targets, scope);
        movers.sort_by_key(|&i| chain_depth(i, &targets));
        self.scatter(store, &targets, scope);
        for &i in &movers {
            if let (Some(t), Some(p)) = (targets[i], store.at_mut(i)) {
                if let Some(fk) = t.fk_slot.and_then(|slot| p.foreign_keys.get_mut(slot)) {
                    fk.settled = false;
                }
            }
        }

        report.mean_distance_before = mean_target_distance(store, &movers, &targets);
        info!(
            payloads = store.len(),
            movers = movers.len(),
            steps,
            agents = self.config.agent_count,
            "Swarm ingest starting"
        );

        fields.ensure_tables(tables, self.field_config);
        let mut work = Work::new(store.len(), &movers, &targets);
        if !work.queue.is_empty() {
            while self.agents.len() < self.config.agent_count {
                self.spawn_agent();
            }
        }

        let mut quiet = 0usize;
        for step in 0..steps {
            if work.queue.is_empty() && self.agents.iter().all(|a| !a.is_carrying()) {
                report.converged = true;
                break;
            }
            if cancel.map_or(false, CancelToken::is_cancelled) {
                report.cancelled = true;
                break;
            }

            fields.step();
            refresh_density(store, fields);

            let displacement = self.step_agents(store, fields, &targets, &mut work, &mut report);
            self.cull_and_breed(&mut work);
            report.steps = step + 1;

            if displacement < self.config.convergence_threshold {
                quiet += 1;
            } else {
                quiet = 0;
            }
            if quiet >= self.config.convergence_patience.max(1) {
                debug!(step, quiet, "Displacement below threshold");
                report.converged = true;
                break;
            }
        }

        // Cargo still in transit stays where it is
        for agent in &mut self.agents {
            agent.cargo = None;
        }
        let movers = work.movers();
        report.unsettled = movers
            .iter()
            .filter(|&&i| match (targets[i], store.at(i)) {
                (Some(Target { fk_slot: Some(slot), .. }), Some(p)) => {
                    p.foreign_keys.get(slot).map_or(false, |fk| !fk.settled)
                }
                _ => false,
            })
            .count();

        report.mean_distance_after = mean_target_distance(store, &movers, &targets);
        report.agents_alive = self.agents.len();
        report.agents_born = self.born;
        report.agents_died = self.died;
        info!(
            steps = report.steps,
            converged = report.converged,
            cancelled = report.cancelled,
            placed = report.placed,
            dangling = report.dangling.len(),
            "Swarm ingest finished"
        );
        report
    }

    fn select_movers(&self, store: &dyn PayloadStore, targets: &[Option<Target>], scope: &IngestScope) -> Vec<usize> {
        match scope {
            IngestScope::All => (0..store.len()).filter(|&i| targets[i].is_some()).collect(),
            IngestScope::Subset(keys) => {
                let picked: Vec<usize> = keys.iter().filter_map(|k| store.index_of(*k)).collect();
                (0..store.len())
                    .filter(|&i| match targets[i] {
                        Some(t) => picked.contains(&i) || picked.contains(&t.anchor),
                        None => false,
                    })
                    .collect()
            }
        }
    }

    /// Give every unplaced payload a position. Full runs scatter uniformly;
    /// subset runs start new payloads next to an already placed target.
    fn scatter(&mut self, store: &mut dyn PayloadStore, targets: &[Option<Target>], scope: &IngestScope) {
        let mut scattered = 0usize;
        for i in 0..store.len() {
            if store.at(i).map_or(true, |p| p.is_placed()) {
                continue;
            }
            let anchor_pos = match (scope, targets[i]) {
                (IngestScope::Subset(_), Some(t)) => store.at(t.anchor).and_then(|p| p.position),
                _ => None,
            };
            let pos = match anchor_pos {
                Some(center) => self.near(center),
                None => self.random_position(),
            };
            if let Some(p) = store.at_mut(i) {
                p.position = Some(pos);
                scattered += 1;
            }
        }
        if scattered > 0 {
            debug!(scattered, "Scattered unplaced payloads");
        }
    }

    fn step_agents(
        &mut self,
        store: &mut dyn PayloadStore,
        fields: &mut FieldSet,
        targets: &[Option<Target>],
        work: &mut Work,
        report: &mut IngestReport,
    ) -> f32 {
        let cfg = self.config;
        let mut displacement = 0.0;
        let mut agents = std::mem::take(&mut self.agents);

        for agent in agents.iter_mut() {
            if agent.cargo.is_none() {
                self.claim(agent, store, targets, work);
            }

            let steering = agent.cargo.and_then(|cargo| {
                store.at(cargo.anchor).and_then(|anchor| {
                    anchor.position.map(|target| Steering {
                        target,
                        table: cargo.anchor_table,
                        strength: cargo.strength,
                    })
                })
            });

            let heading = agent.choose_heading(
                &mut self.rng,
                fields,
                cfg.sensor_distance,
                cfg.sensor_angle,
                steering.as_ref(),
            );
            let raw = Position::new(
                agent.position.x + heading.cos() * cfg.step_length,
                agent.position.y + heading.sin() * cfg.step_length,
            );
            let next = raw.clamped(self.width, self.height);
            // Bounce off the border
            agent.heading = if next != raw { heading + PI } else { heading };

            let before = steering.map(|s| agent.position.distance(&s.target));
            agent.position = next;
            fields.signal.deposit(next, 1.0);

            if let Some(cargo) = agent.cargo {
                if let Some(p) = store.at_mut(cargo.payload) {
                    if let Some(old) = p.position {
                        displacement += old.distance(&next);
                    }
                    p.position = Some(next);
                }
            }

            match (steering, before) {
                (Some(s), Some(d0)) if next.distance(&s.target) < d0 => agent.streak += 1,
                _ => agent.streak = 0,
            }
            if agent.streak >= cfg.reinforce_after.max(1) {
                fields.reinforcement.deposit(next, 0.5);
            }

            if let (Some(cargo), Some(s)) = (agent.cargo, steering) {
                if next.distance(&s.target) <= cfg.arrival_tolerance {
                    let drop = self.near(s.target);
                    if let Some(p) = store.at_mut(cargo.payload) {
                        if let Some(old) = p.position {
                            displacement += old.distance(&drop);
                        }
                        p.position = Some(drop);
                        if let Some(fk) = cargo.fk_slot.and_then(|slot| p.foreign_keys.get_mut(slot)) {
                            if !fk.settled {
                                fk.settled = true;
                                report.resolved += 1;
                            }
                        }
                    }
                    fields.attractant.deposit(s.target, 1.0);
                    agent.energy += cfg.energy.deposit_reward;
                    agent.cargo = None;
                    work.busy[cargo.payload] = false;
                    work.placed[cargo.payload] = true;
                    report.placed += 1;
                    self.requeue_children(cargo.payload, drop, store, targets, work, report);
                }
            }

            if let Some(threshold) = agent.species.profile().density_threshold {
                if fields.density.local_sum(next) > threshold {
                    fields.repellent.deposit(next, 0.5);
                }
            }

            agent.energy -= cfg.energy.metabolism;
        }

        self.agents = agents;
        displacement
    }

    /// Send payloads anchored on `parent` back to the queue when its new
    /// position `at` leaves them out of reach
    fn requeue_children(
        &self,
        parent: usize,
        at: Position,
        store: &mut dyn PayloadStore,
        targets: &[Option<Target>],
        work: &mut Work,
        report: &mut IngestReport,
    ) {
        let reach = self.config.deposit_spread.max(0.0) + 1e-3;
        let children = work.children[parent].clone();
        let mut requeued = 0usize;
        for c in children {
            if work.busy[c] {
                continue;
            }
            let Some(p) = store.at_mut(c) else { continue };
            if p.position.map_or(false, |pos| pos.distance(&at) <= reach) {
                continue;
            }
            let fk_slot = targets[c].and_then(|t| t.fk_slot);
            if let Some(fk) = fk_slot.and_then(|slot| p.foreign_keys.get_mut(slot)) {
                fk.settled = false;
            }
            if work.placed[c] {
                work.placed[c] = false;
                report.placed = report.placed.saturating_sub(1);
                if fk_slot.is_some() {
                    report.resolved = report.resolved.saturating_sub(1);
                }
            }
            work.push(c);
            requeued += 1;
        }
        if requeued > 0 {
            debug!(parent, requeued, "Children left behind by a moved anchor");
        }
    }

    /// Hand the next queued payload to an idle agent; the agent lands on it
    fn claim(&mut self, agent: &mut Agent, store: &dyn PayloadStore, targets: &[Option<Target>], work: &mut Work) {
        while let Some(i) = work.queue.pop_front() {
            let Some(t) = targets[i] else {
                work.busy[i] = false;
                continue;
            };
            let here = store.at(i).and_then(|p| p.position);
            let anchor = store.at(t.anchor).and_then(|p| p.position.map(|pos| (pos, p.table)));
            let (Some(here), Some((there, anchor_table))) = (here, anchor) else {
                work.busy[i] = false;
                continue;
            };
            agent.position = here;
            agent.heading = (there.y - here.y).atan2(there.x - here.x) + self.rng.gen_range(-0.5..0.5);
            agent.cargo = Some(Cargo {
                payload: i,
                anchor: t.anchor,
                anchor_table,
                strength: t.strength,
                fk_slot: t.fk_slot,
            });
            agent.streak = 0;
            return;
        }
    }

    fn cull_and_breed(&mut self, work: &mut Work) {
        let cfg = self.config;
        let mut survivors = Vec::with_capacity(self.agents.len());
        for agent in std::mem::take(&mut self.agents) {
            if agent.energy > 0.0 {
                survivors.push(agent);
            } else {
                if let Some(cargo) = agent.cargo {
                    work.queue.push_front(cargo.payload);
                }
                self.died += 1;
            }
        }
        self.agents = survivors;

        if cfg.evolution {
            let cap = cfg.agent_count.saturating_mul(2);
            let alive = self.agents.len();
            let mut children = Vec::new();
            for agent in &mut self.agents {
                if agent.energy < cfg.energy.reproduce_threshold || alive + children.len() >= cap {
                    continue;
                }
                agent.energy /= 2.0;
                let sigma = cfg.mutation_sigma * agent.species.profile().mutation_mul;
                let genome = agent.genome.mutated(&mut self.rng, sigma);
                children.push(Agent::new(
                    self.next_agent,
                    agent.position,
                    agent.heading + PI,
                    agent.species,
                    agent.energy,
                    genome,
                ));
                self.next_agent += 1;
            }
            self.born += children.len();
            self.agents.extend(children);
        }

        if !work.queue.is_empty() {
            while self.agents.len() < cfg.energy.min_agents {
                self.spawn_agent();
            }
        }
    }
}

/// Recompute the density grid and lay the per-table signatures
fn refresh_density(store: &dyn PayloadStore, fields: &mut FieldSet) {
    fields.density.fill(0.0);
    for p in store.iter() {
        if let Some(pos) = p.position {
            fields.density.deposit(pos, 1.0);
            if let Some(sig) = fields.signatures.get_mut(p.table.index()) {
                sig.deposit(pos, 0.05);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;
    use crate::core::{Field, ForeignKey, Payload, TableId};

    const ARTIST: TableId = TableId(0);
    const ALBUM: TableId = TableId(1);
    const TRACK: TableId = TableId(2);

    fn artist(id: i64) -> Payload {
        Payload::new(ARTIST, id, vec![Field::new("ArtistId", id), Field::new("Name", "AC/DC")])
    }

    fn album(id: i64, artist_id: i64) -> Payload {
        let mut p = Payload::new(
            ALBUM,
            id,
            vec![Field::new("AlbumId", id), Field::new("ArtistId", artist_id)],
        );
        p.foreign_keys.push(ForeignKey::new("ArtistId", ARTIST, Some(artist_id)));
        p
    }

    fn track(id: i64, album_id: i64) -> Payload {
        let mut p = Payload::new(
            TRACK,
            id,
            vec![Field::new("TrackId", id), Field::new("AlbumId", album_id)],
        );
        p.foreign_keys.push(ForeignKey::new("AlbumId", ALBUM, Some(album_id)));
        p
    }

    fn run(store: &mut MemoryStore, config: &MycoConfig, scope: IngestScope, steps: usize) -> IngestReport {
        let mut fields = FieldSet::new(config.width, config.height, 2, &config.fields);
        Swarm::new(config).run(store, &mut fields, 2, &[], &scope, steps, None)
    }

    fn distance(store: &MemoryStore, a: PayloadKey, b: PayloadKey) -> f32 {
        let pa = store.get(a).and_then(|p| p.position).unwrap();
        let pb = store.get(b).and_then(|p| p.position).unwrap();
        pa.distance(&pb)
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_album_settles_next_to_artist() {
        let mut store = MemoryStore::new();
        store.insert(artist(5));
        store.insert(album(1, 5));
        let config = MycoConfig::new(32, 32).with_seed(7);

        let report = run(&mut store, &config, IngestScope::All, 2000);

        assert_eq!(report.placed, 1);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.unsettled, 0);
        assert!(report.converged);
        let d = distance(&store, PayloadKey::new(ALBUM, 1), PayloadKey::new(ARTIST, 5));
        assert!(d <= config.ingest.deposit_spread + 1e-3);
        assert!(store.get(PayloadKey::new(ALBUM, 1)).unwrap().foreign_keys[0].settled);
    }

    #[test]
    fn test_three_level_chain_ends_next_to_final_parents() {
        for seed in 0..4 {
            let mut store = MemoryStore::new();
            for a in 0..3 {
                store.insert(artist(a));
            }
            for b in 0..9 {
                store.insert(album(b, b % 3));
            }
            for t in 0..27 {
                store.insert(track(t, t % 9));
            }
            let config = MycoConfig::new(64, 64).with_seed(seed);
            let mut fields = FieldSet::new(64, 64, 3, &config.fields);

            let report = Swarm::new(&config).run(&mut store, &mut fields, 3, &[], &IngestScope::All, 8000, None);

            assert!(report.converged, "seed {seed}");
            assert_eq!(report.unsettled, 0, "seed {seed}");
            assert_eq!(report.resolved, 36, "seed {seed}");
            assert_eq!(report.placed, 36, "seed {seed}");
            let reach = config.ingest.deposit_spread + 1e-3;
            for b in 0..9 {
                let d = distance(&store, PayloadKey::new(ALBUM, b), PayloadKey::new(ARTIST, b % 3));
                assert!(d <= reach, "seed {seed}: album {b} is {d} from its artist");
            }
            for t in 0..27 {
                let d = distance(&store, PayloadKey::new(TRACK, t), PayloadKey::new(ALBUM, t % 9));
                assert!(d <= reach, "seed {seed}: track {t} is {d} from its album");
            }
            assert!(report.mean_distance_after.unwrap() <= reach);
        }
    }

    #[test]
    fn test_chain_depth_counts_anchor_hops() {
        let target = |anchor| {
            Some(Target {
                anchor,
                strength: 1.0,
                fk_slot: Some(0),
            })
        };
        let targets = vec![None, target(0), target(1)];
        assert_eq!(chain_depth(0, &targets), 0);
        assert_eq!(chain_depth(1, &targets), 1);
        assert_eq!(chain_depth(2, &targets), 2);

        // A cycle stops instead of looping
        let cyclic = vec![target(1), target(0)];
        assert_eq!(chain_depth(0, &cyclic), 2);
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let mut store = MemoryStore::new();
        store.insert(artist(5));
        store.insert(album(1, 99));
        let config = MycoConfig::new(16, 16);

        let report = run(&mut store, &config, IngestScope::All, 100);

        assert_eq!(report.dangling_count(), 1);
        assert_eq!(report.dangling[0].parent_id, 99);
        assert_eq!(report.placed, 0);
        let orphan = store.get(PayloadKey::new(ALBUM, 1)).unwrap();
        assert!(orphan.dangling);
        assert!(orphan.is_placed());

        let mut schema = Schema::new();
        schema.add_table("Artist");
        schema.add_table("Album");
        let errors = report.dangling_errors(&schema);
        assert!(matches!(&errors[0], MycoError::DanglingForeignKey { table, id: 1, .. } if table == "Album"));
    }

    #[test]
    fn test_mean_distance_shrinks_with_more_steps() {
        let build = || {
            let mut store = MemoryStore::new();
            for a in 0..4 {
                store.insert(artist(a));
            }
            for b in 0..24 {
                store.insert(album(b, b % 4));
            }
            store
        };
        let mut short_total = 0.0;
        let mut long_total = 0.0;
        for seed in 0..3 {
            let config = MycoConfig::new(64, 64).with_seed(seed);
            let mut short = build();
            let mut long = build();
            let r_short = run(&mut short, &config, IngestScope::All, 5);
            let r_long = run(&mut long, &config, IngestScope::All, 600);
            assert_eq!(r_short.mean_distance_before, r_long.mean_distance_before);
            short_total += r_short.mean_distance_after.unwrap();
            long_total += r_long.mean_distance_after.unwrap();
        }
        assert!(long_total < short_total);
    }

    #[test]
    fn test_cancelled_run_leaves_positions_consistent() {
        let mut store = MemoryStore::new();
        store.insert(artist(5));
        store.insert(album(1, 5));
        let config = MycoConfig::new(16, 16);
        let mut fields = FieldSet::new(16, 16, 2, &config.fields);
        let token = CancelToken::new();
        token.cancel();

        let report = Swarm::new(&config).run(&mut store, &mut fields, 2, &[], &IngestScope::All, 500, Some(&token));

        assert!(report.cancelled);
        assert_eq!(report.steps, 0);
        assert_eq!(report.unsettled, 1);
        assert!(store.iter().all(|p| p.is_placed()));
    }

    #[test]
    fn test_same_seed_same_layout() {
        let config = MycoConfig::new(32, 32).with_seed(11);
        let mut a = MemoryStore::new();
        let mut b = MemoryStore::new();
        for store in [&mut a, &mut b] {
            store.insert(artist(1));
            store.insert(album(1, 1));
            store.insert(album(2, 1));
        }
        run(&mut a, &config, IngestScope::All, 300);
        run(&mut b, &config, IngestScope::All, 300);
        let pa: Vec<_> = a.iter().map(|p| p.position).collect();
        let pb: Vec<_> = b.iter().map(|p| p.position).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_subset_run_places_new_payload_near_parent() {
        let mut store = MemoryStore::new();
        store.insert(artist(5));
        store.insert(album(1, 5));
        let config = MycoConfig::new(32, 32).with_seed(3);
        run(&mut store, &config, IngestScope::All, 2000);
        let before = store.get(PayloadKey::new(ALBUM, 1)).and_then(|p| p.position);

        store.insert(album(2, 5));
        let scope = IngestScope::Subset(vec![PayloadKey::new(ALBUM, 2)]);
        let report = run(&mut store, &config, scope, 200);

        assert_eq!(report.placed, 1);
        let d = distance(&store, PayloadKey::new(ALBUM, 2), PayloadKey::new(ARTIST, 5));
        assert!(d <= config.ingest.deposit_spread + 1e-3);
        // Untouched siblings keep their place
        assert_eq!(store.get(PayloadKey::new(ALBUM, 1)).and_then(|p| p.position), before);
    }

    #[test]
    fn test_cluster_hint_pulls_root_payloads_together() {
        let mut store = MemoryStore::new();
        store.insert(artist(1));
        store.insert(artist(2));
        let config = MycoConfig::new(32, 32).with_seed(5);
        let hints = [ClusterHint {
            child: PayloadKey::new(ARTIST, 2),
            anchor: PayloadKey::new(ARTIST, 1),
            strength: 0.5,
        }];
        let mut fields = FieldSet::new(32, 32, 2, &config.fields);

        let report = Swarm::new(&config).run(&mut store, &mut fields, 2, &hints, &IngestScope::All, 2000, None);

        assert_eq!(report.placed, 1);
        assert_eq!(report.resolved, 0);
        let d = distance(&store, PayloadKey::new(ARTIST, 2), PayloadKey::new(ARTIST, 1));
        assert!(d <= config.ingest.deposit_spread + 1e-3);
    }

    #[test]
    fn test_nothing_to_move_converges_immediately() {
        let mut store = MemoryStore::new();
        store.insert(artist(1));
        let config = MycoConfig::new(8, 8);
        let report = run(&mut store, &config, IngestScope::All, 100);
        assert!(report.converged);
        assert_eq!(report.steps, 0);
        assert!(store.iter().all(|p| p.is_placed()));
    }
}
