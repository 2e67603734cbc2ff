//! # Grid Index
//!
//! Uniform bucket grid over the coordinate space. A region query walks only
//! the buckets whose rectangle intersects the query circle, then filters by
//! exact Euclidean distance.
//!
//! Buckets are a flat arena indexed by `row * cols + col`.

use std::collections::HashMap;

use crate::core::{Payload, PayloadKey, Position};
use crate::ports::SpatialLookup;

/// Bucketed spatial index
#[derive(Debug, Clone)]
pub struct GridIndex {
    /// Edge length of one bucket
    bucket_size: f32,

    /// Bucket columns
    cols: usize,

    /// Bucket rows
    rows: usize,

    /// Entries per bucket
    buckets: Vec<Vec<(PayloadKey, Position)>>,

    /// Key -> bucket holding it
    locations: HashMap<PayloadKey, usize>,
}

impl GridIndex {
    /// Index covering a `width x height` space
    pub fn new(width: usize, height: usize, bucket_size: f32) -> Self {
        let bucket_size = if bucket_size > 0.0 { bucket_size } else { 1.0 };
        let cols = ((width.max(1) as f32) / bucket_size).ceil().max(1.0) as usize;
        let rows = ((height.max(1) as f32) / bucket_size).ceil().max(1.0) as usize;
        Self {
            bucket_size,
            cols,
            rows,
            buckets: vec![Vec::new(); cols * rows],
            locations: HashMap::new(),
        }
    }

    pub fn bucket_size(&self) -> f32 {
        self.bucket_size
    }

    /// Number of buckets a region query would visit
    pub fn buckets_visited(&self, center: Position, radius: f32) -> usize {
        if radius < 0.0 {
            return 0;
        }
        let (c0, c1, r0, r1) = self.bucket_span(center, radius);
        (c0..=c1)
            .flat_map(|c| (r0..=r1).map(move |r| (c, r)))
            .filter(|&(c, r)| self.bucket_intersects(c, r, center, radius))
            .count()
    }

    fn clamp_col(&self, x: f32) -> usize {
        ((x / self.bucket_size).floor().max(0.0) as usize).min(self.cols - 1)
    }

    fn clamp_row(&self, y: f32) -> usize {
        ((y / self.bucket_size).floor().max(0.0) as usize).min(self.rows - 1)
    }

    fn bucket_of(&self, position: Position) -> usize {
        self.clamp_row(position.y) * self.cols + self.clamp_col(position.x)
    }

    fn bucket_span(&self, center: Position, radius: f32) -> (usize, usize, usize, usize) {
        (
            self.clamp_col(center.x - radius),
            self.clamp_col(center.x + radius),
            self.clamp_row(center.y - radius),
            self.clamp_row(center.y + radius),
        )
    }

    /// Does the circle touch bucket (col, row)? Edge buckets extend to
    /// infinity because out-of-range positions are clamped into them.
    fn bucket_intersects(&self, col: usize, row: usize, center: Position, radius: f32) -> bool {
        let mut x0 = col as f32 * self.bucket_size;
        let mut x1 = x0 + self.bucket_size;
        let mut y0 = row as f32 * self.bucket_size;
        let mut y1 = y0 + self.bucket_size;
        if col == 0 {
            x0 = f32::NEG_INFINITY;
        }
        if col + 1 == self.cols {
            x1 = f32::INFINITY;
        }
        if row == 0 {
            y0 = f32::NEG_INFINITY;
        }
        if row + 1 == self.rows {
            y1 = f32::INFINITY;
        }
        let nx = center.x.clamp(x0, x1);
        let ny = center.y.clamp(y0, y1);
        let dx = center.x - nx;
        let dy = center.y - ny;
        dx * dx + dy * dy <= radius * radius
    }
}

impl SpatialLookup for GridIndex {
    fn insert(&mut self, key: PayloadKey, position: Position) {
        self.remove(key);
        let bucket = self.bucket_of(position);
        self.buckets[bucket].push((key, position));
        self.locations.insert(key, bucket);
    }

    fn remove(&mut self, key: PayloadKey) -> bool {
        match self.locations.remove(&key) {
            Some(bucket) => {
                self.buckets[bucket].retain(|(k, _)| *k != key);
                true
            }
            None => false,
        }
    }

    fn query_region(&self, center: Position, radius: f32) -> Vec<PayloadKey> {
        if radius < 0.0 || self.locations.is_empty() {
            return Vec::new();
        }
        let (c0, c1, r0, r1) = self.bucket_span(center, radius);
        let mut out = Vec::new();
        for row in r0..=r1 {
            for col in c0..=c1 {
                if !self.bucket_intersects(col, row, center, radius) {
                    continue;
                }
                for (key, pos) in &self.buckets[row * self.cols + col] {
                    if pos.distance(&center) <= radius {
                        out.push(*key);
                    }
                }
            }
        }
        out.sort();
        out
    }

    fn query_all(&self) -> Vec<PayloadKey> {
        let mut out: Vec<PayloadKey> = self.locations.keys().copied().collect();
        out.sort();
        out
    }

    fn rebuild(&mut self, payloads: &mut dyn Iterator<Item = &Payload>) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.locations.clear();
        for payload in payloads {
            if let Some(position) = payload.position {
                let bucket = self.bucket_of(position);
                self.buckets[bucket].push((payload.key(), position));
                self.locations.insert(payload.key(), bucket);
            }
        }
    }

    fn len(&self) -> usize {
        self.locations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TableId;

    fn key(id: i64) -> PayloadKey {
        PayloadKey::new(TableId(0), id)
    }

    #[test]
    fn test_grid_insert_and_region_query() {
        let mut index = GridIndex::new(32, 32, 4.0);
        index.insert(key(1), Position::new(10.0, 10.0));
        index.insert(key(2), Position::new(12.0, 10.0));
        index.insert(key(3), Position::new(30.0, 30.0));

        let hits = index.query_region(Position::new(10.0, 10.0), 2.5);
        assert_eq!(hits, vec![key(1), key(2)]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_grid_exact_distance_filter() {
        let mut index = GridIndex::new(32, 32, 8.0);
        // Same bucket, but outside the circle
        index.insert(key(1), Position::new(1.0, 1.0));
        index.insert(key(2), Position::new(7.0, 7.0));

        let hits = index.query_region(Position::new(1.0, 1.0), 3.0);
        assert_eq!(hits, vec![key(1)]);
    }

    #[test]
    fn test_grid_update_moves_entry() {
        let mut index = GridIndex::new(32, 32, 4.0);
        index.insert(key(1), Position::new(1.0, 1.0));
        index.update(key(1), Position::new(20.0, 20.0));

        assert!(index.query_region(Position::new(1.0, 1.0), 2.0).is_empty());
        assert_eq!(index.query_region(Position::new(20.0, 20.0), 0.5), vec![key(1)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_grid_remove_and_query_all() {
        let mut index = GridIndex::new(16, 16, 4.0);
        index.insert(key(2), Position::new(1.0, 1.0));
        index.insert(key(1), Position::new(9.0, 9.0));

        assert_eq!(index.query_all(), vec![key(1), key(2)]);
        assert!(index.remove(key(2)));
        assert!(!index.remove(key(2)));
        assert_eq!(index.query_all(), vec![key(1)]);
    }

    #[test]
    fn test_grid_visits_only_intersecting_buckets() {
        let index = GridIndex::new(64, 64, 4.0);
        let small = index.buckets_visited(Position::new(32.0, 32.0), 1.0);
        let large = index.buckets_visited(Position::new(32.0, 32.0), 20.0);
        assert!(small <= 4);
        assert!(large > small);
        assert!(large < 16 * 16);
    }

    #[test]
    fn test_grid_rebuild_skips_unplaced() {
        let mut placed = Payload::new(TableId(0), 1, Vec::new());
        placed.position = Some(Position::new(3.0, 3.0));
        let unplaced = Payload::new(TableId(0), 2, Vec::new());

        let mut index = GridIndex::new(16, 16, 4.0);
        index.insert(key(9), Position::new(1.0, 1.0));
        let payloads = vec![placed, unplaced];
        index.rebuild(&mut payloads.iter());

        assert_eq!(index.query_all(), vec![key(1)]);
    }

    #[test]
    fn test_grid_negative_radius_is_empty() {
        let mut index = GridIndex::new(16, 16, 4.0);
        index.insert(key(1), Position::new(3.0, 3.0));
        assert!(index.query_region(Position::new(3.0, 3.0), -1.0).is_empty());
        assert_eq!(index.query_region(Position::new(3.0, 3.0), 0.0), vec![key(1)]);
    }
}
