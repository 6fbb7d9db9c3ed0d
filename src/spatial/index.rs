//! Chunked spatial index for proximity queries
//!
//! The world is partitioned into square chunks of side `chunk_size`. A radius
//! query only visits chunks whose bounds intersect the query circle, then
//! filters candidates by exact squared distance. Square roots are taken only
//! for the distances reported back to the caller.
//!
//! Chunk coordinates are computed in `f64` and stored as `i64`, so chunk
//! assignment is monotonic in position and does not saturate for any
//! position accepted by [`SpatialIndex::accepts`].

use std::ops::ControlFlow;

use ahash::AHashMap;
use derive_more::Display;
use ordered_float::OrderedFloat;

use crate::core::types::{EntityId, Vec2};

/// Integer coordinates of a chunk
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "({}, {})", _0, _1)]
pub struct ChunkCoord(pub i64, pub i64);

impl ChunkCoord {
    #[inline]
    fn chebyshev(&self, other: &ChunkCoord) -> i64 {
        let dx = self.0.abs_diff(other.0);
        let dy = self.1.abs_diff(other.1);
        dx.max(dy).min(i64::MAX as u64) as i64
    }
}

/// Largest chunk index magnitude that `f64` represents exactly
const MAX_CHUNK_INDEX: f64 = (1u64 << 52) as f64;

/// Query centres far outside the indexable range clamp here, leaving room for
/// ring arithmetic without overflow
const CLAMP_CHUNK_INDEX: f64 = (1u64 << 60) as f64;

/// One query result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialHit {
    pub entity: EntityId,
    pub distance: f32,
}

/// Sparse chunk grid mapping positions to entity ids
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    chunk_size: f32,
    chunks: AHashMap<ChunkCoord, Vec<EntityId>>,
    locations: AHashMap<EntityId, (Vec2, ChunkCoord)>,
    /// Bounding box of every chunk ever occupied since the last clear
    extent: Option<(ChunkCoord, ChunkCoord)>,
}

impl SpatialIndex {
    pub fn new(chunk_size: f32) -> Self {
        debug_assert!(chunk_size > 0.0, "chunk_size must be positive");
        Self {
            chunk_size,
            chunks: AHashMap::new(),
            locations: AHashMap::new(),
            extent: None,
        }
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    #[inline]
    pub fn chunk_coord(&self, pos: Vec2) -> ChunkCoord {
        ChunkCoord(self.chunk_index(pos.x), self.chunk_index(pos.y))
    }

    #[inline]
    fn chunk_index(&self, v: f32) -> i64 {
        (v as f64 / self.chunk_size as f64)
            .floor()
            .clamp(-CLAMP_CHUNK_INDEX, CLAMP_CHUNK_INDEX) as i64
    }

    /// Whether `pos` can be indexed exactly: finite, with chunk indices small
    /// enough for exact `f64` arithmetic
    pub fn accepts(&self, pos: Vec2) -> bool {
        let size = self.chunk_size as f64;
        pos.is_finite()
            && (pos.x as f64 / size).abs() < MAX_CHUNK_INDEX
            && (pos.y as f64 / size).abs() < MAX_CHUNK_INDEX
    }

    /// Number of indexed entities
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Number of non-empty chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.locations.contains_key(&entity)
    }

    /// Indexed position; `None` for entities that were removed (stale references)
    pub fn position(&self, entity: EntityId) -> Option<Vec2> {
        self.locations.get(&entity).map(|(pos, _)| *pos)
    }

    pub fn chunk_of(&self, entity: EntityId) -> Option<ChunkCoord> {
        self.locations.get(&entity).map(|(_, coord)| *coord)
    }

    pub fn entities_in_chunk(&self, coord: ChunkCoord) -> &[EntityId] {
        self.chunks.get(&coord).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All indexed positions, in no particular order
    pub fn positions(&self) -> impl Iterator<Item = (EntityId, Vec2)> + '_ {
        self.locations.iter().map(|(e, (pos, _))| (*e, *pos))
    }

    /// Insert or move an entity. The old chunk entry is removed and the new one
    /// added within this call, so no query can observe a half-moved entity.
    ///
    /// Returns the previous chunk, if the entity was already indexed.
    pub fn upsert(&mut self, entity: EntityId, pos: Vec2) -> Option<ChunkCoord> {
        debug_assert!(self.accepts(pos), "position ({}, {}) out of indexable range", pos.x, pos.y);
        let new_coord = self.chunk_coord(pos);
        let previous = self.locations.get(&entity).map(|(_, coord)| *coord);

        match previous {
            Some(old) if old == new_coord => {
                self.locations.insert(entity, (pos, new_coord));
            }
            Some(old) => {
                self.detach_from_chunk(entity, old);
                self.attach_to_chunk(entity, pos, new_coord);
            }
            None => self.attach_to_chunk(entity, pos, new_coord),
        }

        previous
    }

    /// Remove an entity; returns its last indexed position
    pub fn remove(&mut self, entity: EntityId) -> Option<Vec2> {
        let (pos, coord) = self.locations.remove(&entity)?;
        self.detach_from_chunk(entity, coord);
        Some(pos)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.locations.clear();
        self.extent = None;
    }

    /// Rebuild index from positions
    pub fn rebuild(&mut self, entities: impl Iterator<Item = (EntityId, Vec2)>) {
        self.clear();
        for (entity, pos) in entities {
            self.upsert(entity, pos);
        }
    }

    fn attach_to_chunk(&mut self, entity: EntityId, pos: Vec2, coord: ChunkCoord) {
        self.chunks.entry(coord).or_default().push(entity);
        self.locations.insert(entity, (pos, coord));
        self.extent = Some(match self.extent {
            None => (coord, coord),
            Some((min, max)) => (
                ChunkCoord(min.0.min(coord.0), min.1.min(coord.1)),
                ChunkCoord(max.0.max(coord.0), max.1.max(coord.1)),
            ),
        });
    }

    fn detach_from_chunk(&mut self, entity: EntityId, coord: ChunkCoord) {
        if let Some(bucket) = self.chunks.get_mut(&coord) {
            if let Some(slot) = bucket.iter().position(|&e| e == entity) {
                bucket.swap_remove(slot);
            }
            if bucket.is_empty() {
                self.chunks.remove(&coord);
            }
        }
    }

    /// Squared distance from `p` to the closest point of a chunk. Never larger
    /// than the true distance to anything stored in that chunk, so skipping a
    /// chunk on this bound cannot drop a hit.
    #[inline]
    fn chunk_min_dist_sq(&self, coord: ChunkCoord, p: Vec2) -> f64 {
        let size = self.chunk_size as f64;
        let axis = |c: i64, v: f32| {
            let v = v as f64;
            let lo = c as f64 * size;
            let hi = lo + size;
            // Absorbs rounding between `floor(v / size)` and `c * size`
            let slack = (v.abs() + size) * 1e-12;
            (lo - v - slack).max(0.0).max(v - hi - slack)
        };
        let dx = axis(coord.0, p.x);
        let dy = axis(coord.1, p.y);
        dx * dx + dy * dy
    }

    /// Visit every entity within `radius` of `center` (unordered), passing its
    /// squared distance. Only chunks intersecting the circle are inspected.
    fn visit_radius<F>(&self, center: Vec2, radius: f32, mut visit: F)
    where
        F: FnMut(EntityId, f32) -> ControlFlow<()>,
    {
        if !(radius >= 0.0) || !center.is_finite() {
            return;
        }
        let Some((extent_min, extent_max)) = self.extent else {
            return;
        };
        let radius_sq = radius * radius;
        let bound_sq = (radius as f64) * (radius as f64);

        // Window in f64: the subtraction is exact and chunk assignment is
        // monotonic, so every hit's chunk lies inside
        let size = self.chunk_size as f64;
        let window = |v: f32, offset: f64| ((v as f64 + offset) / size).floor() as i64;
        let r = radius as f64;
        let lo = ChunkCoord(window(center.x, -r), window(center.y, -r));
        let hi = ChunkCoord(window(center.x, r), window(center.y, r));
        let lo = ChunkCoord(lo.0.max(extent_min.0), lo.1.max(extent_min.1));
        let hi = ChunkCoord(hi.0.min(extent_max.0), hi.1.min(extent_max.1));
        if lo.0 > hi.0 || lo.1 > hi.1 {
            return;
        }

        let mut scan_bucket = |coord: ChunkCoord, bucket: &[EntityId]| -> ControlFlow<()> {
            if self.chunk_min_dist_sq(coord, center) > bound_sq {
                return ControlFlow::Continue(());
            }
            for &entity in bucket {
                if let Some((pos, _)) = self.locations.get(&entity) {
                    let d = pos.distance_squared(&center);
                    if d <= radius_sq && visit(entity, d).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
            ControlFlow::Continue(())
        };

        let span = (hi.0 - lo.0 + 1).saturating_mul(hi.1 - lo.1 + 1);
        if span > self.chunks.len() as i64 {
            // Sparse world: walking occupied chunks is cheaper than the grid window
            for (coord, bucket) in &self.chunks {
                if coord.0 < lo.0 || coord.0 > hi.0 || coord.1 < lo.1 || coord.1 > hi.1 {
                    continue;
                }
                if scan_bucket(*coord, bucket).is_break() {
                    return;
                }
            }
        } else {
            for cx in lo.0..=hi.0 {
                for cy in lo.1..=hi.1 {
                    let coord = ChunkCoord(cx, cy);
                    if let Some(bucket) = self.chunks.get(&coord) {
                        if scan_bucket(coord, bucket).is_break() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Entities within `radius` of `center` accepted by `filter`, ordered by
    /// ascending distance with ties broken by entity id
    pub fn query_radius(
        &self,
        center: Vec2,
        radius: f32,
        mut filter: impl FnMut(EntityId) -> bool,
    ) -> Vec<SpatialHit> {
        let mut found: Vec<(OrderedFloat<f32>, EntityId)> = Vec::new();
        self.visit_radius(center, radius, |entity, d| {
            if filter(entity) {
                found.push((OrderedFloat(d), entity));
            }
            ControlFlow::Continue(())
        });
        found.sort_unstable();
        found
            .into_iter()
            .map(|(d, entity)| SpatialHit {
                entity,
                distance: d.0.sqrt(),
            })
            .collect()
    }

    /// Whether any accepted entity lies within `radius`; stops at the first match
    pub fn exists(&self, center: Vec2, radius: f32, mut filter: impl FnMut(EntityId) -> bool) -> bool {
        let mut hit = false;
        self.visit_radius(center, radius, |entity, _| {
            if filter(entity) {
                hit = true;
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        hit
    }

    /// Count accepted entities within `radius` without building a result list
    pub fn count(&self, center: Vec2, radius: f32, mut filter: impl FnMut(EntityId) -> bool) -> usize {
        let mut count = 0;
        self.visit_radius(center, radius, |entity, _| {
            if filter(entity) {
                count += 1;
            }
            ControlFlow::Continue(())
        });
        count
    }

    /// Closest accepted entity, optionally limited to `max_radius`.
    ///
    /// Expands chunk rings outward from the centre chunk and stops once the best
    /// candidate is closer than anything an unscanned ring could hold.
    pub fn nearest(
        &self,
        center: Vec2,
        max_radius: Option<f32>,
        mut filter: impl FnMut(EntityId) -> bool,
    ) -> Option<SpatialHit> {
        if !center.is_finite() || max_radius.map_or(false, |r| !(r >= 0.0)) {
            return None;
        }
        let (extent_min, extent_max) = self.extent?;
        let origin = self.chunk_coord(center);
        let max_sq = max_radius.map(|r| r * r);
        let max_bound = max_radius.map(|r| (r as f64) * (r as f64));

        let max_ring = [
            origin.chebyshev(&extent_min),
            origin.chebyshev(&extent_max),
            origin.chebyshev(&ChunkCoord(extent_min.0, extent_max.1)),
            origin.chebyshev(&ChunkCoord(extent_max.0, extent_min.1)),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        let mut best: Option<(OrderedFloat<f32>, EntityId)> = None;
        let mut consider = |entity: EntityId, best: &mut Option<(OrderedFloat<f32>, EntityId)>| {
            let Some((pos, _)) = self.locations.get(&entity) else {
                return;
            };
            let d = OrderedFloat(pos.distance_squared(&center));
            if max_sq.map_or(false, |m| d.0 > m) {
                return;
            }
            let candidate = (d, entity);
            if best.map_or(true, |b| candidate < b) && filter(entity) {
                *best = Some(candidate);
            }
        };

        let mut ring: i64 = 0;
        while ring <= max_ring {
            let cells = if ring == 0 { 1 } else { ring.saturating_mul(8) };
            if cells > self.chunks.len() as i64 {
                // Remaining rings are mostly empty; finish with one pass over occupied chunks
                for (coord, bucket) in &self.chunks {
                    if coord.chebyshev(&origin) < ring {
                        continue;
                    }
                    let bound = self.chunk_min_dist_sq(*coord, center);
                    if best.map_or(false, |b| bound > b.0 .0 as f64) || max_bound.map_or(false, |m| bound > m) {
                        continue;
                    }
                    for &entity in bucket {
                        consider(entity, &mut best);
                    }
                }
                break;
            }

            for coord in ring_coords(origin, ring) {
                if let Some(bucket) = self.chunks.get(&coord) {
                    for &entity in bucket {
                        consider(entity, &mut best);
                    }
                }
            }

            // Distance from the centre to the edge of the square scanned so
            // far, shrunk by the same rounding slack as `chunk_min_dist_sq`
            let size = self.chunk_size as f64;
            let (cx, cy) = (center.x as f64, center.y as f64);
            let left = (origin.0 - ring) as f64 * size;
            let right = (origin.0 + ring + 1) as f64 * size;
            let bottom = (origin.1 - ring) as f64 * size;
            let top = (origin.1 + ring + 1) as f64 * size;
            let slack = (cx.abs().max(cy.abs()) + size) * 1e-12;
            let edge = ((cx - left)
                .min(right - cx)
                .min(cy - bottom)
                .min(top - cy)
                - slack)
                .max(0.0);

            if let Some((d, _)) = best {
                // Strict comparison keeps the id tie-break exact across rings
                if (d.0 as f64) < edge * edge {
                    break;
                }
            }
            if max_bound.map_or(false, |m| edge * edge > m) {
                break;
            }
            ring += 1;
        }

        best.map(|(d, entity)| SpatialHit {
            entity,
            distance: d.0.sqrt(),
        })
    }

    /// Verify every indexed entity sits in the chunk matching its position
    pub fn check_consistency(&self) -> Result<(), String> {
        let mut bucketed = 0;
        for (coord, bucket) in &self.chunks {
            if bucket.is_empty() {
                return Err(format!("empty chunk {} retained", coord));
            }
            bucketed += bucket.len();
            for entity in bucket {
                match self.locations.get(entity) {
                    Some((_, stored)) if stored == coord => {}
                    Some((_, stored)) => {
                        return Err(format!(
                            "{} found in chunk {} but recorded in {}",
                            entity, coord, stored
                        ))
                    }
                    None => return Err(format!("{} in chunk {} has no location", entity, coord)),
                }
            }
        }
        for (entity, (pos, coord)) in &self.locations {
            let expected = self.chunk_coord(*pos);
            if expected != *coord {
                return Err(format!(
                    "{} at ({}, {}) stored under {} instead of {}",
                    entity, pos.x, pos.y, coord, expected
                ));
            }
        }
        if bucketed != self.locations.len() {
            return Err(format!(
                "{} chunk entries for {} indexed entities",
                bucketed,
                self.locations.len()
            ));
        }
        Ok(())
    }
}

/// Chunks at exactly Chebyshev distance `ring` from `origin`
fn ring_coords(origin: ChunkCoord, ring: i64) -> impl Iterator<Item = ChunkCoord> {
    let ChunkCoord(ox, oy) = origin;
    let horizontal = (-ring..=ring).flat_map(move |dx| {
        let top = (ring != 0).then_some((ox + dx, oy + ring));
        std::iter::once((ox + dx, oy - ring)).chain(top)
    });
    let vertical = (-ring + 1..=ring - 1).flat_map(move |dy| [(ox - ring, oy + dy), (ox + ring, oy + dy)]);
    horizontal.chain(vertical).map(|(x, y)| ChunkCoord(x, y))
}
