//! Spatial partitioning for proximity queries

pub mod index;

pub use index::{ChunkCoord, SpatialHit, SpatialIndex};
