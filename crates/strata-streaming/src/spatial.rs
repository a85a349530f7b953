//! Quad/octree spatial partitioning over fixed world bounds.
//!
//! The tree is built eagerly at construction: every leaf gets a placeholder
//! [`SceneChunk`] up front, and entities inserted later never trigger
//! re-partitioning. The index provides no internal synchronization; the
//! streaming engine treats it as read-mostly after the initial build, and
//! callers that keep inserting concurrently with queries must serialize
//! externally.

use serde::{Deserialize, Serialize};

use strata_common::{Aabb, ChunkKey, IndexError, StrataResult, WorldPoint};

use crate::chunk::SceneChunk;

/// Number of world axes the tree subdivides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimensionality {
    /// Quadtree: 4 children per internal node
    Two,
    /// Octree: 8 children per internal node
    Three,
}

impl Dimensionality {
    /// Children per internal node.
    #[must_use]
    pub const fn child_count(self) -> usize {
        match self {
            Self::Two => 4,
            Self::Three => 8,
        }
    }

    /// Number of subdivided axes.
    #[must_use]
    pub const fn axes(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

/// Statistics about a spatial index, for debug overlays.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    /// Total number of nodes in the tree.
    pub node_count: usize,
    /// Number of leaf nodes (== number of chunks).
    pub leaf_count: usize,
    /// Total entities stored across all leaves.
    pub entity_count: usize,
    /// Depth of the deepest leaf.
    pub max_depth: usize,
}

/// A tree node: either a leaf holding one chunk, or an internal node holding
/// 4 (2D) or 8 (3D) children partitioning its bounds at the midpoint.
#[derive(Debug)]
struct Node<E> {
    bounds: Aabb,
    children: Vec<Node<E>>,
    chunk: Option<SceneChunk<E>>,
}

impl<E> Node<E> {
    fn is_leaf(&self) -> bool {
        self.chunk.is_some()
    }
}

/// Octree/quadtree over fixed world bounds with a pre-created chunk at every
/// leaf.
#[derive(Debug)]
pub struct SpatialIndex<E> {
    root: Node<E>,
    dimensionality: Dimensionality,
}

impl<E> SpatialIndex<E> {
    /// Builds the full tree eagerly.
    ///
    /// A node is a leaf iff its depth reached `max_depth` or its smallest
    /// axis extent is `<= min_size`. Every point in `bounds` maps to exactly
    /// one leaf. Malformed parameters are rejected here rather than
    /// surfacing later as query errors.
    pub fn build(
        bounds: Aabb,
        max_depth: usize,
        min_size: f32,
        dimensionality: Dimensionality,
    ) -> StrataResult<Self> {
        if !(min_size > 0.0 && min_size.is_finite()) {
            return Err(IndexError::InvalidMinSize(min_size).into());
        }
        // Re-validate corners: `bounds` may have been built from raw fields.
        let bounds = Aabb::new(bounds.min, bounds.max)?;

        let root = Self::build_node(bounds, 0, max_depth, min_size, dimensionality, (0, 0, 0));
        Ok(Self {
            root,
            dimensionality,
        })
    }

    fn build_node(
        bounds: Aabb,
        depth: usize,
        max_depth: usize,
        min_size: f32,
        dims: Dimensionality,
        grid: (i32, i32, i32),
    ) -> Node<E> {
        let axes = dims.axes();
        if depth >= max_depth || bounds.min_extent(axes) <= min_size {
            // Leaf keys are the leaf-grid coordinates accumulated on the way
            // down; uniform subdivision keeps them collision-free.
            let key = ChunkKey::new(grid.0, grid.1, grid.2);
            return Node {
                bounds,
                children: Vec::new(),
                chunk: Some(SceneChunk::new(key, bounds)),
            };
        }

        let children = (0..dims.child_count())
            .map(|i| {
                let child_grid = (
                    grid.0 * 2 + (i & 1) as i32,
                    grid.1 * 2 + ((i >> 1) & 1) as i32,
                    if axes > 2 {
                        grid.2 * 2 + ((i >> 2) & 1) as i32
                    } else {
                        0
                    },
                );
                Self::build_node(
                    bounds.child_bounds(i, axes),
                    depth + 1,
                    max_depth,
                    min_size,
                    dims,
                    child_grid,
                )
            })
            .collect();

        Node {
            bounds,
            children,
            chunk: None,
        }
    }

    /// Returns the dimensionality the tree was built with.
    #[must_use]
    pub const fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    /// Returns the root bounds.
    #[must_use]
    pub const fn bounds(&self) -> &Aabb {
        &self.root.bounds
    }

    /// Inserts an entity into the leaf chunk containing `position`.
    ///
    /// Positions outside the root bounds are silently ignored; callers that
    /// care must pre-validate. Boundaries between siblings are inclusive on
    /// the lower edge and exclusive on the upper, except the root's outer
    /// boundary which is inclusive.
    pub fn insert_entity(&mut self, entity: E, position: WorldPoint) {
        if !self.root.bounds.contains_point_closed(position) {
            return;
        }
        let axes = self.dimensionality.axes();
        let mut node = &mut self.root;
        while !node.is_leaf() {
            let idx = child_index(&node.bounds, position, axes);
            node = &mut node.children[idx];
        }
        if let Some(chunk) = node.chunk.as_mut() {
            chunk.push_entity(entity);
        }
    }

    /// Returns the leaf chunk containing `position`, if inside the root.
    #[must_use]
    pub fn chunk_at(&self, position: WorldPoint) -> Option<&SceneChunk<E>> {
        if !self.root.bounds.contains_point_closed(position) {
            return None;
        }
        let axes = self.dimensionality.axes();
        let mut node = &self.root;
        while !node.is_leaf() {
            let idx = child_index(&node.bounds, position, axes);
            node = &node.children[idx];
        }
        node.chunk.as_ref()
    }

    /// Returns every leaf chunk whose bounds overlap `region`.
    ///
    /// Descends only into children overlapping the region, so cost tracks
    /// chunks touched rather than total leaves.
    #[must_use]
    pub fn query_chunks(&self, region: &Aabb) -> Vec<&SceneChunk<E>> {
        let mut result = Vec::new();
        Self::query_into(&self.root, region, &mut result);
        result
    }

    fn query_into<'a>(node: &'a Node<E>, region: &Aabb, result: &mut Vec<&'a SceneChunk<E>>) {
        if !node.bounds.intersects(region) {
            return;
        }
        if let Some(chunk) = node.chunk.as_ref() {
            result.push(chunk);
            return;
        }
        for child in &node.children {
            Self::query_into(child, region, result);
        }
    }

    /// Returns every leaf chunk within a cubic region of half-width
    /// `max_distance` centered on `viewer_position`.
    #[must_use]
    pub fn get_visible_chunks(
        &self,
        viewer_position: WorldPoint,
        max_distance: f32,
    ) -> Vec<&SceneChunk<E>> {
        let Ok(region) = Aabb::around(viewer_position, max_distance) else {
            return Vec::new();
        };
        self.query_chunks(&region)
    }

    /// Returns at most `max_chunks` visible chunks, sorted by non-decreasing
    /// distance from chunk center to `viewer_position`.
    ///
    /// Ties preserve the deterministic traversal order of
    /// [`Self::query_chunks`].
    #[must_use]
    pub fn get_priority_chunks(
        &self,
        viewer_position: WorldPoint,
        max_distance: f32,
        max_chunks: usize,
    ) -> Vec<&SceneChunk<E>> {
        let mut chunks = self.get_visible_chunks(viewer_position, max_distance);
        chunks.sort_by(|a, b| {
            let da = a.bounds.center().distance_squared(viewer_position);
            let db = b.bounds.center().distance_squared(viewer_position);
            da.total_cmp(&db)
        });
        chunks.truncate(max_chunks);
        chunks
    }

    /// Number of leaves (== number of chunks).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.stats().leaf_count
    }

    /// Returns statistics about the tree.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        Self::collect_stats(&self.root, 0, &mut stats);
        stats
    }

    fn collect_stats(node: &Node<E>, depth: usize, stats: &mut IndexStats) {
        stats.node_count += 1;
        stats.max_depth = stats.max_depth.max(depth);
        if let Some(chunk) = node.chunk.as_ref() {
            stats.leaf_count += 1;
            stats.entity_count += chunk.entity_count();
            return;
        }
        for child in &node.children {
            Self::collect_stats(child, depth + 1, stats);
        }
    }
}

/// Selects the child octant/quadrant for a point: the midpoint itself lands
/// in the upper half, which makes sibling boundaries lower-inclusive and
/// upper-exclusive.
fn child_index(bounds: &Aabb, p: WorldPoint, axes: usize) -> usize {
    let c = bounds.center();
    let mut idx = usize::from(p.x >= c.x);
    idx |= usize::from(p.y >= c.y) << 1;
    if axes > 2 {
        idx |= usize::from(p.z >= c.z) << 2;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_common::StrataError;

    fn cube(size: f32) -> Aabb {
        Aabb::new(WorldPoint::ZERO, WorldPoint::new(size, size, size)).expect("valid bounds")
    }

    fn build_3d(max_depth: usize, min_size: f32) -> SpatialIndex<u32> {
        SpatialIndex::build(cube(100.0), max_depth, min_size, Dimensionality::Three)
            .expect("valid index")
    }

    #[test]
    fn test_build_validates_min_size() {
        let err = SpatialIndex::<u32>::build(cube(100.0), 2, 0.0, Dimensionality::Three);
        assert!(matches!(
            err,
            Err(StrataError::Index(IndexError::InvalidMinSize(_)))
        ));
    }

    #[test]
    fn test_depth_zero_is_single_leaf() {
        let index = build_3d(0, 10.0);
        let stats = index.stats();
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.node_count, 1);
    }

    #[test]
    fn test_leaf_counts() {
        // depth 2, min_size small enough not to stop subdivision early
        let index = build_3d(2, 10.0);
        assert_eq!(index.leaf_count(), 64); // 8^2
        let index2d: SpatialIndex<u32> =
            SpatialIndex::build(cube(100.0), 2, 10.0, Dimensionality::Two).expect("valid index");
        assert_eq!(index2d.leaf_count(), 16); // 4^2
    }

    #[test]
    fn test_min_size_stops_subdivision() {
        // 100 -> 50 -> 25: extent 25 <= 30 stops at depth 2 despite max_depth 5
        let index = build_3d(5, 30.0);
        assert_eq!(index.stats().max_depth, 2);
    }

    #[test]
    fn test_leaf_keys_unique() {
        let index = build_3d(2, 10.0);
        let all = index.query_chunks(index.bounds());
        let mut keys: Vec<_> = all.iter().map(|c| c.key).collect();
        keys.sort_by_key(|k| (k.x, k.y, k.z));
        keys.dedup();
        assert_eq!(keys.len(), 64);
    }

    #[test]
    fn test_insert_and_query_scenario() {
        // Concrete scenario: bounds (0..100)^3, depth 2, min_size 10, entity
        // at (50,50,50), query (40..60)^3 must include the entity.
        let mut index = build_3d(2, 10.0);
        index.insert_entity(42, WorldPoint::new(50.0, 50.0, 50.0));

        let region = Aabb::new(
            WorldPoint::new(40.0, 40.0, 40.0),
            WorldPoint::new(60.0, 60.0, 60.0),
        )
        .expect("valid bounds");
        let chunks = index.query_chunks(&region);
        let total: usize = chunks.iter().map(|c| c.entity_count()).sum();
        assert_eq!(total, 1);
        assert!(chunks.iter().any(|c| c.entities.contains(&42)));
    }

    #[test]
    fn test_insert_outside_bounds_is_noop() {
        let mut index = build_3d(2, 10.0);
        index.insert_entity(1, WorldPoint::new(-5.0, 50.0, 50.0));
        index.insert_entity(2, WorldPoint::new(50.0, 101.0, 50.0));
        assert_eq!(index.stats().entity_count, 0);
    }

    #[test]
    fn test_root_upper_boundary_inclusive() {
        let mut index = build_3d(2, 10.0);
        index.insert_entity(9, WorldPoint::new(100.0, 100.0, 100.0));
        assert_eq!(index.stats().entity_count, 1);
        let leaf = index
            .chunk_at(WorldPoint::new(100.0, 100.0, 100.0))
            .expect("leaf at boundary");
        assert!(leaf.entities.contains(&9));
    }

    #[test]
    fn test_sibling_boundary_lower_inclusive() {
        let index = build_3d(1, 10.0);
        // 50 is the midpoint: the point belongs to the upper-half leaf,
        // whose lower edge includes it.
        let leaf = index
            .chunk_at(WorldPoint::new(50.0, 0.0, 0.0))
            .expect("leaf at midpoint");
        assert!((leaf.bounds.min.x - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_query_full_bounds_returns_all_leaves() {
        let index = build_3d(2, 10.0);
        assert_eq!(index.query_chunks(index.bounds()).len(), 64);
    }

    #[test]
    fn test_query_prunes() {
        let index = build_3d(2, 10.0);
        // A region inside one corner leaf (leaves are 25 wide)
        let region = Aabb::new(WorldPoint::new(1.0, 1.0, 1.0), WorldPoint::new(2.0, 2.0, 2.0))
            .expect("valid bounds");
        assert_eq!(index.query_chunks(&region).len(), 1);
    }

    #[test]
    fn test_visible_chunks_region() {
        let index = build_3d(2, 10.0);
        let visible = index.get_visible_chunks(WorldPoint::new(6.0, 6.0, 6.0), 5.0);
        // Region (1..11)^3 stays inside the corner leaf (leaves are 25 wide)
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn test_priority_chunks_sorted_and_truncated() {
        let index = build_3d(2, 10.0);
        let viewer = WorldPoint::new(10.0, 10.0, 10.0);
        let chunks = index.get_priority_chunks(viewer, 200.0, 5);
        assert_eq!(chunks.len(), 5);
        let distances: Vec<f32> = chunks
            .iter()
            .map(|c| c.bounds.center().distance(viewer))
            .collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_priority_chunks_never_exceeds_limit() {
        let index = build_3d(2, 10.0);
        assert!(index
            .get_priority_chunks(WorldPoint::new(50.0, 50.0, 50.0), 500.0, 3)
            .len()
            .le(&3));
        assert_eq!(
            index
                .get_priority_chunks(WorldPoint::new(50.0, 50.0, 50.0), 500.0, 1000)
                .len(),
            64
        );
    }

    proptest! {
        #[test]
        fn prop_point_resolves_to_exactly_one_leaf(
            x in 0.0f32..100.0,
            y in 0.0f32..100.0,
            z in 0.0f32..100.0,
        ) {
            let index = build_3d(3, 5.0);
            let p = WorldPoint::new(x, y, z);

            let leaf = index.chunk_at(p).expect("point inside root resolves");
            prop_assert!(leaf.bounds.contains_point_closed(p));

            // Half-open sibling boundaries mean no other leaf claims it.
            let claiming = index
                .query_chunks(index.bounds())
                .into_iter()
                .filter(|c| c.bounds.contains_point(p))
                .count();
            prop_assert!(claiming <= 1);
            if claiming == 1 {
                let owner = index
                    .query_chunks(index.bounds())
                    .into_iter()
                    .find(|c| c.bounds.contains_point(p))
                    .expect("counted above");
                prop_assert_eq!(owner.key, leaf.key);
            }
        }

        #[test]
        fn prop_query_is_set_of_overlapping_leaves(
            cx in 5.0f32..95.0,
            half in 1.0f32..40.0,
        ) {
            let index = build_3d(2, 10.0);
            let region = Aabb::around(WorldPoint::new(cx, cx, cx), half)
                .expect("valid region");

            let queried: Vec<_> = index.query_chunks(&region).iter().map(|c| c.key).collect();
            let brute: Vec<_> = index
                .query_chunks(index.bounds())
                .into_iter()
                .filter(|c| c.bounds.intersects(&region))
                .map(|c| c.key)
                .collect();

            let mut a = queried.clone();
            let mut b = brute.clone();
            a.sort_by_key(|k| (k.x, k.y, k.z));
            b.sort_by_key(|k| (k.x, k.y, k.z));
            prop_assert_eq!(a, b);
        }
    }
}
