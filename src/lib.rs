//! Navigation-mesh generation for 3D worlds.
//!
//! Takes in static world geometry as a triangle mesh and produces a convex
//! polygon mesh suitable for pathfinding, via a voxelization pipeline:
//!
//! 1. Rasterize triangles into a solid heightfield and classify spans by
//!    slope and clearance.
//! 2. Derive the open heightfield: traversable air columns with a 4-way
//!    neighbour graph.
//! 3. Compute each span's distance to the nearest obstruction border.
//! 4. Partition spans into regions by flooding the distance field from its
//!    peaks (watershed).
//! 5. Trace and simplify region contours.
//! 6. Triangulate contours and merge triangles into convex polygons with
//!    adjacency information.
//!
//! The coordinate convention is X width, Y depth, Z up. The input mesh is a
//! flat vertex/index pair with triangles wound clockwise when seen from
//! above (+Z face normals); no coordinate conversion is performed.
//!
//! ## Quick-start:
//! ```
//! use glam::Vec3;
//! use voxel_navmesh::{build_navmesh, NavMeshSettings};
//!
//! let vertices = [
//!     Vec3::new(0.0, 0.0, 0.0),
//!     Vec3::new(0.0, 4.0, 0.0),
//!     Vec3::new(4.0, 4.0, 0.0),
//!     Vec3::new(4.0, 0.0, 0.0),
//! ];
//! let indices = [0, 1, 3, 1, 2, 3];
//!
//! let settings = NavMeshSettings {
//!     cell_size: 1.0,
//!     cell_height: 1.0,
//!     ..NavMeshSettings::default()
//! };
//!
//! let mesh = build_navmesh(
//!     &vertices,
//!     &indices,
//!     Vec3::new(2.0, 2.0, 0.0),
//!     Vec3::new(3.0, 3.0, 2.0),
//!     &settings,
//! )
//! .expect("valid build input");
//!
//! for polygon in &mesh.polygons {
//!     let _ = (&polygon.indices, polygon.centroid, &polygon.adjacent);
//! }
//! ```

use glam::Vec3;
use thiserror::Error;

mod contour;
mod heightfields;
mod math;
mod mesher;
mod regions;

pub use contour::{build_contours, Contour, ContourSet, ContourVertex};
pub use heightfields::{
    build_open_heightfield, build_solid_heightfield, calculate_distance_field, HeightSpan,
    OpenHeightfield, OpenSpan, SolidHeightfield, SpanAttribute,
};
pub use mesher::{build_poly_mesh, PolyMesh, Polygon};
pub use regions::build_regions;

/// Region ID reserved for "no navmesh here": obstructed space or space
/// outside the build bounds.
pub const NULL_REGION: u16 = 0;

/// Sentinel distance assigned to spans before the distance field has
/// settled. No span carries it once [calculate_distance_field] returns.
pub const REGION_MAX_BORDER: u16 = 10_000;

/*
*   Neighbours:
*   0: (-1, 0),
*   1: (0, -1),
*   2: (1, 0),
*   3: (0, 1)
*/

/// An axis direction on the XY grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    XNegative = 0,
    YNegative = 1,
    XPositive = 2,
    YPositive = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::XNegative,
        Direction::YNegative,
        Direction::XPositive,
        Direction::YPositive,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        match index & 0x3 {
            0 => Direction::XNegative,
            1 => Direction::YNegative,
            2 => Direction::XPositive,
            _ => Direction::YPositive,
        }
    }

    #[inline]
    pub fn rotate_clockwise(self) -> Self {
        Direction::from_index(self.index() + 1)
    }

    #[inline]
    pub fn rotate_counter_clockwise(self) -> Self {
        Direction::from_index(self.index() + 3)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        Direction::from_index(self.index() + 2)
    }

    #[inline]
    pub fn offset_width(self) -> i32 {
        match self {
            Direction::XNegative => -1,
            Direction::XPositive => 1,
            _ => 0,
        }
    }

    #[inline]
    pub fn offset_depth(self) -> i32 {
        match self {
            Direction::YNegative => -1,
            Direction::YPositive => 1,
            _ => 0,
        }
    }
}

/// Grid index of the neighbouring cell. Only valid where a neighbour link
/// exists; does not bounds check.
#[inline]
pub(crate) fn neighbour_index(width: usize, index: usize, dir: Direction) -> usize {
    match dir {
        Direction::XNegative => index - 1,
        Direction::YNegative => index - width,
        Direction::XPositive => index + 1,
        Direction::YPositive => index + width,
    }
}

/// Bounds-checked grid index of the neighbouring cell.
#[inline]
pub(crate) fn checked_neighbour_index(
    width: usize,
    depth: usize,
    index: usize,
    dir: Direction,
) -> Option<usize> {
    let width_index = index % width;
    let depth_index = index / width;

    match dir {
        Direction::XNegative if width_index > 0 => Some(index - 1),
        Direction::YNegative if depth_index > 0 => Some(index - width),
        Direction::XPositive if width_index < width - 1 => Some(index + 1),
        Direction::YPositive if depth_index < depth - 1 => Some(index + width),
        _ => None,
    }
}

/// Settings for nav-mesh generation.
#[derive(Clone, Debug)]
pub struct NavMeshSettings {
    /// The horizontal (XY) resolution of the voxel grid in world units.
    /// Cells are always square.
    ///
    /// Smaller values increase generation time with diminishing returns in
    /// nav-mesh detail.
    pub cell_size: f32,
    /// The vertical (Z) resolution of the voxel grid in world units.
    pub cell_height: f32,

    /// Maximum incline traversable when navigating, in degrees. Faces at
    /// exactly this angle are still walkable.
    pub max_traversable_angle: f32,
    /// Minimum open height for a column of air to be traversable, in world
    /// units.
    ///
    /// **Suggested value**: the agent height, rounded up.
    pub min_traversable_height: f32,
    /// Maximum floor height difference that is still considered traversable,
    /// in world units. This smooths out stair steps and small ledges.
    pub max_traversable_step: f32,

    /// Distances at or below this value are exempt from the distance-field
    /// blur. `0` disables smoothing entirely.
    pub smoothing_threshold: u16,
    /// Pulls the nav-mesh back from obstructions by this many cells, so a
    /// character with that radius does not clip into walls.
    pub traversable_area_border_size: u16,
    /// Island regions (bordering nothing but the null region) smaller than
    /// this span count are removed. Treated as at least 1.
    pub min_unconnected_region_size: u32,
    /// Regions up to this span count are merged into a neighbouring region
    /// when they share exactly one edge with it.
    pub min_merge_region_size: u32,
    /// Only grow a region into a span when the neighbour has at least two
    /// more neighbours in its own region. Prevents single-voxel filaments at
    /// the cost of extra processing.
    pub use_conservative_expansion: bool,

    /// Maximum distance a simplified contour may deviate from the raw
    /// region border, in world units. Keep close to `cell_size`.
    pub edge_max_deviation: f32,
    /// Border edges longer than this are subdivided, in world units.
    /// Treated as at least `cell_size`.
    pub max_edge_length: f32,

    /// Maximum number of vertices per polygon produced by convex merging.
    /// Treated as at least 3.
    pub max_vertices_per_polygon: u32,

    /// When false, generation stops once the open heightfield is built and
    /// the result is empty. Useful together with the public stage functions
    /// when only the traversable-space analysis is wanted.
    pub perform_full_generation: bool,
    /// Mark walkable spans bordering a drop deeper than
    /// `max_traversable_step` as unwalkable.
    ///
    /// Off by default: the filter is known to over-reject spans on
    /// legitimate ledges.
    pub filter_ledge_spans: bool,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 30.0,
            cell_height: 30.0,
            max_traversable_angle: 45.0,
            min_traversable_height: 100.0,
            max_traversable_step: 50.0,
            smoothing_threshold: 2,
            traversable_area_border_size: 1,
            min_unconnected_region_size: 4,
            min_merge_region_size: 20,
            use_conservative_expansion: true,
            edge_max_deviation: 50.0,
            max_edge_length: 50.0,
            max_vertices_per_polygon: 6,
            perform_full_generation: true,
            filter_ledge_spans: false,
        }
    }
}

impl NavMeshSettings {
    /// Setter for [`NavMeshSettings::cell_size`] & [`NavMeshSettings::cell_height`]
    pub fn with_cell_dimensions(mut self, cell_size: f32, cell_height: f32) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;

        self
    }

    /// Setter for [`NavMeshSettings::max_traversable_angle`]
    pub fn with_traversable_angle(mut self, max_traversable_angle: f32) -> Self {
        self.max_traversable_angle = max_traversable_angle;

        self
    }

    /// Setter for [`NavMeshSettings::min_traversable_height`] & [`NavMeshSettings::max_traversable_step`]
    pub fn with_agent_clearance(
        mut self,
        min_traversable_height: f32,
        max_traversable_step: f32,
    ) -> Self {
        self.min_traversable_height = min_traversable_height;
        self.max_traversable_step = max_traversable_step;

        self
    }

    /// Setter for [`NavMeshSettings::min_unconnected_region_size`] & [`NavMeshSettings::min_merge_region_size`]
    pub fn with_region_sizes(
        mut self,
        min_unconnected_region_size: u32,
        min_merge_region_size: u32,
    ) -> Self {
        self.min_unconnected_region_size = min_unconnected_region_size;
        self.min_merge_region_size = min_merge_region_size;

        self
    }

    /// Setter for [`NavMeshSettings::edge_max_deviation`] & [`NavMeshSettings::max_edge_length`]
    pub fn with_contour_limits(mut self, edge_max_deviation: f32, max_edge_length: f32) -> Self {
        self.edge_max_deviation = edge_max_deviation;
        self.max_edge_length = max_edge_length;

        self
    }

    /// Setter for [`NavMeshSettings::max_vertices_per_polygon`]
    pub fn with_max_vertices_per_polygon(mut self, max_vertices_per_polygon: u32) -> Self {
        self.max_vertices_per_polygon = max_vertices_per_polygon;

        self
    }

    #[inline]
    pub fn clamped_min_unconnected_region_size(&self) -> u32 {
        self.min_unconnected_region_size.max(1)
    }

    #[inline]
    pub fn clamped_max_edge_length(&self) -> f32 {
        self.max_edge_length.max(self.cell_size)
    }

    #[inline]
    pub fn clamped_max_vertices_per_polygon(&self) -> usize {
        self.max_vertices_per_polygon.max(3) as usize
    }

    /// Cosine threshold a face normal's Z component must reach to count as
    /// walkable. The slack keeps faces at exactly the limit angle walkable
    /// despite rounding in the normal computation.
    #[inline]
    pub(crate) fn walkable_normal_z(&self) -> f32 {
        self.max_traversable_angle.to_radians().cos() - 1.0e-5
    }

    /// Checks hard parameter constraints. Clamped parameters are adjusted
    /// silently instead.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !(self.cell_size > 0.0) {
            return Err(BuildError::InvalidParameter("cell_size must be positive"));
        }
        if !(self.cell_height > 0.0) {
            return Err(BuildError::InvalidParameter("cell_height must be positive"));
        }
        if !(self.min_traversable_height > 0.0) {
            return Err(BuildError::InvalidParameter(
                "min_traversable_height must be positive",
            ));
        }
        if !(self.max_traversable_step >= 0.0) {
            return Err(BuildError::InvalidParameter(
                "max_traversable_step may not be negative",
            ));
        }
        if !(self.max_traversable_angle >= 0.0 && self.max_traversable_angle <= 90.0) {
            return Err(BuildError::InvalidParameter(
                "max_traversable_angle must lie in [0, 90] degrees",
            ));
        }
        if !(self.edge_max_deviation >= 0.0) {
            return Err(BuildError::InvalidParameter(
                "edge_max_deviation may not be negative",
            ));
        }

        Ok(())
    }
}

/// Errors that fail a build outright. Per-region triangulation failures are
/// recovered instead and reported in [`PolyMesh::failed_regions`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
}

/// Builds a navigation mesh from world geometry.
///
/// `vertices`/`indices` describe the static world triangles; `indices` holds
/// groups of three. `bound_center` and `bound_extent` (half-extents) define
/// the volume to mesh. The XY footprint is squared up to
/// `max(bound_extent.x, bound_extent.y)` so grid cells stay square.
///
/// An empty mesh or a bounding box without volume yields an empty result,
/// not an error.
pub fn build_navmesh(
    vertices: &[Vec3],
    indices: &[u32],
    bound_center: Vec3,
    bound_extent: Vec3,
    settings: &NavMeshSettings,
) -> Result<PolyMesh, BuildError> {
    settings.validate()?;

    if vertices.is_empty() || indices.is_empty() {
        return Ok(PolyMesh::default());
    }
    if vertices.len() < 3 {
        return Err(BuildError::InvalidGeometry(
            "a triangle mesh needs at least 3 vertices",
        ));
    }
    if indices.len() % 3 != 0 {
        return Err(BuildError::InvalidGeometry(
            "indices must come in groups of 3",
        ));
    }
    if indices.iter().any(|&index| index as usize >= vertices.len()) {
        return Err(BuildError::InvalidGeometry("vertex index out of range"));
    }
    if !(bound_extent.x > 0.0 && bound_extent.y > 0.0 && bound_extent.z > 0.0) {
        return Ok(PolyMesh::default());
    }

    // Square XY footprint, so width == depth and cells stay square.
    let xy_extent = bound_extent.x.max(bound_extent.y);
    let bound_min = bound_center - Vec3::new(xy_extent, xy_extent, bound_extent.z);
    let bound_max = bound_center + Vec3::new(xy_extent, xy_extent, bound_extent.z);

    let solid_heightfield = {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("build_solid_heightfield").entered();
        build_solid_heightfield(vertices, indices, bound_min, bound_max, settings)
    };

    let mut open_heightfield = {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("build_open_heightfield").entered();
        build_open_heightfield(solid_heightfield, settings)
    };

    if !settings.perform_full_generation {
        return Ok(PolyMesh::default());
    }

    {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("calculate_distance_field").entered();
        calculate_distance_field(&mut open_heightfield, settings);
    }
    {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("build_regions").entered();
        build_regions(&mut open_heightfield, settings);
    }

    let contour_set = {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("build_contours").entered();
        build_contours(&open_heightfield, settings)
    };

    // The open heightfield is no longer needed once contours exist.
    drop(open_heightfield);

    let poly_mesh = {
        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("build_poly_mesh").entered();
        build_poly_mesh(&contour_set, settings)
    };

    Ok(poly_mesh)
}
