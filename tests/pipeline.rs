use approx::assert_relative_eq;
use glam::Vec3;
use voxel_navmesh::{
    build_contours, build_navmesh, build_open_heightfield, build_regions, build_solid_heightfield,
    calculate_distance_field, Direction, NavMeshSettings, PolyMesh, SpanAttribute,
    NULL_REGION, REGION_MAX_BORDER,
};

/// Triangle-soup builder for the test worlds. Horizontal faces are wound
/// clockwise seen from above so their normals point up (+Z).
#[derive(Default)]
struct World {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
}

impl World {
    /// Quad (a, b, c, d) in ring order, as two triangles.
    fn quad(&mut self, a: Vec3, b: Vec3, c: Vec3, d: Vec3) {
        let base = self.vertices.len() as u32;
        self.vertices.extend([a, b, c, d]);
        self.indices
            .extend([base, base + 1, base + 3, base + 1, base + 2, base + 3]);
    }

    /// Horizontal floor patch with its lower-left corner at `origin`.
    fn floor(&mut self, origin: Vec3, x_size: f32, y_size: f32) {
        self.quad(
            origin,
            origin + Vec3::new(0.0, y_size, 0.0),
            origin + Vec3::new(x_size, y_size, 0.0),
            origin + Vec3::new(x_size, 0.0, 0.0),
        );
    }

    /// Axis-aligned box without a bottom face; walls then a top face.
    fn block(&mut self, min: Vec3, max: Vec3) {
        self.quad(
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(min.x, max.y, min.z),
        );
        self.quad(
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(max.x, max.y, min.z),
        );
        self.quad(
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, min.y, min.z),
        );
        self.quad(
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(max.x, max.y, min.z),
        );
        // Top face last: its walkability wins over the walls when spans merge.
        self.floor(Vec3::new(min.x, min.y, max.z), max.x - min.x, max.y - min.y);
    }
}

/// Agent parameters for the 1-unit-cell scenarios: clearance 2, climbable
/// step 1, no border shrink, simplification tuned so square contours keep
/// exactly their corners.
fn scenario_settings() -> NavMeshSettings {
    NavMeshSettings {
        cell_size: 1.0,
        cell_height: 1.0,
        max_traversable_angle: 45.0,
        min_traversable_height: 2.0,
        max_traversable_step: 1.0,
        traversable_area_border_size: 0,
        min_unconnected_region_size: 4,
        min_merge_region_size: 20,
        edge_max_deviation: 2.5,
        max_edge_length: 10.0,
        ..NavMeshSettings::default()
    }
}

fn polygon_positions(mesh: &PolyMesh, polygon: usize) -> Vec<Vec3> {
    mesh.polygons[polygon]
        .indices
        .iter()
        .map(|&index| mesh.vertices[index as usize])
        .collect()
}

fn signed_area_x2(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b.y - a.y) * (c.x - a.x) - (c.y - a.y) * (b.x - a.x)
}

fn shoelace(ring: &[Vec3]) -> f32 {
    let mut area = 0.0;
    for index in 0..ring.len() {
        let first = ring[index];
        let second = ring[(index + 1) % ring.len()];
        area += first.x * second.y - second.x * first.y;
    }
    area / 2.0
}

/// Point-in-convex-polygon in XY, boundary inclusive, for polygons in the
/// crate's winding.
fn polygon_contains(ring: &[Vec3], x: f32, y: f32) -> bool {
    let point = Vec3::new(x, y, 0.0);
    ring.iter().enumerate().all(|(index, &start)| {
        let end = ring[(index + 1) % ring.len()];
        signed_area_x2(start, point, end) >= -1.0e-4
    })
}

fn covered(mesh: &PolyMesh, x: f32, y: f32) -> bool {
    (0..mesh.polygons.len()).any(|polygon| polygon_contains(&polygon_positions(mesh, polygon), x, y))
}

/// Structural checks every produced mesh must pass: consistent winding,
/// convexity, the vertex cap, no degenerate consecutive vertices, and
/// symmetric adjacency.
fn assert_mesh_valid(mesh: &PolyMesh, settings: &NavMeshSettings) {
    for (polygon_index, polygon) in mesh.polygons.iter().enumerate() {
        let ring = polygon_positions(mesh, polygon_index);

        assert!(ring.len() >= 3);
        assert!(ring.len() <= settings.clamped_max_vertices_per_polygon());
        assert!(
            shoelace(&ring) > 0.0,
            "polygon {polygon_index} wound inconsistently"
        );

        for index in 0..ring.len() {
            let previous = ring[(index + ring.len() - 1) % ring.len()];
            let current = ring[index];
            let next = ring[(index + 1) % ring.len()];

            assert_ne!(
                (current.x, current.y),
                (next.x, next.y),
                "degenerate edge in polygon {polygon_index}"
            );
            assert!(
                signed_area_x2(previous, current, next) <= 1.0e-4,
                "reflex corner in polygon {polygon_index}"
            );
        }

        for &adjacent in &polygon.adjacent {
            assert!(
                mesh.polygons[adjacent as usize]
                    .adjacent
                    .contains(&(polygon_index as u32)),
                "adjacency between {polygon_index} and {adjacent} is one-sided"
            );
        }
    }
}

/// Polygons reachable from the first one by walking adjacency.
fn connected_polygon_count(mesh: &PolyMesh) -> usize {
    if mesh.polygons.is_empty() {
        return 0;
    }

    let mut visited = vec![false; mesh.polygons.len()];
    let mut stack = vec![0usize];
    visited[0] = true;
    let mut count = 0;

    while let Some(polygon) = stack.pop() {
        count += 1;
        for &adjacent in &mesh.polygons[polygon].adjacent {
            if !visited[adjacent as usize] {
                visited[adjacent as usize] = true;
                stack.push(adjacent as usize);
            }
        }
    }

    count
}

#[test]
fn flat_quad_becomes_single_square_polygon() {
    // S1: a flat 4x4 floor out of two triangles.
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);

    let settings = scenario_settings();
    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        Vec3::new(2.0, 2.0, 0.0),
        Vec3::new(3.0, 3.0, 2.0),
        &settings,
    )
    .unwrap();

    assert!(mesh.failed_regions.is_empty());
    assert_eq!(mesh.polygons.len(), 1);
    assert_mesh_valid(&mesh, &settings);

    let polygon = &mesh.polygons[0];
    assert_eq!(polygon.indices.len(), 4);
    assert!(polygon.adjacent.is_empty());
    assert_relative_eq!(polygon.centroid.x, 2.0, epsilon = 1.0e-4);
    assert_relative_eq!(polygon.centroid.y, 2.0, epsilon = 1.0e-4);
    assert_relative_eq!(polygon.centroid.z, 0.0, epsilon = 1.0e-4);

    let mut corners = polygon_positions(&mesh, 0)
        .iter()
        .map(|position| (position.x as i32, position.y as i32, position.z as i32))
        .collect::<Vec<_>>();
    corners.sort_unstable();
    assert_eq!(corners, vec![(0, 0, 0), (0, 4, 0), (4, 0, 0), (4, 4, 0)]);
}

#[test]
fn coplanar_quads_merge_into_one_polygon() {
    // S2: two 4x2 floors joined along y = 2.
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 2.0);
    world.floor(Vec3::new(0.0, 2.0, 0.0), 4.0, 2.0);

    let settings = scenario_settings();
    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        Vec3::new(2.0, 2.0, 0.0),
        Vec3::new(3.0, 3.0, 2.0),
        &settings,
    )
    .unwrap();

    assert!(mesh.failed_regions.is_empty());
    assert_eq!(mesh.polygons.len(), 1);
    assert_eq!(mesh.polygons[0].indices.len(), 4);
    assert_mesh_valid(&mesh, &settings);
}

#[test]
fn pillar_obstructs_floor() {
    // S3: an 8x8 floor with a blocking pillar over the cell [3, 4]^2. The
    // pillar walls are pulled in slightly so they rasterize into exactly
    // that cell.
    let mut world = World::default();
    world.floor(Vec3::ZERO, 8.0, 8.0);
    world.block(Vec3::new(3.01, 3.01, 0.0), Vec3::new(3.99, 3.99, 2.0));

    let settings = scenario_settings();
    let bound_center = Vec3::new(4.0, 4.0, 1.0);
    let bound_extent = Vec3::new(5.0, 5.0, 3.0);

    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        bound_center,
        bound_extent,
        &settings,
    )
    .unwrap();

    // The pillar top never reaches the mesh; everything stays at floor level.
    for vertex in &mesh.vertices {
        assert!(vertex.z < 0.5);
    }

    // A ring wrapped around an obstruction carries its hole inline, so the
    // convexity guarantees of simple rings do not apply here; adjacency
    // symmetry always does.
    for (polygon_index, polygon) in mesh.polygons.iter().enumerate() {
        for &adjacent in &polygon.adjacent {
            assert!(mesh.polygons[adjacent as usize]
                .adjacent
                .contains(&(polygon_index as u32)));
        }
    }

    // When the ring still triangulates, the floor away from the pillar is
    // covered.
    if mesh.failed_regions.is_empty() {
        assert!(!mesh.polygons.is_empty());
        assert!(covered(&mesh, 1.5, 1.5));
        assert!(covered(&mesh, 6.5, 6.5));
        assert!(covered(&mesh, 6.5, 1.5));
    }

    // Stage-level: the pillar-top span is unreachable and belongs to the
    // null region.
    let xy_extent = bound_extent.x.max(bound_extent.y);
    let bound_min = bound_center - Vec3::new(xy_extent, xy_extent, bound_extent.z);
    let bound_max = bound_center + Vec3::new(xy_extent, xy_extent, bound_extent.z);

    let solid = build_solid_heightfield(
        &world.vertices,
        &world.indices,
        bound_min,
        bound_max,
        &settings,
    );
    let mut open = build_open_heightfield(solid, &settings);
    calculate_distance_field(&mut open, &settings);
    build_regions(&mut open, &settings);

    let pillar_spans = open.spans_at(4, 4);
    assert_eq!(pillar_spans.len(), 1);
    assert_eq!(pillar_spans[0].region, NULL_REGION);
    assert!(pillar_spans[0].neighbours.iter().all(Option::is_none));
}

#[test]
fn climbable_staircase_stays_connected() {
    // S4: three treads rising by the maximum traversable step.
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);
    world.floor(Vec3::new(0.0, 4.0, 1.0), 4.0, 4.0);
    world.floor(Vec3::new(0.0, 8.0, 2.0), 4.0, 4.0);

    let settings = scenario_settings();
    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        Vec3::new(2.0, 6.0, 1.0),
        Vec3::new(7.0, 7.0, 3.0),
        &settings,
    )
    .unwrap();

    assert!(mesh.failed_regions.is_empty());
    assert!(!mesh.polygons.is_empty());
    assert_mesh_valid(&mesh, &settings);

    // All three treads are part of the mesh.
    assert!(covered(&mesh, 2.0, 2.0));
    assert!(covered(&mesh, 2.0, 6.0));
    assert!(covered(&mesh, 2.0, 10.0));

    // One walkable surface: every polygon is reachable from the first.
    assert_eq!(connected_polygon_count(&mesh), mesh.polygons.len());

    for vertex in &mesh.vertices {
        assert!((0.0..=2.0).contains(&vertex.z));
    }
}

#[test]
fn tall_steps_split_into_disconnected_treads() {
    // S5: the same staircase with steps twice the traversable limit.
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);
    world.floor(Vec3::new(0.0, 4.0, 2.0), 4.0, 4.0);
    world.floor(Vec3::new(0.0, 8.0, 4.0), 4.0, 4.0);

    let settings = scenario_settings();
    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        Vec3::new(2.0, 6.0, 2.0),
        Vec3::new(7.0, 7.0, 4.0),
        &settings,
    )
    .unwrap();

    assert!(mesh.failed_regions.is_empty());
    assert_eq!(mesh.polygons.len(), 3);
    assert_mesh_valid(&mesh, &settings);

    let mut centroids = mesh
        .polygons
        .iter()
        .map(|polygon| {
            assert_eq!(polygon.indices.len(), 4);
            assert!(polygon.adjacent.is_empty());
            (polygon.centroid.y as i32, polygon.centroid.z as i32)
        })
        .collect::<Vec<_>>();
    centroids.sort_unstable();
    assert_eq!(centroids, vec![(2, 0), (6, 2), (10, 4)]);
}

#[test]
fn slope_walkability_follows_angle_limit() {
    // S6: a 45-degree ramp is exactly at the limit and still walkable.
    let ramp = |z_back: f32| {
        let mut world = World::default();
        world.quad(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 4.0, z_back),
            Vec3::new(4.0, 4.0, z_back),
            Vec3::new(4.0, 0.0, 0.0),
        );
        world
    };

    let settings = scenario_settings();
    let bound_center = Vec3::new(2.0, 2.0, 2.0);
    let bound_extent = Vec3::new(3.0, 3.0, 5.0);

    let at_limit = ramp(4.0);
    let mesh = build_navmesh(
        &at_limit.vertices,
        &at_limit.indices,
        bound_center,
        bound_extent,
        &settings,
    )
    .unwrap();
    assert!(!mesh.polygons.is_empty());
    assert_mesh_valid(&mesh, &settings);

    // One degree steeper: nothing is walkable.
    let too_steep = ramp(4.0 * 46.0_f32.to_radians().tan());
    let mesh = build_navmesh(
        &too_steep.vertices,
        &too_steep.indices,
        bound_center,
        bound_extent,
        &settings,
    )
    .unwrap();
    assert!(mesh.polygons.is_empty());
}

#[test]
fn pipeline_is_deterministic() {
    let mut world = World::default();
    world.floor(Vec3::ZERO, 8.0, 8.0);
    world.block(Vec3::new(3.01, 3.01, 0.0), Vec3::new(3.99, 3.99, 2.0));

    let settings = scenario_settings();
    let build = || {
        build_navmesh(
            &world.vertices,
            &world.indices,
            Vec3::new(4.0, 4.0, 1.0),
            Vec3::new(5.0, 5.0, 3.0),
            &settings,
        )
        .unwrap()
    };

    assert_eq!(build(), build());
}

#[test]
fn meshing_is_stable_under_translation_and_rotation() {
    // Corner retention on a 6x4 rectangle needs a slightly looser
    // deviation limit than the square scenarios.
    let settings = NavMeshSettings {
        edge_max_deviation: 3.0,
        ..scenario_settings()
    };

    let build = |origin: Vec3, x_size: f32, y_size: f32| {
        let mut world = World::default();
        world.floor(origin, x_size, y_size);
        let center = origin + Vec3::new(x_size / 2.0, y_size / 2.0, 0.0);
        build_navmesh(
            &world.vertices,
            &world.indices,
            center,
            Vec3::new(x_size / 2.0 + 1.0, y_size / 2.0 + 1.0, 2.0),
            &settings,
        )
        .unwrap()
    };

    let baseline = build(Vec3::ZERO, 6.0, 4.0);
    let translated = build(Vec3::new(10.0, 7.0, 0.0), 6.0, 4.0);

    assert_eq!(baseline.polygons.len(), 1);
    assert_eq!(translated.polygons.len(), 1);

    let area = |mesh: &PolyMesh| shoelace(&polygon_positions(mesh, 0));
    assert_relative_eq!(area(&baseline), area(&translated), epsilon = 1.0e-4);
    assert_relative_eq!(translated.polygons[0].centroid.x, 13.0, epsilon = 1.0e-4);
    assert_relative_eq!(translated.polygons[0].centroid.y, 9.0, epsilon = 1.0e-4);

    // Rotating the input geometry a quarter turn must not change what is
    // meshed; a square rotated about its centre maps onto itself.
    let square_settings = scenario_settings();
    let mut square = World::default();
    square.floor(Vec3::ZERO, 4.0, 4.0);
    let mut rotated_square = square.vertices.clone();
    for vertex in rotated_square.iter_mut() {
        *vertex = Vec3::new(4.0 - vertex.y, vertex.x, vertex.z);
    }

    let build_square = |vertices: &[Vec3]| {
        build_navmesh(
            vertices,
            &square.indices,
            Vec3::new(2.0, 2.0, 0.0),
            Vec3::new(3.0, 3.0, 2.0),
            &square_settings,
        )
        .unwrap()
    };
    let upright = build_square(&square.vertices);
    let turned = build_square(&rotated_square);

    assert_eq!(upright.polygons.len(), 1);
    assert_eq!(turned.polygons.len(), 1);
    assert_relative_eq!(
        shoelace(&polygon_positions(&upright, 0)),
        shoelace(&polygon_positions(&turned, 0)),
        epsilon = 1.0e-4
    );
}

#[test]
fn partial_generation_stops_after_open_heightfield() {
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);

    let settings = NavMeshSettings {
        perform_full_generation: false,
        ..scenario_settings()
    };
    let mesh = build_navmesh(
        &world.vertices,
        &world.indices,
        Vec3::new(2.0, 2.0, 0.0),
        Vec3::new(3.0, 3.0, 2.0),
        &settings,
    )
    .unwrap();

    assert!(mesh.polygons.is_empty());
    assert!(mesh.vertices.is_empty());
}

// ---------------------------------------------------------------------------
// Stage-level invariants.
// ---------------------------------------------------------------------------

fn staircase_stage_world() -> (World, Vec3, Vec3) {
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);
    world.floor(Vec3::new(0.0, 4.0, 1.0), 4.0, 4.0);
    world.floor(Vec3::new(0.0, 8.0, 2.0), 4.0, 4.0);

    let center = Vec3::new(2.0, 6.0, 1.0);
    let extent = Vec3::new(7.0, 7.0, 3.0);
    let xy_extent = extent.x.max(extent.y);
    (
        world,
        center - Vec3::new(xy_extent, xy_extent, extent.z),
        center + Vec3::new(xy_extent, xy_extent, extent.z),
    )
}

#[test]
fn solid_spans_are_ordered_and_disjoint() {
    let (world, bound_min, bound_max) = staircase_stage_world();
    let settings = scenario_settings();
    let solid =
        build_solid_heightfield(&world.vertices, &world.indices, bound_min, bound_max, &settings);

    for depth_index in 0..solid.depth() {
        for width_index in 0..solid.width() {
            let spans = solid.spans_at(width_index, depth_index);
            for window in spans.windows(2) {
                assert!(window[1].min > window[0].max);
            }
            for span in spans {
                assert!(span.max >= span.min);
            }
        }
    }
}

#[test]
fn neighbour_links_are_symmetric() {
    let (world, bound_min, bound_max) = staircase_stage_world();
    let settings = scenario_settings();
    let solid =
        build_solid_heightfield(&world.vertices, &world.indices, bound_min, bound_max, &settings);
    let open = build_open_heightfield(solid, &settings);

    for depth_index in 0..open.depth() {
        for width_index in 0..open.width() {
            for (span_index, span) in open.spans_at(width_index, depth_index).iter().enumerate() {
                for dir in Direction::ALL {
                    let Some(neighbour_span) = span.neighbours[dir.index()] else {
                        continue;
                    };
                    let neighbour_width = (width_index as i32 + dir.offset_width()) as usize;
                    let neighbour_depth = (depth_index as i32 + dir.offset_depth()) as usize;

                    let neighbour =
                        &open.spans_at(neighbour_width, neighbour_depth)[neighbour_span as usize];
                    assert_eq!(
                        neighbour.neighbours[dir.opposite().index()],
                        Some(span_index as u16),
                        "asymmetric link at ({width_index}, {depth_index})"
                    );
                }
            }
        }
    }
}

#[test]
fn distance_field_settles_every_span() {
    let (world, bound_min, bound_max) = staircase_stage_world();
    let settings = scenario_settings();
    let solid =
        build_solid_heightfield(&world.vertices, &world.indices, bound_min, bound_max, &settings);
    let mut open = build_open_heightfield(solid, &settings);
    calculate_distance_field(&mut open, &settings);

    let mut span_seen = false;
    for depth_index in 0..open.depth() {
        for width_index in 0..open.width() {
            for span in open.spans_at(width_index, depth_index) {
                span_seen = true;
                let distance = open.distance_to_border(span);
                assert_ne!(distance, REGION_MAX_BORDER);
                assert!(distance <= open.max_border_distance());
            }
        }
    }
    assert!(span_seen);
}

#[test]
fn region_ids_are_contiguous() {
    let (world, bound_min, bound_max) = staircase_stage_world();
    let settings = scenario_settings();
    let solid =
        build_solid_heightfield(&world.vertices, &world.indices, bound_min, bound_max, &settings);
    let mut open = build_open_heightfield(solid, &settings);
    calculate_distance_field(&mut open, &settings);
    build_regions(&mut open, &settings);

    let region_count = open.region_count();
    assert!(region_count >= 2);

    let mut seen = vec![false; usize::from(region_count)];
    for depth_index in 0..open.depth() {
        for width_index in 0..open.width() {
            for span in open.spans_at(width_index, depth_index) {
                assert!(span.region < region_count);
                seen[usize::from(span.region)] = true;
            }
        }
    }
    // Every non-null ID is in use.
    assert!(seen.iter().skip(1).all(|&used| used));
}

#[test]
fn contour_rings_have_distinct_consecutive_vertices() {
    let (world, bound_min, bound_max) = staircase_stage_world();
    let settings = scenario_settings();
    let solid =
        build_solid_heightfield(&world.vertices, &world.indices, bound_min, bound_max, &settings);
    let mut open = build_open_heightfield(solid, &settings);
    calculate_distance_field(&mut open, &settings);
    build_regions(&mut open, &settings);
    let contour_set = build_contours(&open, &settings);

    assert!(!contour_set.contours.is_empty());
    for contour in &contour_set.contours {
        assert!(contour.region != NULL_REGION);
        for (index, vertex) in contour.vertices.iter().enumerate() {
            let next = &contour.vertices[(index + 1) % contour.vertices.len()];
            if contour.vertices.len() > 1 {
                assert_ne!(vertex.position, next.position);
            }
        }
    }
}

#[test]
fn ledge_filter_rejects_field_edge_spans() {
    let mut world = World::default();
    world.floor(Vec3::ZERO, 4.0, 4.0);

    let settings = NavMeshSettings {
        filter_ledge_spans: true,
        ..scenario_settings()
    };
    let solid = build_solid_heightfield(
        &world.vertices,
        &world.indices,
        Vec3::new(-1.0, -1.0, -2.0),
        Vec3::new(5.0, 5.0, 2.0),
        &settings,
    );

    // The outer ring of the plateau drops off into nothing and is filtered;
    // the interior survives.
    assert_eq!(
        solid.spans_at(1, 1)[0].attribute,
        SpanAttribute::Unwalkable
    );
    assert_eq!(solid.spans_at(2, 2)[0].attribute, SpanAttribute::Walkable);
}
