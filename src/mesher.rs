use glam::Vec3;
use tracing::{debug, warn};

use crate::contour::ContourSet;
use crate::math::{intersect, is_left, is_left_or_collinear, is_right, is_right_or_collinear};

use super::NavMeshSettings;

/// Extra merge rounds run after collinear cleanup. Bounded, not recursive.
const MERGE_RECURSION_PASSES: usize = 1;

/// Two summed edge lengths within this of the direct distance count as
/// collinear.
const COLLINEAR_EPSILON: f32 = 1.0e-4;

/// A convex polygon of the navigation mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    /// Indices into [`PolyMesh::vertices`], wound clockwise.
    pub indices: Vec<u32>,
    /// Region this polygon was meshed from.
    pub region: u16,
    /// Signed-area weighted centre in XY; Z is the midpoint of the lowest
    /// and highest vertex.
    pub centroid: Vec3,
    /// Positions of the polygons sharing an edge with this one, in
    /// [`PolyMesh::polygons`].
    pub adjacent: Vec<u32>,
}

/// The final navigation mesh: a deduplicated vertex table and the convex
/// polygons built over it.
#[derive(Default, Debug, PartialEq)]
pub struct PolyMesh {
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
    /// Regions whose contour could not be triangulated. Their area is
    /// missing from the mesh; everything else proceeded normally.
    pub failed_regions: Vec<u16>,
}

#[derive(Clone, Copy)]
struct RingIndex {
    /// Index into the ring's vertex list.
    vertex: usize,
    /// The vertex after this one closes a valid triangle partition.
    is_ear: bool,
}

/// Triangulates every region's contour ring and greedily merges triangles
/// into convex polygons of at most `max_vertices_per_polygon` vertices.
pub fn build_poly_mesh(contour_set: &ContourSet, settings: &NavMeshSettings) -> PolyMesh {
    let max_vertices_per_polygon = settings.clamped_max_vertices_per_polygon();

    // One ring of vertices per region. A region tracing several rings (a
    // border around an obstruction, say) contributes them all to the same
    // ring; holes are not modelled separately.
    let region_count = usize::from(contour_set.region_count.max(1));
    let mut region_rings: Vec<Vec<Vec3>> = vec![Vec::new(); region_count];
    for contour in &contour_set.contours {
        region_rings[usize::from(contour.region)]
            .extend(contour.vertices.iter().map(|vertex| vertex.position));
    }

    let mut mesh = PolyMesh::default();
    let mut polygons: Vec<Vec<u32>> = Vec::new();
    let mut polygon_regions: Vec<u16> = Vec::new();

    let mut ring_indices = Vec::new();
    let mut triangles = Vec::new();
    let mut global_indices = Vec::new();

    for region in 1..region_count as u16 {
        let ring = &region_rings[usize::from(region)];
        if ring.len() < 3 {
            if !ring.is_empty() {
                debug!(
                    region = usize::from(region),
                    vertices = ring.len(),
                    "ring too small to mesh"
                );
            }
            continue;
        }

        ring_indices.clear();
        triangles.clear();
        if !triangulate(ring, &mut ring_indices, &mut triangles) {
            // Usually a self-intersecting ring out of contour
            // simplification; tightening edge_max_deviation and
            // max_edge_length helps.
            warn!(
                region = usize::from(region),
                "could not triangulate contour ring, skipping region"
            );
            mesh.failed_regions.push(region);
            continue;
        }

        // Map ring-local vertices onto the shared vertex table.
        global_indices.clear();
        for &vertex in ring.iter() {
            global_indices.push(add_vertex(&mut mesh.vertices, vertex));
        }

        let mut region_polygons: Vec<Vec<u32>> = Vec::with_capacity(triangles.len());
        for triangle in triangles.iter() {
            let a = global_indices[triangle[0]];
            let b = global_indices[triangle[1]];
            let c = global_indices[triangle[2]];
            if a != b && a != c && b != c {
                region_polygons.push(vec![a, b, c]);
            }
        }
        if region_polygons.is_empty() {
            continue;
        }

        if max_vertices_per_polygon > 3 {
            merge_polygons(&mut region_polygons, &mesh.vertices, max_vertices_per_polygon);

            for _ in 0..MERGE_RECURSION_PASSES {
                remove_collinear_vertices(&mut region_polygons, &mesh.vertices);
                merge_polygons(&mut region_polygons, &mesh.vertices, max_vertices_per_polygon);
            }
            remove_collinear_vertices(&mut region_polygons, &mesh.vertices);
        }

        for polygon in region_polygons {
            polygons.push(polygon);
            polygon_regions.push(region);
        }
    }

    let adjacency = build_adjacency(&polygons);

    let built: Vec<Polygon> = polygons
        .into_iter()
        .zip(polygon_regions)
        .zip(adjacency)
        .map(|((indices, region), adjacent)| {
            let centroid = polygon_centroid(&indices, &mesh.vertices);
            Polygon {
                indices,
                region,
                centroid,
                adjacent,
            }
        })
        .collect();
    mesh.polygons = built;

    debug!(
        polygons = mesh.polygons.len(),
        vertices = mesh.vertices.len(),
        "poly mesh built"
    );

    mesh
}

fn next_index(index: usize, count: usize) -> usize {
    if index + 1 < count {
        index + 1
    } else {
        0
    }
}

fn previous_index(index: usize, count: usize) -> usize {
    if index > 0 {
        index - 1
    } else {
        count - 1
    }
}

/// Ear-clipping triangulation of a clockwise ring. Fails when no valid
/// partition remains with more than three indices left.
fn triangulate(
    ring: &[Vec3],
    indices: &mut Vec<RingIndex>,
    triangles: &mut Vec<[usize; 3]>,
) -> bool {
    indices.extend((0..ring.len()).map(|vertex| RingIndex {
        vertex,
        is_ear: false,
    }));

    for index in 0..indices.len() {
        let plus_one = next_index(index, indices.len());
        let plus_two = next_index(plus_one, indices.len());
        if is_valid_partition(index, plus_two, ring, indices) {
            indices[plus_one].is_ear = true;
        }
    }

    while indices.len() > 3 {
        // Take the ear closing the shortest partition.
        let mut min_length_sq = f32::MAX;
        let mut min_index = None;
        for index in 0..indices.len() {
            let plus_one = next_index(index, indices.len());
            if !indices[plus_one].is_ear {
                continue;
            }

            let plus_two = next_index(plus_one, indices.len());
            let from = ring[indices[index].vertex];
            let to = ring[indices[plus_two].vertex];
            let delta_x = to.x - from.x;
            let delta_y = to.y - from.y;
            let length_sq = delta_x * delta_x + delta_y * delta_y;

            if min_index.is_none() || length_sq < min_length_sq {
                min_length_sq = length_sq;
                min_index = Some(index);
            }
        }

        let Some(index) = min_index else {
            return false;
        };

        let plus_one = next_index(index, indices.len());
        let plus_two = next_index(plus_one, indices.len());
        triangles.push([
            indices[index].vertex,
            indices[plus_one].vertex,
            indices[plus_two].vertex,
        ]);

        // Clip the ear's centre vertex out of the ring.
        indices.remove(plus_one);

        let (index, plus_one) = if plus_one == 0 || plus_one >= indices.len() {
            (indices.len() - 1, 0)
        } else {
            (index, plus_one)
        };

        // Only the clipped corner's neighbours change validity.
        indices[index].is_ear =
            is_valid_partition(previous_index(index, indices.len()), plus_one, ring, indices);
        indices[plus_one].is_ear =
            is_valid_partition(index, next_index(plus_one, indices.len()), ring, indices);
    }

    triangles.push([indices[0].vertex, indices[1].vertex, indices[2].vertex]);

    true
}

/// The open segment between ring positions `index_a` and `index_b` lies in
/// the polygon's interior.
fn is_valid_partition(index_a: usize, index_b: usize, ring: &[Vec3], indices: &[RingIndex]) -> bool {
    located_in_internal_angle(index_a, index_b, ring, indices)
        && !has_illegal_edge_intersection(index_a, index_b, ring, indices)
}

fn located_in_internal_angle(
    index_a: usize,
    index_b: usize,
    ring: &[Vec3],
    indices: &[RingIndex],
) -> bool {
    let vertex_a = ring[indices[index_a].vertex];
    let vertex_b = ring[indices[index_b].vertex];
    let vertex_a_minus = ring[indices[previous_index(index_a, indices.len())].vertex];
    let vertex_a_plus = ring[indices[next_index(index_a, indices.len())].vertex];

    // Internal angle at A of 180 degrees or less.
    if is_left_or_collinear(vertex_a, vertex_a_minus, vertex_a_plus) {
        return is_left(vertex_b, vertex_a, vertex_a_minus)
            && is_right(vertex_b, vertex_a, vertex_a_plus);
    }

    // Reflex angle: B lies inside it exactly when B is outside the external
    // angle.
    !(is_left_or_collinear(vertex_b, vertex_a, vertex_a_plus)
        && is_right_or_collinear(vertex_b, vertex_a, vertex_a_minus))
}

fn has_illegal_edge_intersection(
    index_a: usize,
    index_b: usize,
    ring: &[Vec3],
    indices: &[RingIndex],
) -> bool {
    let vertex_a = ring[indices[index_a].vertex];
    let vertex_b = ring[indices[index_b].vertex];

    for edge_begin in 0..indices.len() {
        let edge_end = next_index(edge_begin, indices.len());
        if edge_begin == index_a || edge_begin == index_b || edge_end == index_a || edge_end == index_b
        {
            continue;
        }

        let begin = ring[indices[edge_begin].vertex];
        let end = ring[indices[edge_end].vertex];

        // Edges ending on either test vertex cannot make the partition
        // illegal.
        if (begin.x == vertex_a.x && begin.y == vertex_a.y)
            || (begin.x == vertex_b.x && begin.y == vertex_b.y)
            || (end.x == vertex_a.x && end.y == vertex_a.y)
            || (end.x == vertex_b.x && end.y == vertex_b.y)
        {
            continue;
        }

        if intersect(vertex_a, vertex_b, begin, end) {
            return true;
        }
    }

    false
}

/// Returns the global index for `vertex`, appending it if unseen.
fn add_vertex(vertices: &mut Vec<Vec3>, vertex: Vec3) -> u32 {
    if let Some(existing) = vertices.iter().position(|&known| known == vertex) {
        return existing as u32;
    }
    vertices.push(vertex);
    (vertices.len() - 1) as u32
}

struct MergeCandidate {
    edge_length_sq: f32,
    shared_index_a: usize,
    shared_index_b: usize,
}

/// Greedily merges polygon pairs along their longest shared edge while the
/// result stays convex and under the vertex cap.
fn merge_polygons(polygons: &mut Vec<Vec<u32>>, vertices: &[Vec3], max_vertices: usize) {
    loop {
        let mut longest_edge_sq = -1.0f32;
        let mut best: Option<(usize, usize, usize, usize)> = None;

        for index_a in 0..polygons.len() {
            for index_b in index_a + 1..polygons.len() {
                let Some(candidate) =
                    merge_candidate(&polygons[index_a], &polygons[index_b], vertices, max_vertices)
                else {
                    continue;
                };
                if candidate.edge_length_sq > longest_edge_sq {
                    longest_edge_sq = candidate.edge_length_sq;
                    best = Some((
                        index_a,
                        index_b,
                        candidate.shared_index_a,
                        candidate.shared_index_b,
                    ));
                }
            }
        }

        // No admissible merge left.
        let Some((index_a, index_b, shared_a, shared_b)) = best else {
            break;
        };
        if longest_edge_sq <= 0.0 {
            break;
        }

        let merged = splice_polygons(&polygons[index_a], &polygons[index_b], shared_a, shared_b);
        polygons[index_a] = merged;
        polygons.remove(index_b);
    }
}

/// Checks whether two polygons share an edge (traversed in opposite
/// directions) and whether merging them keeps both splice corners convex.
fn merge_candidate(
    polygon_a: &[u32],
    polygon_b: &[u32],
    vertices: &[Vec3],
    max_vertices: usize,
) -> Option<MergeCandidate> {
    if polygon_a.len() + polygon_b.len() - 2 > max_vertices {
        return None;
    }

    let mut shared_a = None;
    let mut shared_b = None;
    for index_a in 0..polygon_a.len() {
        let from_a = polygon_a[index_a];
        let to_a = polygon_a[next_index(index_a, polygon_a.len())];

        for index_b in 0..polygon_b.len() {
            let from_b = polygon_b[index_b];
            let to_b = polygon_b[next_index(index_b, polygon_b.len())];

            if from_a == to_b && to_a == from_b {
                shared_a = Some(index_a);
                shared_b = Some(index_b);
            }
        }
    }
    let (shared_a, shared_b) = shared_a.zip(shared_b)?;

    // Both splice corners must stay left-or-collinear of their new
    // neighbours, or the merged polygon turns concave.
    let corner_minus = vertices[polygon_a[previous_index(shared_a, polygon_a.len())] as usize];
    let corner = vertices[polygon_a[shared_a] as usize];
    let corner_plus = vertices[polygon_b[(shared_b + 2) % polygon_b.len()] as usize];
    if !is_left_or_collinear(corner, corner_minus, corner_plus) {
        return None;
    }

    let corner_minus = vertices[polygon_b[previous_index(shared_b, polygon_b.len())] as usize];
    let corner = vertices[polygon_b[shared_b] as usize];
    let corner_plus = vertices[polygon_a[(shared_a + 2) % polygon_a.len()] as usize];
    if !is_left_or_collinear(corner, corner_minus, corner_plus) {
        return None;
    }

    let edge_start = vertices[polygon_a[shared_a] as usize];
    let edge_end = vertices[polygon_a[next_index(shared_a, polygon_a.len())] as usize];

    Some(MergeCandidate {
        edge_length_sq: edge_start.distance_squared(edge_end),
        shared_index_a: shared_a,
        shared_index_b: shared_b,
    })
}

fn splice_polygons(
    polygon_a: &[u32],
    polygon_b: &[u32],
    shared_a: usize,
    shared_b: usize,
) -> Vec<u32> {
    let mut merged = Vec::with_capacity(polygon_a.len() + polygon_b.len() - 2);

    for offset in 0..polygon_a.len() - 1 {
        merged.push(polygon_a[(shared_a + 1 + offset) % polygon_a.len()]);
    }
    for offset in 0..polygon_b.len() - 1 {
        merged.push(polygon_b[(shared_b + 1 + offset) % polygon_b.len()]);
    }

    merged
}

/// Drops vertices whose neighbours already describe their edge: the two
/// adjacent distances sum to the distance between the neighbours.
fn remove_collinear_vertices(polygons: &mut [Vec<u32>], vertices: &[Vec3]) {
    for polygon in polygons.iter_mut() {
        let mut index = 0;
        while polygon.len() > 3 && index < polygon.len() {
            let vertex = vertices[polygon[index] as usize];
            let minus = vertices[polygon[previous_index(index, polygon.len())] as usize];
            let plus = vertices[polygon[next_index(index, polygon.len())] as usize];

            let through = vertex.distance(minus) + vertex.distance(plus);
            let direct = minus.distance(plus);
            if (through - direct).abs() <= COLLINEAR_EPSILON {
                polygon.remove(index);
                continue;
            }
            index += 1;
        }
    }
}

/// For every polygon, the polygons sharing one of its edges in either
/// orientation.
fn build_adjacency(polygons: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let mut adjacency = vec![Vec::new(); polygons.len()];

    for (index_a, polygon_a) in polygons.iter().enumerate() {
        for edge_a in 0..polygon_a.len() {
            let from_a = polygon_a[edge_a];
            let to_a = polygon_a[next_index(edge_a, polygon_a.len())];

            for (index_b, polygon_b) in polygons.iter().enumerate() {
                if index_b == index_a {
                    continue;
                }

                for edge_b in 0..polygon_b.len() {
                    let from_b = polygon_b[edge_b];
                    let to_b = polygon_b[next_index(edge_b, polygon_b.len())];

                    if (from_a == from_b && to_a == to_b) || (from_a == to_b && to_a == from_b) {
                        let entry = index_b as u32;
                        if !adjacency[index_a].contains(&entry) {
                            adjacency[index_a].push(entry);
                        }
                    }
                }
            }
        }
    }

    adjacency
}

/// Signed-area weighted centroid in XY. Z approximates the surface by the
/// midpoint of the lowest and highest edge endpoint.
fn polygon_centroid(indices: &[u32], vertices: &[Vec3]) -> Vec3 {
    let mut signed_area = 0.0f32;
    let mut centroid_x = 0.0f32;
    let mut centroid_y = 0.0f32;
    let mut min_z = f32::MAX;
    let mut max_z = f32::MIN;

    for index in 0..indices.len() {
        let first = vertices[indices[index] as usize];
        let second = vertices[indices[next_index(index, indices.len())] as usize];

        let area_term = first.x * second.y - second.x * first.y;
        signed_area += area_term;
        centroid_x += (first.x + second.x) * area_term;
        centroid_y += (first.y + second.y) * area_term;

        min_z = min_z.min(first.z).min(second.z);
        max_z = max_z.max(first.z).max(second.z);
    }

    signed_area *= 0.5;
    if signed_area.abs() <= f32::EPSILON {
        // Degenerate in XY; fall back to the vertex average.
        let sum: Vec3 = indices
            .iter()
            .map(|&index| vertices[index as usize])
            .sum();
        return sum / indices.len() as f32;
    }

    Vec3::new(
        centroid_x / (6.0 * signed_area),
        centroid_y / (6.0 * signed_area),
        (min_z + max_z) / 2.0,
    )
}
