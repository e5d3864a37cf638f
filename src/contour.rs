use glam::Vec3;
use tracing::debug;

use crate::heightfields::{axis_neighbour, OpenHeightfield, OpenSpan};

use super::{neighbour_index, Direction, NavMeshSettings, NULL_REGION};

/// A raw contour walk gives up after this many steps; a well-formed region
/// edge always closes sooner.
const MAX_WALK_STEPS: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug)]
pub struct ContourVertex {
    /// World-space position. Z is the corner height of the border voxel.
    pub position: Vec3,
    /// Region on the far side of the border at this vertex, possibly the
    /// null region.
    pub external_region: u16,
    /// Region owning the border voxel.
    pub internal_region: u16,
    /// Position within the raw ring this vertex was taken from.
    pub(crate) raw_index: usize,
}

/// A closed ring of simplified vertices along one region border.
#[derive(Clone, Debug)]
pub struct Contour {
    pub region: u16,
    pub vertices: Vec<ContourVertex>,
}

#[derive(Default, Debug)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Region ID range of the source heightfield, null region included.
    pub region_count: u16,
}

/// Traces the border of every region and simplifies each ring down to its
/// portal vertices plus whatever the deviation and edge-length limits keep.
pub fn build_contours(field: &OpenHeightfield, settings: &NavMeshSettings) -> ContourSet {
    let mut contour_set = ContourSet {
        contours: Vec::with_capacity(usize::from(field.region_count.max(8))),
        region_count: field.region_count.max(1),
    };

    let mut boundary_flags = vec![0u8; field.span_count];
    find_boundary_flags(field, &mut boundary_flags);

    let mut raw_vertices = Vec::with_capacity(256);
    let mut simplified_vertices = Vec::with_capacity(64);

    for (cell_index, cell) in field.cells.iter().enumerate() {
        for (span_index, span) in cell.spans.iter().enumerate() {
            if span.region == NULL_REGION || boundary_flags[span.span_index] == 0 {
                continue;
            }

            let Some(start_dir) = Direction::ALL
                .into_iter()
                .find(|dir| boundary_flags[span.span_index] & (1 << dir.index()) != 0)
            else {
                continue;
            };

            raw_vertices.clear();
            simplified_vertices.clear();

            let only_null_connections = walk_contour(
                field,
                settings,
                cell_index,
                span_index,
                start_dir,
                &mut boundary_flags,
                &mut raw_vertices,
            );

            simplify_contour(
                &raw_vertices,
                &mut simplified_vertices,
                only_null_connections,
                settings,
            );

            if !simplified_vertices.is_empty() {
                contour_set.contours.push(Contour {
                    region: span.region,
                    vertices: simplified_vertices.clone(),
                });
            }
        }
    }

    debug!(contours = contour_set.contours.len(), "contours traced");

    contour_set
}

/// Flags, per span, every direction whose neighbour lies in a different
/// region (a missing neighbour counts as the null region). Spans bordered
/// on all four sides are isolated islands and contribute no contour.
fn find_boundary_flags(field: &OpenHeightfield, boundary_flags: &mut [u8]) {
    for (cell_index, cell) in field.cells.iter().enumerate() {
        for span in cell.spans.iter() {
            if span.region == NULL_REGION {
                continue;
            }

            let mut flags = 0u8;
            for dir in Direction::ALL {
                let neighbour_region =
                    axis_neighbour(&field.cells, field.width, cell_index, span, dir)
                        .map_or(NULL_REGION, |(_, neighbour)| neighbour.region);
                if neighbour_region != span.region {
                    flags |= 1 << dir.index();
                }
            }

            boundary_flags[span.span_index] = if flags == 0b1111 { 0 } else { flags };
        }
    }
}

/// Walks a region edge clockwise, emitting one vertex per border voxel
/// corner. Returns whether the ring only ever bordered the null region.
#[allow(clippy::too_many_arguments)]
fn walk_contour(
    field: &OpenHeightfield,
    settings: &NavMeshSettings,
    start_cell: usize,
    start_span: usize,
    start_dir: Direction,
    boundary_flags: &mut [u8],
    raw_vertices: &mut Vec<ContourVertex>,
) -> bool {
    let mut only_null_connections = true;

    let mut cell_index = start_cell;
    let mut span_index = start_span;
    let mut dir = start_dir;
    let mut width_index = (start_cell % field.width) as i32;
    let mut depth_index = (start_cell / field.width) as i32;
    let mut raw_index = 0;

    for _ in 0..MAX_WALK_STEPS {
        let span = &field.cells[cell_index].spans[span_index];

        if boundary_flags[span.span_index] & (1 << dir.index()) != 0 {
            let corner = corner_height(field, cell_index, span, dir);

            let mut x = field.bound_min.x + settings.cell_size * width_index as f32;
            let mut y =
                field.bound_min.y + settings.cell_size * depth_index as f32 + settings.cell_size;
            let z = field.bound_min.z + settings.cell_height * f32::from(corner);
            match dir {
                Direction::XNegative => y -= settings.cell_size,
                Direction::YNegative => {
                    x += settings.cell_size;
                    y -= settings.cell_size;
                }
                Direction::XPositive => x += settings.cell_size,
                Direction::YPositive => {}
            }

            let external_region = axis_neighbour(&field.cells, field.width, cell_index, span, dir)
                .map_or(NULL_REGION, |(_, neighbour)| neighbour.region);
            if external_region != NULL_REGION {
                only_null_connections = false;
            }

            raw_vertices.push(ContourVertex {
                position: Vec3::new(x, y, z),
                external_region,
                internal_region: span.region,
                raw_index,
            });
            raw_index += 1;

            boundary_flags[span.span_index] &= !(1 << dir.index());
            dir = dir.rotate_clockwise();
        } else {
            let Some(next_span) = span.neighbours[dir.index()] else {
                // An unflagged direction always has a same-region neighbour.
                panic!("unflagged contour direction without a neighbour link");
            };
            span_index = next_span as usize;
            width_index += dir.offset_width();
            depth_index += dir.offset_depth();
            cell_index = neighbour_index(field.width, cell_index, dir);
            dir = dir.rotate_counter_clockwise();
        }

        if cell_index == start_cell && span_index == start_span && dir == start_dir {
            break;
        }
    }

    only_null_connections
}

/// Height of the voxel corner between `span`, its neighbour in `dir`, the
/// neighbour one rotation clockwise, and the diagonal between them: the
/// highest floor of the four.
fn corner_height(
    field: &OpenHeightfield,
    cell_index: usize,
    span: &OpenSpan,
    dir: Direction,
) -> u16 {
    let next_dir = dir.rotate_clockwise();
    let mut max_floor = span.min;
    let mut diagonal: Option<&OpenSpan> = None;

    if let Some((neighbour_cell, neighbour)) =
        axis_neighbour(&field.cells, field.width, cell_index, span, dir)
    {
        max_floor = max_floor.max(neighbour.min);
        diagonal = axis_neighbour(&field.cells, field.width, neighbour_cell, neighbour, next_dir)
            .map(|(_, diagonal)| diagonal);
    }
    if let Some((neighbour_cell, neighbour)) =
        axis_neighbour(&field.cells, field.width, cell_index, span, next_dir)
    {
        max_floor = max_floor.max(neighbour.min);
        if diagonal.is_none() {
            diagonal = axis_neighbour(&field.cells, field.width, neighbour_cell, neighbour, dir)
                .map(|(_, diagonal)| diagonal);
        }
    }
    if let Some(diagonal) = diagonal {
        max_floor = max_floor.max(diagonal.min);
    }

    max_floor
}

fn simplify_contour(
    raw_vertices: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    only_null_connections: bool,
    settings: &NavMeshSettings,
) {
    if raw_vertices.is_empty() {
        return;
    }

    if only_null_connections {
        // Island contour: anchor on the lexicographic extremes.
        let mut bottom_left = raw_vertices[0];
        let mut top_right = raw_vertices[0];

        for vertex in raw_vertices {
            let position = vertex.position;
            if position.x < bottom_left.position.x
                || (position.x == bottom_left.position.x && position.y < bottom_left.position.y)
            {
                bottom_left = *vertex;
            }
            if position.x > top_right.position.x
                || (position.x == top_right.position.x && position.y > top_right.position.y)
            {
                top_right = *vertex;
            }
        }

        simplified.push(bottom_left);
        simplified.push(top_right);
    } else {
        // Keep the portal vertices: wherever the bordering region switches.
        for (index, vertex) in raw_vertices.iter().enumerate() {
            let next = &raw_vertices[(index + 1) % raw_vertices.len()];
            if vertex.external_region != next.external_region {
                simplified.push(*vertex);
            }
        }
    }

    if simplified.is_empty() {
        return;
    }

    reinsert_null_region_vertices(raw_vertices, simplified, settings);
    subdivide_long_edges(simplified, settings);
    remove_duplicate_vertices(simplified);
}

/// Walks every simplified edge bordering the null region and restores raw
/// vertices that stray too far from it.
///
/// Deviation is measured against the edge midpoint, not the segment: a
/// straight run of raw vertices equidistant from the segment would
/// otherwise be pruned in full.
fn reinsert_null_region_vertices(
    raw_vertices: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    settings: &NavMeshSettings,
) {
    let raw_count = raw_vertices.len();
    let max_deviation_sq = settings.edge_max_deviation * settings.edge_max_deviation;

    let mut edge_start = 0;
    while edge_start < simplified.len() {
        let edge_end = (edge_start + 1) % simplified.len();
        let raw_start = simplified[edge_start].raw_index;
        let raw_end = simplified[edge_end].raw_index;

        // Wrapping back to raw index 0 must not re-test the start vertex.
        let end_check = if raw_end == 0 { raw_count - 1 } else { raw_end };

        // A run bordering one non-null region is a pure portal edge; its
        // intermediate vertices are never restored.
        let first_between = &raw_vertices[(raw_start + 1) % raw_count];
        if first_between.external_region == raw_vertices[end_check].external_region
            && first_between.external_region != NULL_REGION
        {
            edge_start += 1;
            continue;
        }

        let mut mandatory_start = edge_start;
        let mut mandatory_end = edge_end;
        let mut test = (raw_start + 1) % raw_count;
        while test != raw_end {
            let midpoint = (simplified[mandatory_start].position
                + simplified[mandatory_end].position)
                * 0.5;
            let deviation_sq = raw_vertices[test].position.distance_squared(midpoint);

            if deviation_sq >= max_deviation_sq {
                simplified.insert(mandatory_start + 1, raw_vertices[test]);
                mandatory_start += 1;
                mandatory_end = (mandatory_end + 1) % simplified.len();
            }
            test = (test + 1) % raw_count;
        }

        edge_start = mandatory_start + 1;
    }
}

/// Splits simplified edges bordering the null region that exceed the
/// maximum edge length, inserting midpoints until every piece fits.
fn subdivide_long_edges(simplified: &mut Vec<ContourVertex>, settings: &NavMeshSettings) {
    let max_edge_length = settings.clamped_max_edge_length();
    let max_edge_length_sq = max_edge_length * max_edge_length;

    let mut index = 0;
    while index < simplified.len() {
        let mut next = (index + 1) % simplified.len();
        if simplified[next].external_region != NULL_REGION {
            index += 1;
            continue;
        }

        let mut distance_sq =
            simplified[index].position.distance_squared(simplified[next].position);
        while distance_sq > max_edge_length_sq {
            let start = simplified[index];
            let end = simplified[next].position;

            // The midpoint inherits the start vertex's region annotations.
            let middle = ContourVertex {
                position: (end - start.position) / 2.0 + start.position,
                ..start
            };
            simplified.insert(index + 1, middle);

            next = (index + 1) % simplified.len();
            distance_sq = simplified[index].position.distance_squared(simplified[next].position);
        }

        index += 1;
    }
}

/// Removes vertices coinciding with their successor.
fn remove_duplicate_vertices(simplified: &mut Vec<ContourVertex>) {
    let mut index = 0;
    while index < simplified.len() {
        let next = (index + 1) % simplified.len();
        if next != index && simplified[index].position == simplified[next].position {
            simplified.remove(next);
        }
        index += 1;
    }
}
