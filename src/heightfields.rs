use glam::Vec3;
use smallvec::SmallVec;

use super::{
    checked_neighbour_index, neighbour_index, Direction, NavMeshSettings, REGION_MAX_BORDER,
};

/// Walkability of the top surface of a solid span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanAttribute {
    Walkable,
    Unwalkable,
}

/// A vertical run of solid voxels in one column.
#[derive(Clone, Debug)]
pub struct HeightSpan {
    pub min: u16,
    pub max: u16,
    pub attribute: SpanAttribute,
}

#[derive(Default, Clone)]
struct VoxelCell {
    spans: SmallVec<[HeightSpan; 2]>, // Bottom to top.
}

/// Voxelized world geometry: per-column chains of solid spans.
pub struct SolidHeightfield {
    pub(crate) width: usize,
    pub(crate) depth: usize,
    pub(crate) bound_min: Vec3,
    cells: Box<[VoxelCell]>, // len = width * depth. Laid out X to Y.
}

impl SolidHeightfield {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn spans_at(&self, width_index: usize, depth_index: usize) -> &[HeightSpan] {
        &self.cells[depth_index * self.width + width_index].spans
    }
}

// Like a HeightSpan but representing open walkable areas: empty space with a
// floor and clearance >= min_traversable_height. `max` of `None` is open sky.
#[derive(Default, Clone, Copy, Debug)]
pub struct OpenSpan {
    pub min: u16,
    pub max: Option<u16>,
    pub neighbours: [Option<u16>; 4],
    pub region: u16,
    /// The index of this span in the whole field; used for the parallel
    /// distance buffer.
    pub(crate) span_index: usize,
}

#[derive(Default, Clone, Debug)]
pub(crate) struct OpenCell {
    pub(crate) spans: SmallVec<[OpenSpan; 1]>,
}

/// Traversable air columns above walkable surfaces, with the 4-way
/// neighbour graph and (after [`super::calculate_distance_field`]) the
/// distance-to-border field.
pub struct OpenHeightfield {
    pub(crate) width: usize,
    pub(crate) depth: usize,
    pub(crate) bound_min: Vec3,
    pub(crate) cells: Vec<OpenCell>, // len = width * depth. Laid out X to Y.
    pub(crate) distances: Box<[u16]>, // One per span, indexed by span_index.
    pub(crate) span_count: usize,
    pub(crate) min_border_distance: u16,
    pub(crate) max_border_distance: u16,
    pub(crate) region_count: u16, // Includes the null region.
}

impl OpenHeightfield {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn span_count(&self) -> usize {
        self.span_count
    }

    /// Number of region IDs in use, the null region included.
    pub fn region_count(&self) -> u16 {
        self.region_count
    }

    pub fn max_border_distance(&self) -> u16 {
        self.max_border_distance
    }

    pub fn spans_at(&self, width_index: usize, depth_index: usize) -> &[OpenSpan] {
        &self.cells[depth_index * self.width + width_index].spans
    }

    pub fn distance_to_border(&self, span: &OpenSpan) -> u16 {
        self.distances[span.span_index]
    }
}

/// Axis neighbour of `span`, with the neighbour's cell index.
pub(crate) fn axis_neighbour<'a>(
    cells: &'a [OpenCell],
    width: usize,
    cell_index: usize,
    span: &OpenSpan,
    dir: Direction,
) -> Option<(usize, &'a OpenSpan)> {
    let span_index = span.neighbours[dir.index()]?;
    let neighbour_cell = neighbour_index(width, cell_index, dir);
    Some((neighbour_cell, &cells[neighbour_cell].spans[span_index as usize]))
}

/// Diagonal neighbours are never stored; they are the axis neighbour `dir`
/// followed by its axis neighbour one rotation clockwise.
pub(crate) fn diagonal_neighbour<'a>(
    cells: &'a [OpenCell],
    width: usize,
    cell_index: usize,
    span: &OpenSpan,
    dir: Direction,
) -> Option<(usize, &'a OpenSpan)> {
    let (neighbour_cell, neighbour) = axis_neighbour(cells, width, cell_index, span, dir)?;
    axis_neighbour(
        cells,
        width,
        neighbour_cell,
        neighbour,
        dir.rotate_clockwise(),
    )
}

/// Rasterizes world triangles into a solid heightfield and classifies span
/// surfaces by slope and clearance.
pub fn build_solid_heightfield(
    vertices: &[Vec3],
    indices: &[u32],
    bound_min: Vec3,
    bound_max: Vec3,
    settings: &NavMeshSettings,
) -> SolidHeightfield {
    let bounds = bound_max - bound_min;
    let width = (bounds.x / settings.cell_size).round().max(1.0) as usize;
    let depth = (bounds.y / settings.cell_size).round().max(1.0) as usize;

    let mut field = SolidHeightfield {
        width,
        depth,
        bound_min,
        cells: vec![VoxelCell::default(); width * depth].into_boxed_slice(),
    };

    let walkable_normal_z = settings.walkable_normal_z();
    let field_height = bounds.z;

    for triangle in indices.chunks_exact(3) {
        let a = vertices[triangle[0] as usize] - bound_min;
        let b = vertices[triangle[1] as usize] - bound_min;
        let c = vertices[triangle[2] as usize] - bound_min;

        process_triangle(&mut field, a, b, c, field_height, walkable_normal_z, settings);
    }

    mark_low_height_spans(&mut field, settings);
    if settings.filter_ledge_spans {
        mark_ledge_spans(&mut field, settings);
    }

    field
}

/// Rasterizes one triangle, already translated into field-local coordinates.
fn process_triangle(
    field: &mut SolidHeightfield,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    field_height: f32,
    walkable_normal_z: f32,
    settings: &NavMeshSettings,
) {
    // Degenerate triangles contribute nothing.
    let Some(normal) = (c - a).cross(b - a).try_normalize() else {
        return;
    };
    let attribute = if normal.z >= walkable_normal_z {
        SpanAttribute::Walkable
    } else {
        SpanAttribute::Unwalkable
    };

    let triangle_min = a.min(b).min(c);
    let triangle_max = a.max(b).max(c);

    // Entirely outside the grid footprint.
    if triangle_max.x < 0.0
        || triangle_max.y < 0.0
        || triangle_min.x > field.width as f32 * settings.cell_size
        || triangle_min.y > field.depth as f32 * settings.cell_size
    {
        return;
    }

    // Cells cover the half-open interval [cell * size, (cell + 1) * size);
    // a triangle ending exactly on a cell boundary does not reach into the
    // next cell.
    let inverse_cell_size = 1.0 / settings.cell_size;
    let width_min = (triangle_min.x * inverse_cell_size).floor() as i32;
    let width_max = (triangle_max.x * inverse_cell_size).ceil() as i32 - 1;
    let depth_min = (triangle_min.y * inverse_cell_size).floor() as i32;
    let depth_max = (triangle_max.y * inverse_cell_size).ceil() as i32 - 1;
    if width_max < width_min || depth_max < depth_min {
        return;
    }

    let width_min = width_min.clamp(0, field.width as i32 - 1);
    let width_max = width_max.clamp(0, field.width as i32 - 1);
    let depth_min = depth_min.clamp(0, field.depth as i32 - 1);
    let depth_max = depth_max.clamp(0, field.depth as i32 - 1);

    for depth_index in depth_min..=depth_max {
        for width_index in width_min..=width_max {
            let cell_min = Vec3::new(
                width_index as f32 * settings.cell_size,
                depth_index as f32 * settings.cell_size,
                0.0,
            );
            let cell_max = Vec3::new(
                cell_min.x + settings.cell_size,
                cell_min.y + settings.cell_size,
                field_height,
            );

            let (clipped, clipped_count) = clip_triangle_to_cell(a, b, c, cell_min, cell_max);
            if clipped_count < 3 {
                continue;
            }

            let mut height_min = clipped[0].z;
            let mut height_max = clipped[0].z;
            for vertex in clipped.iter().take(clipped_count).skip(1) {
                height_min = height_min.min(vertex.z);
                height_max = height_max.max(vertex.z);
            }

            // Entirely outside the vertical bounds of the field.
            if height_max < 0.0 || height_min > field_height {
                continue;
            }
            let height_min = height_min.max(0.0);
            let height_max = height_max.min(field_height);

            let span_min = (height_min / settings.cell_height).floor() as i64;
            let span_max = (height_max / settings.cell_height).ceil() as i64;
            let span_min = span_min.clamp(0, u16::MAX as i64) as u16;
            let span_max = span_max.clamp(0, u16::MAX as i64) as u16;

            let cell = &mut field.cells[depth_index as usize * field.width + width_index as usize];
            add_span(
                cell,
                HeightSpan {
                    min: span_min,
                    max: span_max,
                    attribute,
                },
            );
        }
    }
}

const MAX_CLIPPED_VERTICES: usize = 9; // A triangle gains at most one vertex per clip plane.

/// Sutherland-Hodgman clip of a triangle against the six planes of a cell
/// column, in left/right/top/bottom/front/back order.
fn clip_triangle_to_cell(
    a: Vec3,
    b: Vec3,
    c: Vec3,
    cell_min: Vec3,
    cell_max: Vec3,
) -> ([Vec3; MAX_CLIPPED_VERTICES], usize) {
    let mut vertices = [Vec3::ZERO; MAX_CLIPPED_VERTICES];
    vertices[0] = a;
    vertices[1] = b;
    vertices[2] = c;
    let mut count = 3;

    count = clip_versus_plane(&mut vertices, count, 1, cell_min.y, true); // Left
    count = clip_versus_plane(&mut vertices, count, 1, cell_max.y, false); // Right
    count = clip_versus_plane(&mut vertices, count, 2, cell_max.z, false); // Top
    count = clip_versus_plane(&mut vertices, count, 2, cell_min.z, true); // Bottom
    count = clip_versus_plane(&mut vertices, count, 0, cell_min.x, true); // Front
    count = clip_versus_plane(&mut vertices, count, 0, cell_max.x, false); // Back

    (vertices, count)
}

fn clip_versus_plane(
    vertices: &mut [Vec3; MAX_CLIPPED_VERTICES],
    count: usize,
    axis: usize,
    plane: f32,
    keep_above: bool,
) -> usize {
    if count < 3 {
        return count;
    }

    let inside = |vertex: Vec3| {
        if keep_above {
            vertex[axis] >= plane
        } else {
            vertex[axis] <= plane
        }
    };

    let mut output = [Vec3::ZERO; MAX_CLIPPED_VERTICES];
    let mut output_count = 0;

    let mut previous = vertices[count - 1];
    for &current in vertices.iter().take(count) {
        match (inside(previous), inside(current)) {
            (true, true) => {
                output[output_count] = current;
                output_count += 1;
            }
            (true, false) => {
                output[output_count] = plane_intersection(previous, current, axis, plane);
                output_count += 1;
            }
            (false, true) => {
                output[output_count] = plane_intersection(previous, current, axis, plane);
                output_count += 1;
                output[output_count] = current;
                output_count += 1;
            }
            (false, false) => {}
        }
        previous = current;
    }

    *vertices = output;
    output_count
}

fn plane_intersection(from: Vec3, to: Vec3, axis: usize, plane: f32) -> Vec3 {
    let slide = (plane - from[axis]) / (to[axis] - from[axis]);
    from + (to - from) * slide
}

/// Inserts a span into a column, merging with overlapping or touching spans.
///
/// When the new span's top matches the merged top, the new surface wins and
/// its attribute replaces the old one; a span buried below an existing
/// surface leaves that surface untouched.
fn add_span(cell: &mut VoxelCell, new_span: HeightSpan) {
    let spans = &mut cell.spans;

    let mut index = 0;
    while index < spans.len() {
        if u32::from(spans[index].min) > u32::from(new_span.max) + 1 {
            // The new span sits entirely below this one.
            spans.insert(index, new_span);
            return;
        }
        if u32::from(spans[index].max) + 1 < u32::from(new_span.min) {
            // This span sits entirely below the new one.
            index += 1;
            continue;
        }

        // Overlap or adjacency: merge into the existing span.
        if new_span.min < spans[index].min {
            spans[index].min = new_span.min;
        }
        if new_span.max == spans[index].max {
            spans[index].attribute = new_span.attribute;
            return;
        }
        if spans[index].max > new_span.max {
            // The existing surface lies above the new span and takes priority.
            return;
        }

        // The new span extends past the existing top; absorb every span it
        // now reaches.
        let mut next = index + 1;
        loop {
            if next >= spans.len() || u32::from(spans[next].min) > u32::from(new_span.max) + 1 {
                spans[index].max = new_span.max;
                spans[index].attribute = new_span.attribute;
                spans.drain(index + 1..next);
                return;
            }
            if u32::from(spans[next].min) == u32::from(new_span.max) + 1
                || new_span.max <= spans[next].max
            {
                spans[index].max = spans[next].max;
                spans[index].attribute = if new_span.max == spans[next].max {
                    new_span.attribute
                } else {
                    spans[next].attribute
                };
                spans.drain(index + 1..=next);
                return;
            }
            // The next span is swallowed whole; keep scanning upward.
            next += 1;
        }
    }

    spans.push(new_span);
}

/// Marks walkable spans without enough clearance to the span above.
fn mark_low_height_spans(field: &mut SolidHeightfield, settings: &NavMeshSettings) {
    for cell in field.cells.iter_mut() {
        for index in 0..cell.spans.len() {
            let span = &cell.spans[index];
            if span.attribute == SpanAttribute::Unwalkable {
                continue;
            }

            let clearance = match cell.spans.get(index + 1) {
                Some(next) => f32::from(next.min - span.max) * settings.cell_height,
                None => f32::INFINITY,
            };
            if clearance < settings.min_traversable_height {
                cell.spans[index].attribute = SpanAttribute::Unwalkable;
            }
        }
    }
}

/// Marks walkable spans bordering a drop deeper than the traversable step.
///
/// A missing neighbour column counts as a ledge.
fn mark_ledge_spans(field: &mut SolidHeightfield, settings: &NavMeshSettings) {
    for cell_index in 0..field.cells.len() {
        for span_index in 0..field.cells[cell_index].spans.len() {
            let span = &field.cells[cell_index].spans[span_index];
            if span.attribute == SpanAttribute::Unwalkable {
                continue;
            }

            let current_floor = i32::from(span.max);
            let current_ceiling = field.cells[cell_index]
                .spans
                .get(span_index + 1)
                .map_or(i32::MAX, |next| i32::from(next.min));

            let mut minimum_drop = f32::INFINITY;
            let mut on_field_edge = false;

            for dir in Direction::ALL {
                let Some(neighbour_index) =
                    checked_neighbour_index(field.width, field.depth, cell_index, dir)
                else {
                    on_field_edge = true;
                    break;
                };
                let neighbour_cell = &field.cells[neighbour_index];
                if neighbour_cell.spans.is_empty() {
                    on_field_edge = true;
                    break;
                }

                for (neighbour_span_index, neighbour_span) in
                    neighbour_cell.spans.iter().enumerate()
                {
                    let neighbour_floor = i32::from(neighbour_span.max);
                    let neighbour_ceiling = neighbour_cell
                        .spans
                        .get(neighbour_span_index + 1)
                        .map_or(i32::MAX, |next| i32::from(next.min));

                    let shared_clearance = (current_ceiling.min(neighbour_ceiling)
                        - current_floor.max(neighbour_floor))
                        as f32
                        * settings.cell_height;
                    if shared_clearance > settings.min_traversable_height {
                        minimum_drop = minimum_drop
                            .min((neighbour_floor - current_floor) as f32 * settings.cell_height);
                    }
                }
            }

            if on_field_edge || minimum_drop < -settings.max_traversable_step {
                field.cells[cell_index].spans[span_index].attribute = SpanAttribute::Unwalkable;
            }
        }
    }
}

/// Derives traversable air columns above walkable spans and links each to
/// its reachable axis neighbours. Consumes the solid heightfield; it is no
/// longer needed afterwards.
pub fn build_open_heightfield(
    solid_heightfield: SolidHeightfield,
    settings: &NavMeshSettings,
) -> OpenHeightfield {
    let mut cells = vec![OpenCell::default(); solid_heightfield.cells.len()];

    for (cell_index, cell) in solid_heightfield
        .cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.spans.is_empty())
    {
        let open_spans = &mut cells[cell_index].spans;

        for (span_index, span) in cell.spans.iter().enumerate() {
            if span.attribute == SpanAttribute::Unwalkable {
                continue;
            }

            let floor = span.max;
            let ceiling = cell.spans.get(span_index + 1).map(|next| next.min);
            let clearance = match ceiling {
                Some(ceiling) => f32::from(ceiling - floor) * settings.cell_height,
                None => f32::INFINITY,
            };
            if clearance < settings.min_traversable_height {
                continue;
            }

            open_spans.push(OpenSpan {
                min: floor,
                max: ceiling,
                ..Default::default()
            });
        }
    }

    // Assign field-wide span indices.
    let mut span_count = 0;
    for cell in cells.iter_mut() {
        for span in cell.spans.iter_mut() {
            span.span_index = span_count;
            span_count += 1;
        }
    }

    let mut field = OpenHeightfield {
        width: solid_heightfield.width,
        depth: solid_heightfield.depth,
        bound_min: solid_heightfield.bound_min,
        cells,
        distances: vec![REGION_MAX_BORDER; span_count].into_boxed_slice(),
        span_count,
        min_border_distance: 0,
        max_border_distance: 0,
        region_count: 0,
    };

    link_neighbours(&mut field, settings);

    field
}

/// For every span and axis direction, finds the one neighbour span (if any)
/// with enough shared vertical clearance and a climbable step.
fn link_neighbours(field: &mut OpenHeightfield, settings: &NavMeshSettings) {
    let mut neighbour_spans = Vec::with_capacity(3);

    for cell_index in 0..field.cells.len() {
        if field.cells[cell_index].spans.is_empty() {
            continue;
        }

        for dir in Direction::ALL {
            let Some(neighbour_cell) =
                checked_neighbour_index(field.width, field.depth, cell_index, dir)
            else {
                continue;
            };

            neighbour_spans.clear();
            neighbour_spans.extend(
                field.cells[neighbour_cell]
                    .spans
                    .iter()
                    .map(|span| (span.min, span.max)),
            );

            for span in field.cells[cell_index].spans.iter_mut() {
                for (neighbour_index, (neighbour_min, neighbour_max)) in
                    neighbour_spans.iter().enumerate()
                {
                    let shared_floor = i32::from(span.min.max(*neighbour_min));
                    let shared_ceiling = match (span.max, neighbour_max) {
                        (Some(own), Some(other)) => i32::from(own.min(*other)),
                        (Some(own), None) => i32::from(own),
                        (None, Some(other)) => i32::from(*other),
                        (None, None) => i32::MAX,
                    };
                    let clearance =
                        (shared_ceiling - shared_floor) as f32 * settings.cell_height;
                    let step =
                        f32::from(span.min.abs_diff(*neighbour_min)) * settings.cell_height;

                    if clearance >= settings.min_traversable_height
                        && step <= settings.max_traversable_step
                    {
                        span.neighbours[dir.index()] = Some(neighbour_index as u16);
                        break;
                    }
                }
            }
        }
    }
}

/// Computes each span's distance to the nearest null border using two
/// row-major sweeps with a uniform +2 step for axis and diagonal moves,
/// then optionally smooths the field with a box blur.
pub fn calculate_distance_field(field: &mut OpenHeightfield, settings: &NavMeshSettings) {
    let width = field.width;
    let cells = &field.cells;
    let distances = &mut field.distances;

    // A span missing any of its eight neighbours borders the null region.
    for (cell_index, cell) in cells.iter().enumerate() {
        for span in cell.spans.iter() {
            let is_border = Direction::ALL.iter().any(|&dir| {
                axis_neighbour(cells, width, cell_index, span, dir).is_none()
                    || diagonal_neighbour(cells, width, cell_index, span, dir).is_none()
            });

            distances[span.span_index] = if is_border { 0 } else { REGION_MAX_BORDER };
        }
    }

    // Pass 1.
    for (cell_index, cell) in cells.iter().enumerate() {
        for span in cell.spans.iter() {
            if distances[span.span_index] == 0 {
                continue;
            }

            if let Some(minimum) = minimum_neighbour_distance(cells, width, cell_index, span, distances) {
                distances[span.span_index] = minimum + 2;
            }
        }
    }

    // Pass 2, reversed. A single sweep cannot settle distances on every
    // approach direction; after this one no sentinel values remain.
    let mut max_border_distance = 0;
    let mut min_border_distance = field.min_border_distance;
    for (cell_index, cell) in cells.iter().enumerate().rev() {
        for span in cell.spans.iter() {
            if distances[span.span_index] == 0 {
                continue;
            }

            if let Some(minimum) = minimum_neighbour_distance(cells, width, cell_index, span, distances) {
                distances[span.span_index] = minimum + 2;
            }

            min_border_distance = min_border_distance.min(distances[span.span_index]);
            max_border_distance = max_border_distance.max(distances[span.span_index]);
        }
    }

    field.min_border_distance = min_border_distance;
    field.max_border_distance = max_border_distance;

    if settings.smoothing_threshold > 0 {
        box_blur(field, settings.smoothing_threshold);
    }
}

/// Smallest distance among the up-to-eight neighbours of `span`.
fn minimum_neighbour_distance(
    cells: &[OpenCell],
    width: usize,
    cell_index: usize,
    span: &OpenSpan,
    distances: &[u16],
) -> Option<u16> {
    let mut minimum = u16::MAX;
    let mut any = false;

    for dir in Direction::ALL {
        let Some((neighbour_cell, neighbour)) = axis_neighbour(cells, width, cell_index, span, dir)
        else {
            continue;
        };
        minimum = minimum.min(distances[neighbour.span_index]);
        any = true;

        if let Some((_, diagonal)) = axis_neighbour(
            cells,
            width,
            neighbour_cell,
            neighbour,
            dir.rotate_clockwise(),
        ) {
            minimum = minimum.min(distances[diagonal.span_index]);
        }
    }

    any.then_some(minimum)
}

/// Radius-1 box blur over the distance field. Distances at or below the
/// threshold are kept verbatim so borders stay crisp.
fn box_blur(field: &mut OpenHeightfield, threshold: u16) {
    let width = field.width;
    let cells = &field.cells;

    let mut blurred = vec![0; field.distances.len()].into_boxed_slice();

    for (cell_index, cell) in cells.iter().enumerate() {
        for span in cell.spans.iter() {
            let distance = field.distances[span.span_index];
            if distance <= threshold {
                blurred[span.span_index] = distance;
                continue;
            }

            let mut total = u32::from(distance);
            for dir in Direction::ALL {
                let Some((neighbour_cell, neighbour)) =
                    axis_neighbour(cells, width, cell_index, span, dir)
                else {
                    // The span itself substitutes for the axis neighbour and
                    // its diagonal.
                    total += u32::from(distance) * 2;
                    continue;
                };

                total += u32::from(field.distances[neighbour.span_index]);

                match axis_neighbour(
                    cells,
                    width,
                    neighbour_cell,
                    neighbour,
                    dir.rotate_clockwise(),
                ) {
                    Some((_, diagonal)) => {
                        total += u32::from(field.distances[diagonal.span_index]);
                    }
                    None => total += u32::from(distance),
                }
            }

            blurred[span.span_index] = ((total + 5) / 9) as u16;
        }
    }

    field.distances = blurred;
}
