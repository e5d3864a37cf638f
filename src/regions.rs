use tracing::debug;

use crate::heightfields::{axis_neighbour, diagonal_neighbour, OpenHeightfield};

use super::{neighbour_index, Direction, NavMeshSettings, NULL_REGION};

const MAX_WALK_STEPS: usize = u16::MAX as usize;

#[derive(Clone, Copy)]
struct FloodedSpan {
    cell_index: usize,
    span_index: usize,
    field_index: usize,
}

/// Partitions the open heightfield into regions by flooding the distance
/// field from its peaks downwards, then cleans up small regions and jagged
/// borders. Region IDs are written into the spans; 0 stays the null region.
pub fn build_regions(field: &mut OpenHeightfield, settings: &NavMeshSettings) {
    let mut regions = vec![NULL_REGION; field.span_count];
    let mut core_distances = vec![0u16; field.span_count];

    let min_dist =
        u32::from(settings.traversable_area_border_size) + u32::from(field.min_border_distance);
    let expand_iterations = 4 + u32::from(settings.traversable_area_border_size) * 2;

    let mut next_region_id: u16 = 1;
    let mut level = u32::from(field.max_border_distance);

    let mut flooded: Vec<FloodedSpan> = Vec::with_capacity(256);
    let mut stack: Vec<FloodedSpan> = Vec::with_capacity(256);

    // Drain the "water level" from the highest distance downwards. Each
    // local maximum seeds a region; lower spans join existing regions.
    while level > min_dist {
        collect_unassigned_spans(field, &regions, level as u16, &mut flooded);

        if next_region_id > 1 {
            let max_iterations = (level > 0).then_some(expand_iterations);
            expand_regions(
                field,
                settings,
                &mut regions,
                &mut core_distances,
                &flooded,
                max_iterations,
            );
        }

        // Seed new regions from spans no existing region could claim.
        for index in 0..flooded.len() {
            let entry = flooded[index];
            if regions[entry.field_index] != NULL_REGION {
                continue;
            }

            let fill_to = level.saturating_sub(2).max(min_dist) as u16;
            if flood_new_region(
                field,
                entry,
                fill_to,
                next_region_id,
                &mut regions,
                &mut core_distances,
                &mut stack,
            ) {
                next_region_id += 1;
            }
        }

        level = level
            .saturating_sub(2)
            .max(u32::from(field.min_border_distance));
    }

    // Everything still unassigned above the minimum joins a neighbouring
    // region where possible.
    collect_unassigned_spans(field, &regions, min_dist as u16, &mut flooded);
    let max_iterations = (min_dist > 0).then_some(expand_iterations * 8);
    expand_regions(
        field,
        settings,
        &mut regions,
        &mut core_distances,
        &flooded,
        max_iterations,
    );

    let region_count = handle_small_regions(field, &mut regions, next_region_id, settings);
    reassign_border_spans(field, &mut regions);

    // Write results into spans.
    for cell in field.cells.iter_mut() {
        for span in cell.spans.iter_mut() {
            span.region = regions[span.span_index];
        }
    }
    field.region_count = region_count;

    debug!(
        regions = usize::from(region_count),
        spans = field.span_count,
        "region segmentation complete"
    );
}

/// Unassigned spans at or above the given distance, in row-major order.
fn collect_unassigned_spans(
    field: &OpenHeightfield,
    regions: &[u16],
    level: u16,
    flooded: &mut Vec<FloodedSpan>,
) {
    flooded.clear();
    for (cell_index, cell) in field.cells.iter().enumerate() {
        for (span_index, span) in cell.spans.iter().enumerate() {
            if regions[span.span_index] == NULL_REGION && field.distances[span.span_index] >= level
            {
                flooded.push(FloodedSpan {
                    cell_index,
                    span_index,
                    field_index: span.span_index,
                });
            }
        }
    }
}

/// Repeatedly assigns flooded spans to the neighbouring region whose core
/// lies closest, until a full pass assigns nothing or the iteration cap is
/// reached. `None` iterates without a cap.
fn expand_regions(
    field: &OpenHeightfield,
    settings: &NavMeshSettings,
    regions: &mut [u16],
    core_distances: &mut [u16],
    flooded: &[FloodedSpan],
    max_iterations: Option<u32>,
) {
    if flooded.is_empty() {
        return;
    }

    let mut iteration = 0;
    loop {
        let mut skipped = 0;

        for entry in flooded.iter() {
            if regions[entry.field_index] != NULL_REGION {
                skipped += 1;
                continue;
            }

            let mut new_region = NULL_REGION;
            let mut core_distance = u32::MAX;
            let span = &field.cells[entry.cell_index].spans[entry.span_index];

            for dir in Direction::ALL {
                let Some((neighbour_cell, neighbour)) =
                    axis_neighbour(&field.cells, field.width, entry.cell_index, span, dir)
                else {
                    continue;
                };

                let neighbour_region = regions[neighbour.span_index];
                if neighbour_region == NULL_REGION {
                    continue;
                }
                if u32::from(core_distances[neighbour.span_index]) + 2 >= core_distance {
                    continue;
                }

                if settings.use_conservative_expansion {
                    // The neighbour needs at least two more neighbours in its
                    // own region, or the expansion grows single-voxel lines.
                    let mut same_region = 0;
                    for neighbour_dir in Direction::ALL {
                        let Some((_, next_neighbour)) = axis_neighbour(
                            &field.cells,
                            field.width,
                            neighbour_cell,
                            neighbour,
                            neighbour_dir,
                        ) else {
                            continue;
                        };
                        if regions[next_neighbour.span_index] == neighbour_region {
                            same_region += 1;
                        }
                    }
                    if same_region < 2 {
                        continue;
                    }
                }

                new_region = neighbour_region;
                core_distance = u32::from(core_distances[neighbour.span_index]) + 2;
            }

            if new_region != NULL_REGION {
                regions[entry.field_index] = new_region;
                core_distances[entry.field_index] = core_distance as u16;
            } else {
                skipped += 1;
            }
        }

        if skipped == flooded.len() {
            break;
        }
        if let Some(max_iterations) = max_iterations {
            iteration += 1;
            if iteration > max_iterations {
                break;
            }
        }
    }
}

/// Breadth-first flood of a new region from `root` across spans with
/// distance >= `fill_to`. Spans that turn out to border another region are
/// returned to the null region. Returns whether any span was claimed.
fn flood_new_region(
    field: &OpenHeightfield,
    root: FloodedSpan,
    fill_to: u16,
    region_id: u16,
    regions: &mut [u16],
    core_distances: &mut [u16],
    stack: &mut Vec<FloodedSpan>,
) -> bool {
    stack.clear();
    stack.push(root);
    regions[root.field_index] = region_id;
    core_distances[root.field_index] = 0;

    let mut claimed = 0;
    let mut head = 0;

    while head < stack.len() {
        let entry = stack[head];
        head += 1;

        let span = &field.cells[entry.cell_index].spans[entry.span_index];

        let mut borders_other_region = false;
        for dir in Direction::ALL {
            if let Some((_, neighbour)) =
                axis_neighbour(&field.cells, field.width, entry.cell_index, span, dir)
            {
                let neighbour_region = regions[neighbour.span_index];
                if neighbour_region != NULL_REGION && neighbour_region != region_id {
                    borders_other_region = true;
                    break;
                }
            } else {
                continue;
            }

            if let Some((_, diagonal)) =
                diagonal_neighbour(&field.cells, field.width, entry.cell_index, span, dir)
            {
                let diagonal_region = regions[diagonal.span_index];
                if diagonal_region != NULL_REGION && diagonal_region != region_id {
                    borders_other_region = true;
                    break;
                }
            }
        }

        if borders_other_region {
            regions[entry.field_index] = NULL_REGION;
            continue;
        }
        claimed += 1;

        for dir in Direction::ALL {
            let Some(neighbour_span) = span.neighbours[dir.index()] else {
                continue;
            };
            let neighbour_cell = neighbour_index(field.width, entry.cell_index, dir);
            let neighbour = &field.cells[neighbour_cell].spans[neighbour_span as usize];

            if field.distances[neighbour.span_index] >= fill_to
                && regions[neighbour.span_index] == NULL_REGION
            {
                regions[neighbour.span_index] = region_id;
                core_distances[neighbour.span_index] = 0;
                stack.push(FloodedSpan {
                    cell_index: neighbour_cell,
                    span_index: neighbour_span as usize,
                    field_index: neighbour.span_index,
                });
            }
        }
    }

    claimed > 0
}

struct Region {
    id: u16,
    span_count: usize,
    remap: bool,
    connections: Vec<u16>,
    overlaps: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Region {
            id,
            span_count: 0,
            remap: false,
            connections: Vec::new(),
            overlaps: Vec::new(),
        }
    }

    fn reset(&mut self, new_id: u16) {
        self.id = new_id;
        self.span_count = 0;
        self.connections.clear();
        self.overlaps.clear();
    }
}

/// Removes small island regions, merges small regions into neighbours, and
/// compacts the surviving IDs into a contiguous range. Returns the new
/// region count (null region included).
fn handle_small_regions(
    field: &OpenHeightfield,
    regions: &mut [u16],
    region_count: u16,
    settings: &NavMeshSettings,
) -> u16 {
    // Only the null region exists.
    if region_count < 2 {
        return region_count.max(1);
    }

    let mut region_data: Vec<Region> = (0..region_count).map(Region::new).collect();
    gather_region_data(field, regions, &mut region_data);
    remove_small_unconnected_regions(
        &mut region_data,
        settings.clamped_min_unconnected_region_size() as usize,
    );
    merge_small_regions(&mut region_data, settings.min_merge_region_size as usize);

    // Compact surviving region IDs.
    for region in region_data.iter_mut() {
        region.remap = region.id != NULL_REGION;
    }
    let mut next_id = 0;
    for index in 0..region_data.len() {
        if !region_data[index].remap {
            continue;
        }
        next_id += 1;

        let old_id = region_data[index].id;
        for region in region_data.iter_mut() {
            if region.id == old_id {
                region.id = next_id;
                region.remap = false;
            }
        }
    }

    // Spans still carry pre-merge IDs; the slot at that index knows the
    // final one.
    for region in regions.iter_mut() {
        *region = region_data[*region as usize].id;
    }

    next_id + 1
}

fn gather_region_data(field: &OpenHeightfield, regions: &[u16], region_data: &mut [Region]) {
    for (cell_index, cell) in field.cells.iter().enumerate() {
        for (span_index, span) in cell.spans.iter().enumerate() {
            let region_id = regions[span.span_index];
            if region_id == NULL_REGION {
                continue;
            }

            region_data[region_id as usize].span_count += 1;

            // Regions lying above this span in the same column must never be
            // merged with it.
            for other_span in cell.spans.iter().skip(span_index + 1) {
                let other_region = regions[other_span.span_index];
                if other_region == NULL_REGION {
                    continue;
                }
                add_unique(&mut region_data[region_id as usize].overlaps, other_region);
            }

            // The connection ring has already been traced from another span.
            if !region_data[region_id as usize].connections.is_empty() {
                continue;
            }

            let edge_direction = Direction::ALL.into_iter().find(|&dir| {
                match axis_neighbour(&field.cells, field.width, cell_index, span, dir) {
                    Some((_, neighbour)) => regions[neighbour.span_index] != region_id,
                    None => true,
                }
            });
            if let Some(dir) = edge_direction {
                let mut connections =
                    std::mem::take(&mut region_data[region_id as usize].connections);
                find_region_connections(field, regions, cell_index, span_index, dir, &mut connections);
                region_data[region_id as usize].connections = connections;
            }
        }
    }
}

/// Walks the region edge clockwise from a border span, recording the
/// sequence of bordering region IDs (null region included).
fn find_region_connections(
    field: &OpenHeightfield,
    regions: &[u16],
    start_cell: usize,
    start_span: usize,
    start_dir: Direction,
    connections: &mut Vec<u16>,
) {
    let mut cell_index = start_cell;
    let mut span_index = start_span;
    let mut dir = start_dir;

    let span = &field.cells[cell_index].spans[span_index];
    let mut last_edge_region = axis_neighbour(&field.cells, field.width, cell_index, span, dir)
        .map_or(NULL_REGION, |(_, neighbour)| regions[neighbour.span_index]);
    connections.push(last_edge_region);

    for _ in 0..MAX_WALK_STEPS {
        let span = &field.cells[cell_index].spans[span_index];
        let neighbour = axis_neighbour(&field.cells, field.width, cell_index, span, dir);
        let is_edge = match neighbour {
            Some((_, neighbour)) => regions[neighbour.span_index] != regions[span.span_index],
            None => true,
        };

        if is_edge {
            let current_edge_region =
                neighbour.map_or(NULL_REGION, |(_, neighbour)| regions[neighbour.span_index]);
            if current_edge_region != last_edge_region {
                connections.push(current_edge_region);
                last_edge_region = current_edge_region;
            }
            dir = dir.rotate_clockwise();
        } else {
            let Some(next_span) = span.neighbours[dir.index()] else {
                break;
            };
            span_index = next_span as usize;
            cell_index = neighbour_index(field.width, cell_index, dir);
            dir = dir.rotate_counter_clockwise();
        }

        if cell_index == start_cell && span_index == start_span && dir == start_dir {
            break;
        }
    }

    // The walk may rediscover its first edge last.
    if connections.len() > 1 && connections.first() == connections.last() {
        connections.pop();
    }
}

/// Island regions below the size threshold dissolve into the null region.
fn remove_small_unconnected_regions(region_data: &mut [Region], min_unconnected_size: usize) {
    for region in region_data.iter_mut().skip(1) {
        if region.span_count == 0 {
            continue;
        }

        let only_null_connection =
            region.connections.len() == 1 && region.connections[0] == NULL_REGION;
        if only_null_connection && region.span_count < min_unconnected_size {
            region.reset(NULL_REGION);
        }
    }
}

/// Merges small regions into their smallest eligible neighbour until no
/// merge applies.
fn merge_small_regions(region_data: &mut [Region], min_merge_size: usize) {
    loop {
        let mut merged_any = false;

        for region_index in 0..region_data.len() {
            {
                let region = &region_data[region_index];
                if region.id == NULL_REGION
                    || region.span_count == 0
                    || region.span_count > min_merge_size
                {
                    continue;
                }
            }

            // Smallest connected region this one may merge into.
            let mut smallest_size = usize::MAX;
            let mut merge_target: Option<usize> = None;
            {
                let region = &region_data[region_index];
                for &connection in region.connections.iter() {
                    if connection == NULL_REGION || connection == region.id {
                        continue;
                    }
                    let other = &region_data[connection as usize];
                    if other.id == NULL_REGION || other.span_count == 0 {
                        continue;
                    }
                    if other.span_count < smallest_size
                        && can_merge(region, other)
                        && can_merge(other, region)
                    {
                        smallest_size = other.span_count;
                        merge_target = Some(connection as usize);
                    }
                }
            }

            let Some(target_index) = merge_target else {
                continue;
            };
            if !merge_region_into(region_data, region_index, target_index) {
                continue;
            }

            let old_id = region_data[region_index].id;
            let new_id = region_data[target_index].id;
            region_data[region_index].reset(new_id);

            // Repoint every other region at the merged ID.
            for region in region_data.iter_mut() {
                if region.id == NULL_REGION {
                    continue;
                }
                if region.id == old_id {
                    region.id = new_id;
                } else {
                    replace_neighbour_region(region, old_id, new_id);
                }
            }
            merged_any = true;
        }

        if !merged_any {
            break;
        }
    }
}

/// Regions qualify for merging when they share exactly one edge and do not
/// overlap vertically.
fn can_merge(region: &Region, other: &Region) -> bool {
    let shared_edges = region
        .connections
        .iter()
        .filter(|&&connection| connection == other.id)
        .count();

    shared_edges == 1 && !region.overlaps.contains(&other.id) && !other.overlaps.contains(&region.id)
}

/// Splices `source`'s connection ring into `target`'s at their shared edge
/// and folds its span count and overlap set in.
fn merge_region_into(region_data: &mut [Region], source: usize, target: usize) -> bool {
    let source_id = region_data[source].id;
    let target_id = region_data[target].id;

    let Some(point_on_target) = region_data[target]
        .connections
        .iter()
        .position(|&connection| connection == source_id)
    else {
        return false;
    };
    let Some(point_on_source) = region_data[source]
        .connections
        .iter()
        .position(|&connection| connection == target_id)
    else {
        return false;
    };

    let source_connections = region_data[source].connections.clone();
    let source_overlaps = region_data[source].overlaps.clone();
    let source_span_count = region_data[source].span_count;

    let old_target_connections = std::mem::take(&mut region_data[target].connections);
    let target = &mut region_data[target];

    let size = old_target_connections.len();
    for offset in 0..size.saturating_sub(1) {
        target
            .connections
            .push(old_target_connections[(point_on_target + 1 + offset) % size]);
    }
    let size = source_connections.len();
    for offset in 0..size.saturating_sub(1) {
        target
            .connections
            .push(source_connections[(point_on_source + 1 + offset) % size]);
    }
    remove_adjacent_duplicate_connections(&mut target.connections);

    for overlap in source_overlaps {
        add_unique(&mut target.overlaps, overlap);
    }
    target.span_count += source_span_count;

    true
}

fn replace_neighbour_region(region: &mut Region, old_id: u16, new_id: u16) {
    let mut connection_changed = false;
    for connection in region.connections.iter_mut() {
        if *connection == old_id {
            *connection = new_id;
            connection_changed = true;
        }
    }
    for overlap in region.overlaps.iter_mut() {
        if *overlap == old_id {
            *overlap = new_id;
        }
    }
    if connection_changed {
        remove_adjacent_duplicate_connections(&mut region.connections);
    }
}

fn remove_adjacent_duplicate_connections(connections: &mut Vec<u16>) {
    let mut index = 0;
    while connections.len() > 1 && index < connections.len() {
        let next = (index + 1) % connections.len();
        if connections[index] == connections[next] {
            connections.remove(next);
        } else {
            index += 1;
        }
    }
}

fn add_unique(values: &mut Vec<u16>, value: u16) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Smooths jagged region borders: a span flips to an adjacent region when
/// that region also owns one of its perpendicular neighbours. Iterates
/// until stable.
fn reassign_border_spans(field: &OpenHeightfield, regions: &mut [u16]) {
    let mut changed = true;
    while changed {
        changed = false;

        for (cell_index, cell) in field.cells.iter().enumerate() {
            for span in cell.spans.iter() {
                if regions[span.span_index] == NULL_REGION {
                    continue;
                }

                for dir in Direction::ALL {
                    let Some((_, adjacent)) =
                        axis_neighbour(&field.cells, field.width, cell_index, span, dir)
                    else {
                        continue;
                    };
                    let adjacent_region = regions[adjacent.span_index];
                    if adjacent_region == NULL_REGION
                        || adjacent_region == regions[span.span_index]
                    {
                        continue;
                    }

                    let clockwise = axis_neighbour(
                        &field.cells,
                        field.width,
                        cell_index,
                        span,
                        dir.rotate_clockwise(),
                    )
                    .map(|(_, neighbour)| regions[neighbour.span_index]);
                    let counter_clockwise = axis_neighbour(
                        &field.cells,
                        field.width,
                        cell_index,
                        span,
                        dir.rotate_counter_clockwise(),
                    )
                    .map(|(_, neighbour)| regions[neighbour.span_index]);

                    if clockwise == Some(adjacent_region)
                        || counter_clockwise == Some(adjacent_region)
                    {
                        regions[span.span_index] = adjacent_region;
                        changed = true;
                        break;
                    }
                }
            }
        }
    }
}
