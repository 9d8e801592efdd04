//! Strahler stream ordering
//!
//! Segments the thresholded D8 stream network at junctions and orders
//! the segments by the Strahler rule:
//! - Headwater segments are order 1
//! - When two tributaries of equal order merge, the order rises by one
//! - A lower-order tributary joining a higher keeps the higher order
//!
//! Each segment becomes one line feature running upstream to downstream,
//! carrying the order, a river id that threads connected watercourses
//! together, and endpoint diagnostics (accumulation, elevation drop,
//! pixel coordinates).

use geo_types::{Geometry, LineString};
use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::vector::{AttributeValue, Feature, FeatureCollection, FieldKind, FieldSpec};
use routedem_core::{Error, Result};
use std::collections::VecDeque;

/// D8 neighbor offsets matching direction encoding (1=E, 2=NE, ..., 8=SE)
const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Attribute schema of the Strahler stream layer
pub const STRAHLER_FIELDS: [FieldSpec; 12] = [
    FieldSpec::new("order", FieldKind::Integer),
    FieldSpec::new("river_id", FieldKind::Integer),
    FieldSpec::new("drop_distance", FieldKind::Real),
    FieldSpec::new("outlet", FieldKind::Integer),
    FieldSpec::new("us_fa", FieldKind::Real),
    FieldSpec::new("ds_fa", FieldKind::Real),
    FieldSpec::new("thresh_flow_accum", FieldKind::Real),
    FieldSpec::new("upstream_d8_dir", FieldKind::Integer),
    FieldSpec::new("us_x", FieldKind::Integer),
    FieldSpec::new("us_y", FieldKind::Integer),
    FieldSpec::new("ds_x", FieldKind::Integer),
    FieldSpec::new("ds_y", FieldKind::Integer),
];

/// Parameters for Strahler stream extraction
#[derive(Debug, Clone)]
pub struct StrahlerParams {
    /// Flow accumulation threshold defining the stream network
    pub threshold: f64,
    /// Strahler order at which a watercourse counts as a river.
    /// Below it, tributaries share the downstream segment's river id at a
    /// junction; at or above it, only the main stem (larger accumulation)
    /// keeps the id and other tributaries start new rivers.
    pub river_order: u32,
}

impl Default for StrahlerParams {
    fn default() -> Self {
        Self {
            threshold: 1000.0,
            river_order: 5,
        }
    }
}

/// One stream segment between network junctions.
///
/// `cells` runs upstream to downstream and holds only the segment's own
/// cells; a junction cell belongs to the segment downstream of it.
#[derive(Debug, Clone)]
pub struct StreamSegment {
    /// Segment label, 1-based, assigned in row-major order of start cells
    pub id: u32,
    /// Strahler order (uniform along the segment)
    pub order: u32,
    /// River id threaded upstream from the outlets
    pub river_id: u32,
    /// Segment cells as (row, col), upstream first
    pub cells: Vec<(usize, usize)>,
    /// Id of the segment this one drains into, None at network ends
    pub downstream: Option<u32>,
    /// True when the segment leaves the network (grid edge, pit, or
    /// sub-threshold downstream cell)
    pub outlet: bool,
    /// Flow accumulation at the upstream endpoint
    pub us_fa: f64,
    /// Flow accumulation at the downstream endpoint
    pub ds_fa: f64,
    /// Elevation loss along the segment on the filled DEM
    pub drop_distance: f64,
    /// D8 code of the upstream endpoint
    pub upstream_d8_dir: u8,
}

/// Extract ordered stream segments from D8 routing products.
///
/// The network is the set of cells with accumulation at or above
/// `params.threshold`. Segments break at junction cells (two or more
/// stream inflows); the junction cell starts the downstream segment.
///
/// # Arguments
/// * `flow_dir` - D8 flow direction raster
/// * `flow_accum` - D8 flow accumulation raster
/// * `filled_dem` - Pit-filled DEM (for per-segment elevation drop)
/// * `params` - Threshold and river order
///
/// # Returns
/// Segments sorted by id
pub fn strahler_segments(
    flow_dir: &Raster<u8>,
    flow_accum: &Raster<f64>,
    filled_dem: &Raster<f64>,
    params: &StrahlerParams,
) -> Result<Vec<StreamSegment>> {
    let (rows, cols) = flow_dir.shape();
    for (ar, ac) in [flow_accum.shape(), filled_dem.shape()] {
        if (ar, ac) != (rows, cols) {
            return Err(Error::SizeMismatch { er: rows, ec: cols, ar, ac });
        }
    }

    // Stream mask from the threshold
    let mut mask = Array2::<u8>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            let acc = unsafe { flow_accum.get_unchecked(row, col) };
            if !acc.is_nan() && acc >= params.threshold {
                mask[(row, col)] = 1;
            }
        }
    }

    // Stream in-degree: how many stream cells flow into each stream cell
    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            if mask[(row, col)] == 0 {
                continue;
            }
            if let Some((nr, nc)) = downstream_cell(flow_dir, row, col, rows, cols) {
                if mask[(nr, nc)] > 0 {
                    in_degree[(nr, nc)] += 1;
                }
            }
        }
    }

    let order = cell_orders(flow_dir, &mask, &in_degree, rows, cols);

    // Segment starts: sources (no stream inflow) and junctions (two or more)
    let mut start_ids = Array2::<u32>::zeros((rows, cols));
    let mut starts: Vec<(usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if mask[(row, col)] > 0 && in_degree[(row, col)] != 1 {
                starts.push((row, col));
                start_ids[(row, col)] = starts.len() as u32;
            }
        }
    }

    // Walk each segment from its start until the next junction or the
    // network end
    let max_steps = rows * cols;
    let mut segments: Vec<StreamSegment> = Vec::with_capacity(starts.len());

    for (seg_idx, &(sr, sc)) in starts.iter().enumerate() {
        let id = (seg_idx + 1) as u32;
        let mut cells = vec![(sr, sc)];
        let mut downstream = None;
        let mut outlet = false;

        let (mut r, mut c) = (sr, sc);
        loop {
            match downstream_cell(flow_dir, r, c, rows, cols) {
                None => {
                    outlet = true; // Pit or flows off grid
                    break;
                }
                Some((nr, nc)) => {
                    if mask[(nr, nc)] == 0 {
                        outlet = true; // Leaves the network
                        break;
                    }
                    if start_ids[(nr, nc)] != 0 {
                        downstream = Some(start_ids[(nr, nc)]);
                        break;
                    }
                    cells.push((nr, nc));
                    r = nr;
                    c = nc;
                    if cells.len() > max_steps {
                        break; // Cycle protection on malformed direction input
                    }
                }
            }
        }

        let &(ur, uc) = cells.first().unwrap_or(&(sr, sc));
        let &(dr, dc) = cells.last().unwrap_or(&(sr, sc));

        segments.push(StreamSegment {
            id,
            order: order[(sr, sc)],
            river_id: 0,
            downstream,
            outlet,
            us_fa: unsafe { flow_accum.get_unchecked(ur, uc) },
            ds_fa: unsafe { flow_accum.get_unchecked(dr, dc) },
            drop_distance: unsafe {
                filled_dem.get_unchecked(ur, uc) - filled_dem.get_unchecked(dr, dc)
            },
            upstream_d8_dir: unsafe { flow_dir.get_unchecked(ur, uc) },
            cells,
        });
    }

    assign_river_ids(&mut segments, params.river_order);

    Ok(segments)
}

/// Extract Strahler-ordered stream segments as a line feature collection.
///
/// One feature per segment; junction-terminated segments extend their
/// line one vertex into the junction cell so the drawn network connects.
/// See [`STRAHLER_FIELDS`] for the attribute schema.
pub fn extract_strahler_streams_d8(
    flow_dir: &Raster<u8>,
    flow_accum: &Raster<f64>,
    filled_dem: &Raster<f64>,
    params: &StrahlerParams,
) -> Result<FeatureCollection> {
    let segments = strahler_segments(flow_dir, flow_accum, filled_dem, params)?;
    let transform = flow_dir.transform();

    let mut collection = FeatureCollection::new();
    for segment in &segments {
        let mut coords: Vec<(f64, f64)> = segment
            .cells
            .iter()
            .map(|&(r, c)| transform.pixel_to_geo(c, r))
            .collect();

        if let Some(ds_id) = segment.downstream {
            // First cell of the downstream segment is the junction
            let &(jr, jc) = segments[(ds_id - 1) as usize]
                .cells
                .first()
                .expect("segments hold at least one cell");
            coords.push(transform.pixel_to_geo(jc, jr));
        }
        if coords.len() < 2 {
            // Isolated single-cell network: emit a degenerate but valid line
            coords.push(coords[0]);
        }

        let line: LineString<f64> = coords.into();
        let mut feature = Feature::new(Geometry::LineString(line));

        let &(ur, uc) = segment.cells.first().expect("segments hold at least one cell");
        let &(dr, dc) = segment.cells.last().expect("segments hold at least one cell");

        feature.set_property("order", AttributeValue::Int(segment.order as i64));
        feature.set_property("river_id", AttributeValue::Int(segment.river_id as i64));
        feature.set_property("drop_distance", AttributeValue::Float(segment.drop_distance));
        feature.set_property("outlet", AttributeValue::Int(segment.outlet as i64));
        feature.set_property("us_fa", AttributeValue::Float(segment.us_fa));
        feature.set_property("ds_fa", AttributeValue::Float(segment.ds_fa));
        feature.set_property("thresh_flow_accum", AttributeValue::Float(params.threshold));
        feature.set_property(
            "upstream_d8_dir",
            AttributeValue::Int(segment.upstream_d8_dir as i64),
        );
        feature.set_property("us_x", AttributeValue::Int(uc as i64));
        feature.set_property("us_y", AttributeValue::Int(ur as i64));
        feature.set_property("ds_x", AttributeValue::Int(dc as i64));
        feature.set_property("ds_y", AttributeValue::Int(dr as i64));

        collection.push(feature);
    }

    Ok(collection)
}

/// The in-grid cell this cell flows into, if any
fn downstream_cell(
    flow_dir: &Raster<u8>,
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    let dir = unsafe { flow_dir.get_unchecked(row, col) };
    if !(1..=8).contains(&dir) {
        return None;
    }
    let (dr, dc) = D8_OFFSETS[(dir - 1) as usize];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
        return None;
    }
    Some((nr as usize, nc as usize))
}

/// Per-cell Strahler order over the stream network.
///
/// Topological sweep from the headwaters, tracking for each cell the
/// highest inflowing order and how often it arrives: the order rises by
/// one only when the maximum arrives at least twice.
fn cell_orders(
    flow_dir: &Raster<u8>,
    mask: &Array2<u8>,
    in_degree: &Array2<u32>,
    rows: usize,
    cols: usize,
) -> Array2<u32> {
    let mut order = Array2::<u32>::zeros((rows, cols));
    let mut max_in = Array2::<u32>::zeros((rows, cols));
    let mut max_count = Array2::<u32>::zeros((rows, cols));
    let mut pending = in_degree.clone();
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            if mask[(row, col)] > 0 && in_degree[(row, col)] == 0 {
                order[(row, col)] = 1; // Headwater
                queue.push_back((row, col));
            }
        }
    }

    while let Some((row, col)) = queue.pop_front() {
        let Some((nr, nc)) = downstream_cell(flow_dir, row, col, rows, cols) else {
            continue;
        };
        if mask[(nr, nc)] == 0 {
            continue;
        }

        let o = order[(row, col)];
        if o > max_in[(nr, nc)] {
            max_in[(nr, nc)] = o;
            max_count[(nr, nc)] = 1;
        } else if o == max_in[(nr, nc)] {
            max_count[(nr, nc)] += 1;
        }

        pending[(nr, nc)] -= 1;
        if pending[(nr, nc)] == 0 {
            order[(nr, nc)] = max_in[(nr, nc)] + u32::from(max_count[(nr, nc)] >= 2);
            queue.push_back((nr, nc));
        }
    }

    order
}

/// Thread river ids upstream from the outlet segments.
fn assign_river_ids(segments: &mut [StreamSegment], river_order: u32) {
    // Tributaries of each segment (segments draining into its junction)
    let mut inflows: Vec<Vec<usize>> = vec![Vec::new(); segments.len()];
    for (idx, segment) in segments.iter().enumerate() {
        if let Some(ds_id) = segment.downstream {
            inflows[(ds_id - 1) as usize].push(idx);
        }
    }

    let mut next_river = 0u32;
    let mut stack: Vec<usize> = Vec::new();

    for idx in 0..segments.len() {
        if segments[idx].downstream.is_none() {
            next_river += 1;
            segments[idx].river_id = next_river;
            stack.push(idx);
        }
    }

    while let Some(idx) = stack.pop() {
        let river_id = segments[idx].river_id;
        let is_river = segments[idx].order >= river_order;

        if inflows[idx].is_empty() {
            continue;
        }

        // The main stem is the tributary delivering the most flow
        let main = inflows[idx]
            .iter()
            .copied()
            .max_by(|&a, &b| {
                segments[a]
                    .ds_fa
                    .partial_cmp(&segments[b].ds_fa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(segments[b].id.cmp(&segments[a].id))
            })
            .expect("non-empty inflow list");

        for &trib in &inflows[idx] {
            if !is_river || trib == main {
                segments[trib].river_id = river_id;
            } else {
                next_river += 1;
                segments[trib].river_id = next_river;
            }
            stack.push(trib);
        }
    }
}
