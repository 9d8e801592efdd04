//! Downslope distance to streams
//!
//! For each cell, the flow path length to the first stream cell, in
//! pixel units (diagonal steps count √2). Stream cells carry 0; paths
//! that leave the grid or end in a pit keep the distance walked.
//!
//! The D8 variant walks the single flow path. The MFD variant computes
//! the share-weighted expected distance over all downslope links,
//! resolving cells in dependency order.

use crate::maybe_rayon::*;
use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::{Error, Result};

use super::flow_direction_mfd::mfd_shares;

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

/// Distance in pixel units of a D8 step
fn step_length(dr: isize, dc: isize) -> f64 {
    if dr.abs() + dc.abs() == 2 {
        std::f64::consts::SQRT_2
    } else {
        1.0
    }
}

/// Calculate downslope distance to the nearest stream along D8 paths.
///
/// # Arguments
/// * `flow_dir` - D8 flow direction raster
/// * `stream_mask` - Binary stream raster (1 = stream)
///
/// # Returns
/// Raster<f64> with path distances in pixel units
pub fn downslope_distance_d8(
    flow_dir: &Raster<u8>,
    stream_mask: &Raster<u8>,
) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();
    if stream_mask.shape() != (rows, cols) {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: stream_mask.rows(),
            ac: stream_mask.cols(),
        });
    }

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0.0; cols];
            for col in 0..cols {
                if unsafe { stream_mask.get_unchecked(row, col) } > 0 {
                    continue; // Stream cells stay at 0
                }

                let mut r = row;
                let mut c = col;
                let mut length = 0.0;
                let mut visited = 0u32;
                let max_steps = (rows * cols) as u32;

                loop {
                    let dir = unsafe { flow_dir.get_unchecked(r, c) };
                    if dir < 1 || dir > 8 {
                        break; // Pit: keep the distance walked
                    }

                    let (dr, dc) = D8_OFFSETS[(dir - 1) as usize];
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;

                    if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                        break; // Flows off grid: keep the distance walked
                    }

                    length += step_length(dr, dc);
                    r = nr as usize;
                    c = nc as usize;

                    if unsafe { stream_mask.get_unchecked(r, c) } > 0 {
                        break; // Reached the network
                    }

                    visited += 1;
                    if visited > max_steps {
                        break; // Cycle protection
                    }
                }

                row_data[col] = length;
            }
            row_data
        })
        .collect();

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}

/// Calculate expected downslope distance to the nearest stream over MFD links.
///
/// Each cell's distance is the share-weighted mean of step length plus
/// the target's distance, over all positive-share links. Stream cells
/// and pits are 0. Links always point strictly downslope, so resolving
/// cells whose targets are all known visits every cell once.
///
/// # Arguments
/// * `flow_dir` - MFD direction raster
/// * `stream_mask` - Binary stream raster (1 = stream)
///
/// # Returns
/// Raster<f64> with expected distances in pixel units
pub fn downslope_distance_mfd(
    flow_dir: &Raster<i32>,
    stream_mask: &Raster<u8>,
) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();
    if stream_mask.shape() != (rows, cols) {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: stream_mask.rows(),
            ac: stream_mask.cols(),
        });
    }

    let mut dist = Array2::<f64>::zeros((rows, cols));
    let mut resolved = Array2::<bool>::from_elem((rows, cols), false);
    let mut remaining = Array2::<u32>::zeros((rows, cols));
    let mut queue: Vec<(usize, usize)> = Vec::new();

    // Stream cells and pits are known (0); everything else waits on its
    // unresolved link targets
    for row in 0..rows {
        for col in 0..cols {
            let is_stream = unsafe { stream_mask.get_unchecked(row, col) } > 0;
            let word = unsafe { flow_dir.get_unchecked(row, col) };

            if is_stream || word == 0 {
                resolved[(row, col)] = true;
                queue.push((row, col));
                continue;
            }

            let mut pending = 0u32;
            for (idx, &share) in mfd_shares(word).iter().enumerate() {
                if share == 0 {
                    continue;
                }
                let (dr, dc) = D8_OFFSETS[idx];
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                    continue;
                }
                let nr = nr as usize;
                let nc = nc as usize;
                let target_stream = unsafe { stream_mask.get_unchecked(nr, nc) } > 0;
                let target_word = unsafe { flow_dir.get_unchecked(nr, nc) };
                if !(target_stream || target_word == 0) {
                    pending += 1;
                }
            }
            remaining[(row, col)] = pending;
        }
    }

    // Reverse-topological sweep: a newly resolved cell releases the cells
    // that drain into it
    while let Some((row, col)) = queue.pop() {
        for (idx, &(dr, dc)) in D8_OFFSETS.iter().enumerate() {
            // The neighbor that would reach (row, col) via direction idx+1
            // sits in the opposite direction
            let ur = row as isize - dr;
            let uc = col as isize - dc;
            if ur < 0 || uc < 0 || (ur as usize) >= rows || (uc as usize) >= cols {
                continue;
            }
            let ur = ur as usize;
            let uc = uc as usize;

            if resolved[(ur, uc)] {
                continue;
            }

            let word = unsafe { flow_dir.get_unchecked(ur, uc) };
            if word == 0 || mfd_shares(word)[idx] == 0 {
                continue;
            }

            remaining[(ur, uc)] = remaining[(ur, uc)].saturating_sub(1);
            if remaining[(ur, uc)] > 0 {
                continue;
            }

            // All targets known: take the share-weighted expectation
            let shares = mfd_shares(word);
            let total: f64 = shares.iter().map(|&s| s as f64).sum();
            let mut expected = 0.0;
            for (i, &share) in shares.iter().enumerate() {
                if share == 0 {
                    continue;
                }
                let (sdr, sdc) = D8_OFFSETS[i];
                let tr = (ur as isize + sdr) as usize;
                let tc = (uc as isize + sdc) as usize;
                let target_dist = if unsafe { stream_mask.get_unchecked(tr, tc) } > 0 {
                    0.0
                } else {
                    dist[(tr, tc)]
                };
                expected += share as f64 / total * (step_length(sdr, sdc) + target_dist);
            }

            dist[(ur, uc)] = expected;
            resolved[(ur, uc)] = true;
            queue.push((ur, uc));
        }
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = dist;

    Ok(output)
}
