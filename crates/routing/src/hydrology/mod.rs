//! Hydrological routing algorithms
//!
//! Everything needed to route water across a Digital Elevation Model:
//! - Fill pits: Priority-Flood depression filling (Barnes 2014)
//! - Flow direction: D8 steepest descent, MFD proportional shares
//! - Flow accumulation: upstream contributing area for both routers
//! - Stream network: threshold extraction, with gap bridging for MFD
//! - Downslope distance: flow path length to the nearest stream
//! - Strahler orders: stream segmentation and ordering as vector lines
//! - Subwatersheds: per-segment drainage basins as vector polygons

mod downslope_distance;
mod fill_pits;
mod flow_accumulation;
mod flow_accumulation_mfd;
mod flow_direction;
mod flow_direction_mfd;
mod strahler;
mod stream_network;
mod subwatersheds;

pub use downslope_distance::{downslope_distance_d8, downslope_distance_mfd};
pub use fill_pits::{fill_pits, FillPits, FillPitsParams};
pub use flow_accumulation::{flow_accumulation_d8, FlowAccumulationD8};
pub use flow_accumulation_mfd::{flow_accumulation_mfd, FlowAccumulationMfd};
pub use flow_direction::{flow_direction_d8, FlowDirectionD8};
pub use flow_direction_mfd::{flow_direction_mfd, mfd_shares, FlowDirectionMfd, MfdParams};
pub use strahler::{
    extract_strahler_streams_d8, strahler_segments, StrahlerParams, StreamSegment, STRAHLER_FIELDS,
};
pub use stream_network::{extract_streams_d8, extract_streams_mfd};
pub use subwatersheds::{calculate_subwatershed_boundary, SubwatershedParams, SUBWATERSHED_FIELDS};
