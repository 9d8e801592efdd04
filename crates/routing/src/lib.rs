//! # RouteDEM Routing
//!
//! Hydrological routing primitives for the RouteDEM workbench.
//!
//! ## Available Algorithm Categories
//!
//! - **hydrology**: Pit filling, D8 and MFD flow direction/accumulation,
//!   stream network extraction, downslope distance, Strahler stream orders,
//!   subwatershed delineation
//! - **terrain**: Slope
//!
//! All primitives operate on in-memory [`Raster`](routedem_core::Raster)
//! values; file handling lives in the orchestration layer.

pub mod hydrology;
pub mod terrain;

mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        calculate_subwatershed_boundary, downslope_distance_d8, downslope_distance_mfd,
        extract_strahler_streams_d8, extract_streams_d8, extract_streams_mfd, fill_pits,
        flow_accumulation_d8, flow_accumulation_mfd, flow_direction_d8, flow_direction_mfd,
        strahler_segments, FillPits, FillPitsParams, FlowAccumulationD8, FlowDirectionD8,
        FlowDirectionMfd, MfdParams, StrahlerParams, StreamSegment, SubwatershedParams,
    };
    pub use crate::terrain::{slope, Slope, SlopeParams, SlopeUnits};
    pub use routedem_core::prelude::*;
}
