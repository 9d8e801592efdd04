//! I/O operations for reading and writing geospatial data

mod geotiff;
mod gpkg;

pub use geotiff::{geotiff_band_count, read_geotiff, write_geotiff, write_geotiff_bands};
pub use gpkg::{write_gpkg, GpkgGeometry};
