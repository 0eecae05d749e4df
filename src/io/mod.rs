//! Upstream sources and raster sinks for streamed rasters

pub mod memory;
pub mod gdal_raster;

pub use memory::InMemorySource;
pub use gdal_raster::{GdalRasterSource, GdalRasterWriter};
