use crate::core::pipeline::{Accumulator, Pipeline};
use crate::types::{Pixel, Region, Size, StreamError, StreamResult, TileData, TileView};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

/// Raster file opened through GDAL, read one requested region at a time.
///
/// The tile hint defaults to the block size of the first band, so adaptive
/// streaming reads whole storage blocks.
pub struct GdalRasterSource {
    path: PathBuf,
    dataset: Dataset,
    size: Size,
    bands: usize,
    tile_hint: Option<Size>,
    requested: Option<Region>,
}

impl GdalRasterSource {
    pub fn open<P: AsRef<Path>>(path: P) -> StreamResult<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Opening raster: {}", path.display());

        let dataset = Dataset::open(&path)?;
        let (width, height) = dataset.raster_size();
        let bands = dataset.raster_count().max(0) as usize;
        if bands == 0 {
            return Err(StreamError::InvalidConfiguration(format!(
                "{} has no raster band",
                path.display()
            )));
        }

        let (block_x, block_y) = dataset.rasterband(1)?.block_size();
        log::debug!(
            "Raster size: {}x{}, {} bands, block {}x{}",
            width,
            height,
            bands,
            block_x,
            block_y
        );

        Ok(Self {
            path,
            dataset,
            size: Size::new(width as u64, height as u64),
            bands,
            tile_hint: Some(Size::new(block_x as u64, block_y as u64)),
            requested: None,
        })
    }

    /// Replace the block-size hint
    pub fn with_tile_hint(mut self, tile_hint: Size) -> Self {
        self.tile_hint = Some(tile_hint);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Pipeline for GdalRasterSource {
    type Pixel = f32;

    fn largest_possible_region(&self) -> Region {
        Region::from_size(self.size)
    }

    fn number_of_bands(&self) -> usize {
        self.bands
    }

    fn tile_hint(&self) -> Option<Size> {
        self.tile_hint
    }

    fn request_region(&mut self, region: Region) -> StreamResult<()> {
        let largest = self.largest_possible_region();
        if !largest.is_inside_region(&region) {
            return Err(StreamError::InvalidRegion(format!(
                "requested {} outside of {}",
                region, largest
            )));
        }
        self.requested = Some(region);
        Ok(())
    }

    fn compute_requested_region(&mut self) -> StreamResult<TileData<f32>> {
        let region = self.requested.ok_or_else(|| {
            StreamError::InvalidRegion("no region requested before compute".to_string())
        })?;

        let mut tile = Array3::<f32>::zeros(region.tile_shape(self.bands));
        if region.is_empty() {
            return Ok(tile);
        }

        let window = (region.index.x as isize, region.index.y as isize);
        let (width, height) = (region.size.x as usize, region.size.y as usize);

        for (band, mut plane) in tile.axis_iter_mut(Axis(0)).enumerate() {
            let rasterband = self.dataset.rasterband(band as isize + 1)?;
            let buffer = rasterband.read_as::<f32>(window, (width, height), (width, height), None)?;
            let data = Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
                StreamError::InvalidRegion(format!("Failed to reshape band {} of {}: {}", band + 1, region, e))
            })?;
            plane.assign(&data);
        }

        Ok(tile)
    }
}

/// Accumulator streaming every tile into a new `f32` raster written through
/// GDAL. The dataset is created on reset and closed on finalize.
pub struct GdalRasterWriter {
    path: PathBuf,
    driver_name: String,
    dataset: Option<Dataset>,
    region: Region,
    bands: usize,
    tiles_written: usize,
    result: Option<PathBuf>,
}

impl GdalRasterWriter {
    /// GeoTIFF writer
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_driver(path, "GTiff")
    }

    pub fn with_driver<P: AsRef<Path>>(path: P, driver_name: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            driver_name: driver_name.to_string(),
            dataset: None,
            region: Region::default(),
            bands: 0,
            tiles_written: 0,
            result: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tiles_written(&self) -> usize {
        self.tiles_written
    }

    /// Path of the completed file
    pub fn output(&self) -> Option<&Path> {
        self.result.as_deref()
    }
}

impl<T: Pixel> Accumulator<T> for GdalRasterWriter {
    type Output = PathBuf;

    fn reset(&mut self, region: &Region, bands: usize) -> StreamResult<()> {
        if region.is_empty() || bands == 0 {
            return Err(StreamError::InvalidRegion(format!(
                "cannot create a raster for {} with {} bands",
                region, bands
            )));
        }

        log::info!(
            "Creating {} raster {} for {} ({} bands)",
            self.driver_name,
            self.path.display(),
            region,
            bands
        );

        // Any previous dataset is closed before its file is recreated
        self.dataset = None;
        let driver = DriverManager::get_driver_by_name(&self.driver_name)?;
        let dataset = driver.create_with_band_type::<f32, _>(
            &self.path,
            region.size.x as isize,
            region.size.y as isize,
            bands as isize,
        )?;

        self.dataset = Some(dataset);
        self.region = *region;
        self.bands = bands;
        self.tiles_written = 0;
        self.result = None;
        Ok(())
    }

    fn update(&mut self, region: &Region, tile: TileView<'_, T>) -> StreamResult<()> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| StreamError::Accumulator("writer updated before reset".to_string()))?;

        if !self.region.is_inside_region(region) || tile.dim() != region.tile_shape(self.bands) {
            return Err(StreamError::Accumulator(format!(
                "tile {} with shape {:?} does not fit output {} with {} bands",
                region,
                tile.dim(),
                self.region,
                self.bands
            )));
        }

        let window = (
            (region.index.x - self.region.index.x) as isize,
            (region.index.y - self.region.index.y) as isize,
        );
        let (width, height) = (region.size.x as usize, region.size.y as usize);

        for (band, plane) in tile.axis_iter(Axis(0)).enumerate() {
            let data: Vec<f32> = plane.iter().map(|v| v.to_f32().unwrap_or(f32::NAN)).collect();
            let buffer = Buffer::new((width, height), data);
            let mut rasterband = dataset.rasterband(band as isize + 1)?;
            rasterband.write(window, (width, height), &buffer)?;
        }

        self.tiles_written += 1;
        log::debug!("Wrote tile {} to {}", region, self.path.display());
        Ok(())
    }

    fn finalize(&mut self) -> StreamResult<()> {
        // Closing the dataset flushes it to disk
        self.dataset = None;
        log::info!("Wrote {} tiles to {}", self.tiles_written, self.path.display());
        self.result = Some(self.path.clone());
        Ok(())
    }

    fn result(&self) -> Option<&PathBuf> {
        self.result.as_ref()
    }
}
