//! Build a basin's topo file: the DEM, basin masks and vegetation fields
//! clipped to a common grid around the basin outline.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use ndarray::Array2;

use crate::error::GrmError;
use crate::gdal::{RasterizeRequest, ResampleMethod, Warp, WarpRequest, NODATA_SENTINEL};
use crate::grid::GridDescriptor;
use crate::regrid::load_regridded;

pub mod config;
pub mod domain;
pub mod output;
pub mod vegetation;

pub use config::TopoConfig;
use domain::{condition_to_cellsize, pad_extent, Domain};
use output::{write_topo, NamedMask, TopoLayers};
use vegetation::{compute_layers, read_canopy_table, read_height_table, VegetationLayers};

pub struct GenerateTopo<'a> {
    config: TopoConfig,
    warper: &'a dyn Warp,
    srs: Option<String>,
}

impl<'a> GenerateTopo<'a> {
    pub fn new(config: TopoConfig, warper: &'a dyn Warp) -> Self {
        let srs = config
            .target_srs
            .clone()
            .or_else(|| read_prj(&config.basin_shapefile));
        if srs.is_none() {
            log::warn!(
                "No target_srs or .prj file for {}, rasters keep their own spatial reference",
                config.basin_shapefile.display()
            );
        }
        Self { config, warper, srs }
    }

    pub fn config(&self) -> &TopoConfig {
        &self.config
    }

    /// Run every step and return the path of the new topo file. The temporary
    /// directory is removed afterwards unless `keep_temp` is set.
    pub fn run(&self, keep_temp: bool) -> error_stack::Result<PathBuf, GrmError> {
        let temp_dir = self.config.temp_dir();
        std::fs::create_dir_all(&temp_dir).change_context_lazy(|| {
            GrmError::store_io(format!("could not create {}", temp_dir.display()))
        })?;

        let domain = self.set_extents()?;
        log::info!(
            "Domain is {} x {} cells of {} over {:?}",
            domain.nx(),
            domain.ny(),
            domain.cell_size,
            domain.extent
        );
        let grid = GridDescriptor::from_coordinates(
            domain.x.clone(),
            domain.y.clone(),
            self.srs.clone(),
            None,
        )?;

        let dem = self.load_dem(&domain, &grid)?;
        let masks = self.load_masks(&domain, &grid)?;
        let vegetation = self.load_vegetation(&domain, &grid)?;
        let layers = TopoLayers { dem, masks, vegetation };

        let topo_path = self.config.topo_path();
        write_topo(&topo_path, &domain, &layers, &self.clipped_dem_path(), self.srs.as_deref())
            .change_context_lazy(|| {
                GrmError::store_io(format!("could not write {}", topo_path.display()))
            })?;
        log::info!("Topo written to {}", topo_path.display());

        if !keep_temp {
            log::info!("Cleaning up temporary files");
            if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
                log::warn!("Could not remove {}: {e}", temp_dir.display());
            }
        }
        Ok(topo_path)
    }

    /// The domain from `coordinate_extent` if given, otherwise from the basin
    /// outline padded by `pad_domain` cells and conditioned to the cell size.
    pub fn set_extents(&self) -> error_stack::Result<Domain, GrmError> {
        let cell_size = self.config.cell_size;
        let extent = match self.config.coordinate_extent() {
            Some(extent) => extent,
            None => {
                let outline = self.warper.vector_extent(&self.config.basin_shapefile)?;
                let padded = pad_extent(outline, cell_size, self.config.pad_domain);
                condition_to_cellsize(padded, cell_size)
            }
        };
        Ok(Domain::new(extent, cell_size))
    }

    fn clipped_dem_path(&self) -> PathBuf {
        self.config.temp_dir().join("clipped_dem.nc")
    }

    fn warp_to_domain(
        &self,
        source: &Path,
        destination: PathBuf,
        domain: &Domain,
        grid: &GridDescriptor,
        resample: ResampleMethod,
    ) -> error_stack::Result<Array2<f32>, GrmError> {
        let request = WarpRequest {
            source: source.to_path_buf(),
            destination,
            target_srs: self.srs.clone(),
            extent: domain.extent,
            size: domain.size(),
            resample,
            nodata: NODATA_SENTINEL,
        };
        self.warper
            .warp(&request)
            .attach_printable_lazy(|| format!("warping {}", source.display()))?;
        load_regridded(&request.destination, grid)
    }

    /// Reproject and crop the DEM onto the domain.
    pub fn load_dem(
        &self,
        domain: &Domain,
        grid: &GridDescriptor,
    ) -> error_stack::Result<Array2<f32>, GrmError> {
        log::info!("Clipping the DEM {}", self.config.dem_file.display());
        self.warp_to_domain(
            &self.config.dem_file,
            self.clipped_dem_path(),
            domain,
            grid,
            ResampleMethod::Bilinear,
        )
    }

    /// Rasterize the basin outline and every sub-basin outline.
    pub fn load_masks(
        &self,
        domain: &Domain,
        grid: &GridDescriptor,
    ) -> error_stack::Result<Vec<NamedMask>, GrmError> {
        let mut masks = vec![];

        let basin = self.rasterize(&self.config.basin_shapefile, domain, grid)?;
        masks.push(NamedMask {
            var_name: "mask".to_string(),
            long_name: self.config.basin_name.clone(),
            values: basin,
        });

        for sub_basin in self.config.sub_basin_files.iter() {
            let name = shapefile_name(sub_basin);
            let values = self.rasterize(sub_basin, domain, grid)?;
            masks.push(NamedMask {
                var_name: format!("mask_{}", name.to_lowercase().replace(' ', "_")),
                long_name: name,
                values,
            });
        }

        Ok(masks)
    }

    fn rasterize(
        &self,
        outline: &Path,
        domain: &Domain,
        grid: &GridDescriptor,
    ) -> error_stack::Result<Array2<u8>, GrmError> {
        log::info!("Rasterizing {}", outline.display());
        let request = RasterizeRequest {
            source: outline.to_path_buf(),
            destination: self
                .config
                .temp_dir()
                .join(format!("mask_{}.nc", shapefile_name(outline))),
            extent: domain.extent,
            size: domain.size(),
        };
        self.warper.rasterize(&request)?;
        let values = load_regridded(&request.destination, grid)?;
        Ok(values.mapv(|v| u8::from(v.is_finite() && v != 0.0)))
    }

    /// Warp the vegetation type and height rasters and look up the
    /// height and canopy parameters of every cell.
    pub fn load_vegetation(
        &self,
        domain: &Domain,
        grid: &GridDescriptor,
    ) -> error_stack::Result<VegetationLayers, GrmError> {
        let dataset = self.config.vegetation_dataset;
        log::info!("Loading vegetation from {dataset}");
        let files = dataset.files(&self.config.vegetation_folder);
        let temp_dir = self.config.temp_dir();

        let types = self.warp_to_domain(
            &files.veg_type,
            temp_dir.join("clipped_veg_type.nc"),
            domain,
            grid,
            self.config.vegetation_type_resample_method,
        )?;
        let height_codes = self.warp_to_domain(
            &files.veg_height,
            temp_dir.join("clipped_veg_height.nc"),
            domain,
            grid,
            self.config.vegetation_height_resample_method,
        )?;

        log::debug!("Calculating veg height");
        let heights = read_height_table(&files.height_csv)?;
        let canopy = match &self.config.vegetation_params_file {
            Some(path) => read_canopy_table(path)?,
            None => {
                log::warn!("No vegetation_params_file, every cell gets tau = 1 and k = 0");
                Default::default()
            }
        };

        Ok(compute_layers(&types, &height_codes, &heights, &canopy))
    }
}

fn shapefile_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "basin".to_string())
}

/// The WKT in the `.prj` file next to a shapefile, if there is one.
fn read_prj(shapefile: &Path) -> Option<String> {
    let prj = shapefile.with_extension("prj");
    std::fs::read_to_string(prj)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
