//! Put a lidar depth image onto a reference grid.
//!
//! The resampling itself is delegated to a [`Warp`] implementation; this
//! module builds the request from the grid description and turns the
//! warped file back into an array aligned with the reference grid.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use ndarray::{s, Array2, Zip};

use crate::error::GrmError;
use crate::gdal::{ResampleMethod, Warp, WarpRequest, NODATA_SENTINEL};
use crate::grid::{AxisOrder, BasinMask, GridDescriptor};
use crate::nc_utils::{attr_as_f64, read_f64_values};

/// Name GDAL gives the single band of a raster written to netCDF.
pub(crate) const GDAL_BAND_VAR: &str = "Band1";

/// Where the regridded version of `image` is written inside `temp_dir`.
pub fn regridded_path(image: &Path, temp_dir: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    temp_dir.join(format!("{stem}.nc"))
}

/// Build the warp request that puts `image` exactly onto `grid`.
pub fn warp_request(
    image: &Path,
    grid: &GridDescriptor,
    resample: ResampleMethod,
    temp_dir: &Path,
) -> WarpRequest {
    WarpRequest {
        source: image.to_path_buf(),
        destination: regridded_path(image, temp_dir),
        target_srs: grid.spatial_ref.clone(),
        extent: grid.extent,
        size: (grid.nx, grid.ny),
        resample,
        nodata: NODATA_SENTINEL,
    }
}

/// Warp `image` onto `grid`, writing the result under `temp_dir`, and return
/// the path of the regridded file.
pub fn match_raster(
    warper: &dyn Warp,
    image: &Path,
    grid: &GridDescriptor,
    resample: ResampleMethod,
    temp_dir: &Path,
) -> error_stack::Result<PathBuf, GrmError> {
    if !image.exists() {
        return Err(GrmError::warp(format!("image {} does not exist", image.display())).into());
    }

    std::fs::create_dir_all(temp_dir).change_context_lazy(|| {
        GrmError::store_io(format!("could not create temporary directory {}", temp_dir.display()))
    })?;

    let request = warp_request(image, grid, resample, temp_dir);
    log::info!(
        "Regridding {} to {} x {} cells using {} resampling",
        image.display(),
        grid.nx,
        grid.ny,
        resample
    );
    warper
        .warp(&request)
        .attach_printable_lazy(|| format!("warping {}", image.display()))?;
    Ok(request.destination)
}

/// Read a regridded raster back as depths on `grid`, in the grid's row order,
/// with missing pixels as NaN.
pub fn load_regridded(
    path: &Path,
    grid: &GridDescriptor,
) -> error_stack::Result<Array2<f32>, GrmError> {
    let ds = netcdf::open(path).change_context_lazy(|| {
        GrmError::grid_read(format!("could not open regridded image {}", path.display()))
    })?;

    let var = find_band(&ds).ok_or_else(|| {
        GrmError::grid_read(format!("no 2D raster band found in {}", path.display()))
    })?;

    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    if shape != [grid.ny, grid.nx] {
        return Err(GrmError::grid_read(format!(
            "regridded image has shape {shape:?}, expected [{}, {}]",
            grid.ny, grid.nx
        ))
        .into());
    }

    let fill = var
        .attribute("_FillValue")
        .and_then(|a| a.value().ok())
        .and_then(|v| attr_as_f64(&v))
        .unwrap_or(NODATA_SENTINEL);

    let flat = var
        .get_values::<f32, _>(netcdf::Extents::All)
        .change_context_lazy(|| GrmError::grid_read("could not read regridded values"))?;
    let mut depths = Array2::from_shape_vec((grid.ny, grid.nx), flat)
        .change_context_lazy(|| GrmError::grid_read("regridded values do not match their shape"))?;

    depths.mapv_inplace(|v| {
        let v64 = v as f64;
        if v64 == fill || v64 == NODATA_SENTINEL {
            f32::NAN
        } else {
            v
        }
    });

    // GDAL's netCDF driver writes rows south to north unless told otherwise
    let rows_in = match read_f64_values(&ds, "y") {
        Ok(y) => AxisOrder::of(&y),
        Err(_) => AxisOrder::Ascending,
    };
    if rows_in != grid.row_order() {
        log::debug!("Flipping regridded rows to match the reference grid");
        depths = depths.slice(s![..;-1, ..]).to_owned();
    }

    Ok(depths)
}

fn find_band(ds: &netcdf::File) -> Option<netcdf::Variable> {
    if let Some(var) = ds.variable(GDAL_BAND_VAR) {
        return Some(var);
    }

    let mut candidates = ds.variables().filter(|v| v.dimensions().len() == 2);
    let first = candidates.next()?;
    if candidates.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Set every cell outside the basin mask to NaN.
pub fn apply_mask(depths: &mut Array2<f32>, mask: &BasinMask) -> error_stack::Result<(), GrmError> {
    if depths.dim() != mask.values.dim() {
        return Err(GrmError::grid_read(format!(
            "mask shape {:?} does not match depths shape {:?}",
            mask.values.dim(),
            depths.dim()
        ))
        .into());
    }

    Zip::from(depths).and(&mask.values).for_each(|d, &m| {
        if !(m.is_finite() && m != 0.0) {
            *d = f32::NAN;
        }
    });
    Ok(())
}

/// Regrid, load, and mask one image: the full path from a raw lidar raster to
/// depths ready to be stored.
pub fn regrid_and_mask(
    warper: &dyn Warp,
    image: &Path,
    grid: &GridDescriptor,
    mask: &BasinMask,
    resample: ResampleMethod,
    temp_dir: &Path,
) -> error_stack::Result<Array2<f32>, GrmError> {
    let regridded = match_raster(warper, image, grid, resample, temp_dir)?;
    let mut depths = load_regridded(&regridded, grid)?;
    apply_mask(&mut depths, mask)?;
    Ok(depths)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gdal::RasterizeRequest;
    use crate::grid::{tests::test_topo, Extent};
    use netcdf::Extents;

    /// Stand-in for the GDAL tools. Rasters are written south-up, the way
    /// GDAL's netCDF driver does, with a `transverse_mercator` grid mapping.
    ///
    /// Warped rasters have, in north-up order, the value `(r * nx + c) / 100`
    /// at `[r, c]`, except `[1, 1]` which is no-data. Sources whose file name
    /// contains `fail_on` produce a warp error. Rasterized masks are 1
    /// everywhere except the first column.
    pub(crate) struct FakeWarp {
        pub(crate) fail_on: Option<String>,
        pub(crate) extent: Option<Extent>,
    }

    impl FakeWarp {
        pub(crate) fn new() -> Self {
            Self { fail_on: None, extent: None }
        }

        pub(crate) fn failing_on(pattern: &str) -> Self {
            Self { fail_on: Some(pattern.to_string()), extent: None }
        }

        pub(crate) fn with_extent(extent: Extent) -> Self {
            Self { fail_on: None, extent: Some(extent) }
        }
    }

    fn write_band<T: netcdf::NcTypeDescriptor + Copy>(
        path: &Path,
        extent: &Extent,
        size: (usize, usize),
        fill: Option<T>,
        value: impl Fn(usize, usize) -> T,
    ) {
        let (nx, ny) = size;
        let cx = (extent.xmax - extent.xmin) / nx as f64;
        let cy = (extent.ymax - extent.ymin) / ny as f64;
        let x: Vec<f64> = (0..nx).map(|i| extent.xmin + cx / 2.0 + i as f64 * cx).collect();
        let y: Vec<f64> = (0..ny).map(|j| extent.ymin + cy / 2.0 + j as f64 * cy).collect();

        let mut band = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for c in 0..nx {
                band.push(value(ny - 1 - j, c));
            }
        }

        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("x", nx).unwrap();
        ds.add_dimension("y", ny).unwrap();
        ds.add_variable::<f64>("x", &["x"]).unwrap().put_values(&x, Extents::All).unwrap();
        ds.add_variable::<f64>("y", &["y"]).unwrap().put_values(&y, Extents::All).unwrap();
        let mut gm = ds.add_variable::<i32>("transverse_mercator", &[]).unwrap();
        gm.put_attribute("grid_mapping_name", "transverse_mercator").unwrap();
        gm.put_attribute("spatial_ref", "EPSG:32611").unwrap();
        gm.put_values(&[0], Extents::All).unwrap();
        let mut bv = ds.add_variable::<T>(GDAL_BAND_VAR, &["y", "x"]).unwrap();
        if let Some(fill) = fill {
            bv.set_fill_value(fill).unwrap();
        }
        bv.put_attribute("grid_mapping", "transverse_mercator").unwrap();
        bv.put_values(&band, Extents::All).unwrap();
    }

    impl Warp for FakeWarp {
        fn warp(&self, request: &WarpRequest) -> error_stack::Result<(), GrmError> {
            let name = request.source.to_string_lossy();
            if let Some(pattern) = &self.fail_on {
                if name.contains(pattern.as_str()) {
                    return Err(GrmError::warp(format!("fake warp refused {name}")).into());
                }
            }

            let nx = request.size.0;
            let nodata = request.nodata as f32;
            write_band(&request.destination, &request.extent, request.size, Some(nodata), |r, c| {
                if r == 1 && c == 1 {
                    nodata
                } else {
                    (r * nx + c) as f32 / 100.0
                }
            });
            Ok(())
        }

        fn rasterize(&self, request: &RasterizeRequest) -> error_stack::Result<(), GrmError> {
            write_band::<u8>(&request.destination, &request.extent, request.size, None, |_, c| {
                if c == 0 { 0 } else { 1 }
            });
            Ok(())
        }

        fn vector_extent(&self, path: &Path) -> error_stack::Result<Extent, GrmError> {
            self.extent.ok_or_else(|| {
                GrmError::warp(format!("fake warp has no extent for {}", path.display())).into()
            })
        }
    }

    /// Create an (empty) image file so existence checks pass.
    pub(crate) fn touch_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_warp_request_matches_grid() {
        let dir = tempfile::tempdir().unwrap();
        let topo = test_topo(dir.path(), "topo.nc", 100.0, 10);
        let grid = GridDescriptor::describe(&topo).unwrap();
        let image = Path::new("/data/USCATB20200414_depth.tif");
        let req = warp_request(image, &grid, ResampleMethod::Bilinear, Path::new("out/tmp"));
        assert_eq!(req.destination, PathBuf::from("out/tmp/USCATB20200414_depth.nc"));
        assert_eq!(req.extent, grid.extent);
        assert_eq!(req.size, (10, 10));
        assert_eq!(req.target_srs.as_deref(), Some("EPSG:32611"));
    }

    #[test]
    fn test_regrid_flips_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let topo = test_topo(dir.path(), "topo.nc", 100.0, 10);
        let grid = GridDescriptor::describe(&topo).unwrap();
        let mask = BasinMask::read(&topo).unwrap();
        let image = touch_image(dir.path(), "USCATB20200414_depth.tif");
        let tmp = dir.path().join("tmp");

        let warper = FakeWarp::new();
        let depths =
            regrid_and_mask(&warper, &image, &grid, &mask, ResampleMethod::Bilinear, &tmp).unwrap();

        assert!(tmp.join("USCATB20200414_depth.nc").exists());
        assert_eq!(depths.dim(), (10, 10));
        // First row of the north-up grid is the first row written by the warp
        assert_eq!(depths[[0, 3]], 0.03);
        assert_eq!(depths[[9, 9]], 0.99);
        // No-data pixel and the masked-out first column are NaN
        assert!(depths[[1, 1]].is_nan());
        assert!(depths.column(0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_regrid_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let topo = test_topo(dir.path(), "topo.nc", 100.0, 10);
        let grid = GridDescriptor::describe(&topo).unwrap();
        let mask = BasinMask::read(&topo).unwrap();
        let image = touch_image(dir.path(), "USCATB20200414_depth.tif");
        let tmp = dir.path().join("tmp");

        let warper = FakeWarp::new();
        let resample = ResampleMethod::Bilinear;
        let a = regrid_and_mask(&warper, &image, &grid, &mask, resample, &tmp).unwrap();
        let b = regrid_and_mask(&warper, &image, &grid, &mask, resample, &tmp).unwrap();
        // NaN != NaN, so compare bit patterns
        let bits = |arr: &Array2<f32>| arr.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_missing_image_is_warp_error() {
        let dir = tempfile::tempdir().unwrap();
        let topo = test_topo(dir.path(), "topo.nc", 100.0, 10);
        let grid = GridDescriptor::describe(&topo).unwrap();
        let err = match_raster(
            &FakeWarp::new(),
            &dir.path().join("missing.tif"),
            &grid,
            ResampleMethod::Bilinear,
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err.current_context(), GrmError::Warp(_)));
    }

    #[test]
    fn test_wrong_shape_is_grid_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let topo10 = test_topo(dir.path(), "topo10.nc", 100.0, 10);
        let topo9 = test_topo(dir.path(), "topo9.nc", 90.0, 9);
        let grid10 = GridDescriptor::describe(&topo10).unwrap();
        let grid9 = GridDescriptor::describe(&topo9).unwrap();
        let image = touch_image(dir.path(), "depth.tif");

        let warper = FakeWarp::new();
        let out = match_raster(&warper, &image, &grid10, ResampleMethod::Near, dir.path()).unwrap();
        let err = load_regridded(&out, &grid9).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::GridRead(_)));
    }

    #[test]
    fn test_apply_mask_shape_mismatch() {
        let mut depths = Array2::<f32>::zeros((3, 3));
        let mask = BasinMask { name: "Test".to_string(), values: Array2::ones((2, 3)) };
        assert!(apply_mask(&mut depths, &mask).is_err());
    }
}
