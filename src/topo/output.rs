//! Writing the finished topo file.
use std::path::Path;

use ndarray::Array2;
use netcdf::{AttributeValue, Extents, NcTypeDescriptor};

use crate::grid::GRID_MAPPING_VARS;
use crate::nc_utils::{history_attribute, string_attribute, variable_attributes, NcArray};
use crate::regrid::GDAL_BAND_VAR;
use crate::topo::domain::Domain;
use crate::topo::vegetation::VegetationLayers;

const PROJECTION_VAR: &str = "projection";

/// A basin (or sub-basin) mask and the names it is written under.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMask {
    pub var_name: String,
    pub long_name: String,
    pub values: Array2<u8>,
}

/// Every gridded field of a topo, on the domain's north-up grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TopoLayers {
    pub dem: Array2<f32>,
    /// The basin mask first, then any sub-basin masks.
    pub masks: Vec<NamedMask>,
    pub vegetation: VegetationLayers,
}

/// Write `topo.nc`. The `projection` variable is copied from the grid
/// mapping of `clipped_dem`, the warped DEM, or built from `srs` if the warped
/// file has none.
pub fn write_topo(
    path: &Path,
    domain: &Domain,
    layers: &TopoLayers,
    clipped_dem: &Path,
    srs: Option<&str>,
) -> netcdf::Result<()> {
    let mut ds = netcdf::create(path)?;
    ds.add_dimension("y", domain.ny())?;
    ds.add_dimension("x", domain.nx())?;

    let mut xvar = ds.add_variable::<f64>("x", &["x"])?;
    xvar.put_attribute("units", "meters")?;
    xvar.put_attribute("long_name", "x coordinate of projection")?;
    xvar.put_values(&domain.x, Extents::All)?;
    let mut yvar = ds.add_variable::<f64>("y", &["y"])?;
    yvar.put_attribute("units", "meters")?;
    yvar.put_attribute("long_name", "y coordinate of projection")?;
    yvar.put_values(&domain.y, Extents::All)?;

    let dem_ds = netcdf::open(clipped_dem)?;
    copy_projection(&dem_ds, &mut ds, srs)?;

    put_grid(
        &mut ds,
        "dem",
        &layers.dem,
        Some(f32::NAN),
        &[("units", "meters".into()), ("long_name", "dem".into())],
    )?;

    for mask in layers.masks.iter() {
        let attrs = [("long_name", mask.long_name.as_str().into())];
        put_grid(&mut ds, &mask.var_name, &mask.values, None, &attrs)?;
    }

    let veg = &layers.vegetation;
    put_grid(
        &mut ds,
        "veg_type",
        &veg.veg_type,
        None,
        &[("long_name", "vegetation type".into())],
    )?;
    put_grid(
        &mut ds,
        "veg_height",
        &veg.veg_height,
        None,
        &[("units", "meters".into()), ("long_name", "vegetation height".into())],
    )?;
    put_grid(
        &mut ds,
        "veg_tau",
        &veg.veg_tau,
        None,
        &[("long_name", "vegetation radiation transmissivity".into())],
    )?;
    put_grid(
        &mut ds,
        "veg_k",
        &veg.veg_k,
        None,
        &[("long_name", "vegetation extinction coefficient".into())],
    )?;

    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    ds.add_attribute("Conventions", "CF-1.6")?;
    ds.add_attribute("dateCreated", now.as_str())?;
    ds.add_attribute("history", history_attribute().as_str())?;

    ds.close()
}

fn put_grid<T: NcTypeDescriptor + Copy>(
    ds: &mut netcdf::FileMut,
    name: &str,
    values: &Array2<T>,
    fill_value: Option<T>,
    attrs: &[(&str, AttributeValue)],
) -> netcdf::Result<()> {
    let mut var = ds.add_variable::<T>(name, &["y", "x"])?;
    if let Some(fill) = fill_value {
        var.set_fill_value(fill)?;
    }
    for (attr, value) in attrs {
        var.put_attribute(attr, value.clone())?;
    }
    var.put_attribute("grid_mapping", PROJECTION_VAR)?;

    let flat: Vec<T> = values.iter().copied().collect();
    var.put_values(&flat, Extents::All)
}

fn copy_projection(
    src: &netcdf::File,
    dst: &mut netcdf::FileMut,
    srs: Option<&str>,
) -> netcdf::Result<()> {
    let gm_name = src
        .variable(GDAL_BAND_VAR)
        .and_then(|v| string_attribute(&v, "grid_mapping"))
        .or_else(|| {
            GRID_MAPPING_VARS
                .iter()
                .find(|&&name| src.variable(name).is_some())
                .map(|name| name.to_string())
        });

    if let Some(var) = gm_name.and_then(|name| src.variable(&name)) {
        let data = NcArray::get_from(&var)?;
        let attrs = variable_attributes(&var)?;
        return data.put_to(dst, PROJECTION_VAR, &[], &attrs);
    }

    log::warn!("The warped DEM has no grid mapping variable, recording only the spatial reference");
    let mut var = dst.add_variable::<i32>(PROJECTION_VAR, &[])?;
    if let Some(srs) = srs {
        var.put_attribute("spatial_ref", srs)?;
    }
    var.put_values(&[0], Extents::All)
}
