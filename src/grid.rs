//! Describe the canonical grid of a reference topo file.
//!
//! Everything downstream (the warp request, the masking, the collection's
//! spatial dimensions, and the domain check) derives from the values read
//! here, so this is the only place that looks at the topo's `x`/`y` variables.
use std::path::Path;

use error_stack::ResultExt;
use itertools::{Itertools, MinMaxResult};
use ndarray::Array2;

use crate::error::GrmError;
use crate::nc_utils::{read_f64_values, string_attribute};

/// Name of the variables holding grid-mapping information, in order of preference.
pub(crate) const GRID_MAPPING_VARS: &[&str] = &["projection", "crs", "spatial_ref"];
/// Attributes on a grid-mapping variable that may hold WKT, in order of preference.
const WKT_ATTRS: &[&str] = &["spatial_ref", "crs_wkt"];

/// Which direction a coordinate vector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    Ascending,
    Descending,
}

impl AxisOrder {
    /// Determine the order of a coordinate vector from its first and last
    /// values. Vectors of length 0 or 1 are considered ascending.
    pub fn of(coords: &[f64]) -> Self {
        match (coords.first(), coords.last()) {
            (Some(first), Some(last)) if last < first => Self::Descending,
            _ => Self::Ascending,
        }
    }
}

/// Bounding box, in the same units as the grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// The immutable description of a reference grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    /// Signed spacing between consecutive `x` values.
    pub cell_size_x: f64,
    /// Signed spacing between consecutive `y` values (negative for north-up grids).
    pub cell_size_y: f64,
    /// Outer edges of the grid cells, i.e. the cell centers padded by half a cell.
    pub extent: Extent,
    pub nx: usize,
    pub ny: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// WKT (or other GDAL-readable definition) of the grid's spatial reference, if recorded.
    pub spatial_ref: Option<String>,
    /// Units of the coordinates, from the `x` variable's `units` attribute.
    pub units: Option<String>,
}

impl GridDescriptor {
    /// Read the grid description from a topo-like netCDF file with `x` and `y` variables.
    pub fn describe(reference: &Path) -> error_stack::Result<Self, GrmError> {
        if !reference.exists() {
            return Err(GrmError::grid_read(format!(
                "reference grid {} does not exist",
                reference.display()
            ))
            .into());
        }

        let ds = netcdf::open(reference).change_context_lazy(|| {
            GrmError::grid_read(format!("could not open {}", reference.display()))
        })?;
        Self::from_dataset(&ds).attach_printable_lazy(|| format!("reading {}", reference.display()))
    }

    /// Build the description from an already-open dataset.
    pub fn from_dataset(ds: &netcdf::File) -> error_stack::Result<Self, GrmError> {
        let x = read_coordinate(ds, "x")?;
        let y = read_coordinate(ds, "y")?;
        let units = ds.variable("x").and_then(|v| string_attribute(&v, "units"));
        let spatial_ref = find_spatial_ref(ds);
        Self::from_coordinates(x, y, spatial_ref, units)
    }

    /// Build the description from coordinate vectors of cell centers.
    pub fn from_coordinates(
        x: Vec<f64>,
        y: Vec<f64>,
        spatial_ref: Option<String>,
        units: Option<String>,
    ) -> error_stack::Result<Self, GrmError> {
        if x.len() < 2 || y.len() < 2 {
            return Err(GrmError::grid_read(format!(
                "grid must have at least 2 cells along each axis, found nx = {}, ny = {}",
                x.len(),
                y.len()
            ))
            .into());
        }

        let cell_size_x = x[1] - x[0];
        let cell_size_y = y[1] - y[0];
        let (x_lo, x_hi) = coord_min_max(&x);
        let (y_lo, y_hi) = coord_min_max(&y);
        let half_x = cell_size_x.abs() / 2.0;
        let half_y = cell_size_y.abs() / 2.0;

        let extent = Extent {
            xmin: x_lo - half_x,
            ymin: y_lo - half_y,
            xmax: x_hi + half_x,
            ymax: y_hi + half_y,
        };

        Ok(Self {
            cell_size_x,
            cell_size_y,
            extent,
            nx: x.len(),
            ny: y.len(),
            x,
            y,
            spatial_ref,
            units,
        })
    }

    /// Minimum and maximum of the `x` cell centers.
    pub fn x_range(&self) -> (f64, f64) {
        coord_min_max(&self.x)
    }

    /// Minimum and maximum of the `y` cell centers.
    pub fn y_range(&self) -> (f64, f64) {
        coord_min_max(&self.y)
    }

    /// The order of the grid's rows.
    pub fn row_order(&self) -> AxisOrder {
        AxisOrder::of(&self.y)
    }
}

/// The basin mask stored alongside a reference grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinMask {
    /// The mask's `long_name`, e.g. "Tuolumne River Basin".
    pub name: String,
    /// Mask values in `[y, x]` order; nonzero values are inside the basin.
    pub values: Array2<f64>,
}

impl BasinMask {
    /// Read the `mask` variable of the reference grid.
    pub fn read(reference: &Path) -> error_stack::Result<Self, GrmError> {
        let ds = netcdf::open(reference).change_context_lazy(|| {
            GrmError::grid_read(format!("could not open {}", reference.display()))
        })?;
        Self::from_dataset(&ds)
    }

    pub fn from_dataset(ds: &netcdf::File) -> error_stack::Result<Self, GrmError> {
        let var = ds
            .variable("mask")
            .ok_or_else(|| GrmError::grid_read("reference grid has no 'mask' variable"))?;

        let name = string_attribute(&var, "long_name").ok_or_else(|| {
            GrmError::grid_read("the 'mask' variable has no string 'long_name' attribute")
        })?;

        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if shape.len() != 2 {
            return Err(GrmError::grid_read(format!(
                "the 'mask' variable must be 2D, it has {} dimensions",
                shape.len()
            ))
            .into());
        }

        let flat = var
            .get_values::<f64, _>(netcdf::Extents::All)
            .change_context_lazy(|| GrmError::grid_read("could not read 'mask' values"))?;
        let values = Array2::from_shape_vec((shape[0], shape[1]), flat)
            .change_context_lazy(|| GrmError::grid_read("'mask' values do not match its shape"))?;

        Ok(Self { name, values })
    }

    /// Whether the cell at `[row, col]` is inside the basin.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.values
            .get((row, col))
            .is_some_and(|&v| v.is_finite() && v != 0.0)
    }
}

fn read_coordinate(ds: &netcdf::File, name: &str) -> error_stack::Result<Vec<f64>, GrmError> {
    if ds.dimension(name).is_none() {
        return Err(GrmError::grid_read(format!("missing spatial dimension '{name}'")).into());
    }
    read_f64_values(ds, name)
        .change_context_lazy(|| GrmError::grid_read(format!("could not read coordinate '{name}'")))
}

fn find_spatial_ref(ds: &netcdf::File) -> Option<String> {
    GRID_MAPPING_VARS
        .iter()
        .filter_map(|&name| ds.variable(name))
        .find_map(|var| {
            WKT_ATTRS
                .iter()
                .find_map(|&attr| string_attribute(&var, attr))
        })
}

pub(crate) fn coord_min_max(coords: &[f64]) -> (f64, f64) {
    match coords.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => (f64::NAN, f64::NAN),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    }
}
