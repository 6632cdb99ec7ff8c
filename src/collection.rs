//! The per-water-year lidar depth collection files.
//!
//! A collection is a netCDF file with the reference topo's `x`/`y` grid, an
//! unlimited `time` dimension and a `depth[time, y, x]` variable. Flights are
//! only ever appended; the spatial dimensions never change after creation.
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use error_stack::ResultExt;
use ndarray::Array2;

use crate::basins::Basin;
use crate::error::GrmError;
use crate::grid::GridDescriptor;
use crate::nc_utils::{
    copy_global_attributes, copy_variable, global_string_attribute, history_attribute,
    read_f64_values, string_attribute,
};
use crate::water_year::{TimeConvention, TimeIndex, STANDARD_CALENDAR};

pub const TIME_VAR: &str = "time";
pub const DEPTH_VAR: &str = "depth";
/// Grid-mapping variable copied from the topo and referenced by `depth`.
pub const PROJECTION_VAR: &str = "projection";
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Chunk length along `time`; the spatial chunks are at most this many cells per side.
const TIME_CHUNK: usize = 6;
const SPATIAL_CHUNK: usize = 10;

/// The parts of a collection the consistency checks and the time indexer need.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// The `Title` global attribute, which names the basin.
    pub title: String,
    pub time: TimeConvention,
    /// Values of the `time` variable, in `time`'s units.
    pub times: Vec<f64>,
}

impl CollectionState {
    /// The calendar dates of the flights already in the collection.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.times
            .iter()
            .filter_map(|&t| self.time.to_datetime(t).ok())
            .map(|dt| dt.date())
            .collect()
    }
}

/// The title recorded in a new collection.
pub fn collection_title(cell_size: f64, basin: Basin, water_year: i32) -> String {
    format!(
        "ASO {cell_size}m Lidar Flights Over the {} for Water Year {water_year}.",
        basin.display_name()
    )
}

/// Owns the directory where collection files live.
#[derive(Debug, Clone)]
pub struct CollectionStore {
    output_dir: PathBuf,
}

impl CollectionStore {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Scratch directory for regridded images.
    pub fn temp_dir(&self) -> PathBuf {
        self.output_dir.join("tmp")
    }

    /// Path of the collection for `water_year`.
    pub fn path_for(&self, water_year: i32) -> PathBuf {
        self.output_dir.join(format!("lidar_depths_wy{water_year}.nc"))
    }

    /// Read the state of the collection for `water_year`, or `None` if it
    /// has not been created yet.
    pub fn open(&self, water_year: i32) -> error_stack::Result<Option<CollectionState>, GrmError> {
        let path = self.path_for(water_year);
        if !path.exists() {
            return Ok(None);
        }

        log::info!("Opening {} for appending", path.display());
        let ds = netcdf::open(&path)
            .change_context_lazy(|| {
                GrmError::store_io(format!("could not open {}", path.display()))
            })?;
        read_state(&ds).attach_printable_lazy(|| format!("reading {}", path.display())).map(Some)
    }

    /// Create the collection for `water_year` on the grid of `topo`.
    ///
    /// The file is built under a temporary name next to its final path and
    /// renamed once it is complete.
    pub fn create(
        &self,
        topo: &Path,
        grid: &GridDescriptor,
        basin: Basin,
        water_year: i32,
    ) -> error_stack::Result<CollectionState, GrmError> {
        let final_path = self.path_for(water_year);
        let tmp_path = final_path.with_extension("nc.tmp");
        log::info!("Creating a new lidar depths collection at {}", final_path.display());

        std::fs::create_dir_all(&self.output_dir).change_context_lazy(|| {
            let dir = self.output_dir.display();
            GrmError::store_io(format!("could not create output directory {dir}"))
        })?;

        let time = TimeConvention::for_water_year(water_year)
            .change_context_lazy(|| GrmError::store_io("could not compute the water year start"))?;
        let title = collection_title(grid.cell_size_x.abs(), basin, water_year);

        init_collection_file(topo, &tmp_path, grid, &time, &title)
            .change_context_lazy(|| {
                GrmError::store_io(format!("could not write {}", tmp_path.display()))
            })?;

        std::fs::rename(&tmp_path, &final_path).change_context_lazy(|| {
            GrmError::store_io(format!(
                "could not move {} to {}",
                tmp_path.display(),
                final_path.display()
            ))
        })?;

        Ok(CollectionState {
            x: grid.x.clone(),
            y: grid.y.clone(),
            title,
            time,
            times: vec![],
        })
    }

    /// Write one flight into the collection at `index`.
    ///
    /// The depth slice goes in first so that the time axis never claims a
    /// flight whose data is not there. `state` is updated to match the file.
    pub fn append(
        &self,
        state: &mut CollectionState,
        index: TimeIndex,
        date: NaiveDate,
        depths: &Array2<f32>,
    ) -> error_stack::Result<(), GrmError> {
        if !index.is_new {
            return Err(GrmError::DuplicateDate(format!(
                "{date} is already at time index {}",
                index.index
            ))
            .into());
        }
        if index.index != state.times.len() {
            return Err(GrmError::store_io(format!(
                "can only append at time index {}, got {}",
                state.times.len(),
                index.index
            ))
            .into());
        }
        if depths.dim() != (state.y.len(), state.x.len()) {
            return Err(GrmError::store_io(format!(
                "depths have shape {:?}, the collection expects ({}, {})",
                depths.dim(),
                state.y.len(),
                state.x.len()
            ))
            .into());
        }

        let path = self.path_for(state.time.water_year());
        let t = state.time.flight_value(date);
        log::debug!("Adding {date} at {t} {} (time index {})", state.time.unit, index.index);

        write_flight(&path, index.index, t, depths)
            .change_context_lazy(|| {
                GrmError::store_io(format!("could not append to {}", path.display()))
            })?;

        state.times.push(t);
        Ok(())
    }
}

fn read_state(ds: &netcdf::File) -> error_stack::Result<CollectionState, GrmError> {
    let x = read_f64_values(ds, "x")
        .change_context_lazy(|| GrmError::store_io("could not read 'x'"))?;
    let y = read_f64_values(ds, "y")
        .change_context_lazy(|| GrmError::store_io("could not read 'y'"))?;
    let title = global_string_attribute(ds, "Title").unwrap_or_default();

    let time_var = ds
        .variable(TIME_VAR)
        .ok_or_else(|| GrmError::store_io("collection has no 'time' variable"))?;
    let units = string_attribute(&time_var, "units")
        .ok_or_else(|| GrmError::store_io("the 'time' variable has no units"))?;
    let calendar = string_attribute(&time_var, "calendar");
    let time = TimeConvention::parse(&units, calendar.as_deref())
        .change_context_lazy(|| {
            GrmError::store_io("could not interpret the collection's time axis")
        })?;
    let mut times = time_var
        .get_values::<f64, _>(netcdf::Extents::All)
        .change_context_lazy(|| GrmError::store_io("could not read 'time' values"))?;
    let n_recorded = recorded_flights(&times, &time)?;
    if n_recorded < times.len() {
        log::warn!(
            "Time index {n_recorded} has depths but no time value, an earlier append was \
            interrupted and the index will be reused"
        );
        times.truncate(n_recorded);
    }

    Ok(CollectionState { x, y, title, time, times })
}

/// Number of leading entries of `times` that are real flight times.
///
/// Depths are written before the time value, so an interrupted append leaves
/// the last time entry as the fill value. Such an entry can only be the last
/// one; a fill value followed by recorded times means the file is damaged.
fn recorded_flights(times: &[f64], time: &TimeConvention) -> Result<usize, GrmError> {
    let n = times
        .iter()
        .position(|&t| time.to_datetime(t).is_err())
        .unwrap_or(times.len());
    if n + 1 < times.len() {
        return Err(GrmError::store_io(format!(
            "time index {n} has no valid time value but later indices do, the collection is damaged"
        )));
    }
    Ok(n)
}

fn init_collection_file(
    topo: &Path,
    nc_path: &Path,
    grid: &GridDescriptor,
    time: &TimeConvention,
    title: &str,
) -> netcdf::Result<()> {
    let topo_ds = netcdf::open(topo)?;
    let mut ds = netcdf::create(nc_path)?;

    copy_global_attributes(&topo_ds, &mut ds)?;
    copy_variable(&topo_ds, &mut ds, "x")?;
    copy_variable(&topo_ds, &mut ds, "y")?;
    if topo_ds.variable(PROJECTION_VAR).is_some() {
        copy_variable(&topo_ds, &mut ds, PROJECTION_VAR)?;
    }

    ds.add_unlimited_dimension(TIME_VAR)?;
    let mut tvar = ds.add_variable::<f32>(TIME_VAR, &[TIME_VAR])?;
    tvar.put_attribute("units", time.units_string())?;
    tvar.put_attribute("calendar", STANDARD_CALENDAR)?;
    tvar.put_attribute("long_name", "time")?;

    let mut dvar = ds.add_variable::<f32>(DEPTH_VAR, &[TIME_VAR, "y", "x"])?;
    dvar.set_chunking(&[TIME_CHUNK, grid.ny.min(SPATIAL_CHUNK), grid.nx.min(SPATIAL_CHUNK)])?;
    dvar.set_fill_value(f32::NAN)?;
    dvar.put_attribute("units", "meters")?;
    dvar.put_attribute("long_name", "lidar snow depths")?;
    dvar.put_attribute("short_name", "depth")?;
    dvar.put_attribute("grid_mapping", PROJECTION_VAR)?;
    dvar.put_attribute("description", "Measured snow depth from ASO lidar.")?;

    let now = chrono::Local::now().format(TIMESTAMP_FMT).to_string();
    ds.add_attribute("last_modified", now.as_str())?;
    ds.add_attribute("dateCreated", now.as_str())?;
    ds.add_attribute("Title", title)?;
    ds.add_attribute("history", history_attribute().as_str())?;

    ds.close()
}

fn write_flight(path: &Path, index: usize, t: f64, depths: &Array2<f32>) -> netcdf::Result<()> {
    let (ny, nx) = depths.dim();
    let mut ds = netcdf::append(path)?;

    let flat: Vec<f32> = depths.iter().copied().collect();
    let mut dvar = ds
        .variable_mut(DEPTH_VAR)
        .ok_or_else(|| netcdf::Error::NotFound(format!("variable '{DEPTH_VAR}'")))?;
    let extents: netcdf::Extents = [index..index + 1, 0..ny, 0..nx].into();
    dvar.put_values(&flat, extents)?;

    let mut tvar = ds
        .variable_mut(TIME_VAR)
        .ok_or_else(|| netcdf::Error::NotFound(format!("variable '{TIME_VAR}'")))?;
    let extents: netcdf::Extents = [index..index + 1].into();
    tvar.put_values(&[t as f32], extents)?;

    let now = chrono::Local::now().format(TIMESTAMP_FMT).to_string();
    ds.add_attribute("last_modified", now.as_str())?;

    // Closing syncs the file to disk
    ds.close()
}
