pub mod basins;
pub mod collection;
pub mod dates;
pub mod error;
pub mod gdal;
pub mod grid;
pub mod grm;
pub mod logging;
pub mod nc_utils;
pub mod regrid;
pub mod topo;
pub mod validation;
pub mod water_year;
