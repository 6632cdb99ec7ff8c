//! Vegetation type, height, and canopy parameters from the LANDFIRE datasets.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{Array2, Zip};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GrmError;

/// Transmissivity used for vegetation types without parameters (no canopy).
pub const DEFAULT_TAU: f64 = 1.0;
/// Extinction coefficient used for vegetation types without parameters (no canopy).
pub const DEFAULT_K: f64 = 0.0;

/// The supported vegetation datasets, named as in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum VegetationDataset {
    #[serde(rename = "landfire_1.4.0")]
    #[strum(serialize = "landfire_1.4.0")]
    Landfire140,
    #[serde(rename = "landfire_2.0.0")]
    #[strum(serialize = "landfire_2.0.0")]
    Landfire200,
}

impl VegetationDataset {
    /// Existing vegetation type raster, relative to the dataset folder.
    pub fn type_raster(&self) -> &'static str {
        match self {
            Self::Landfire140 => "US_140EVT_20180618/Grid/us_140evt",
            Self::Landfire200 => "LF2016_EVT_200_CONUS/LF2016_EVT_200_CONUS/Tif/LC16_EVT_200.tif",
        }
    }

    /// Existing vegetation height raster, relative to the dataset folder.
    pub fn height_raster(&self) -> &'static str {
        match self {
            Self::Landfire140 => "US_140EVH_20180618/Grid/us_140evh",
            Self::Landfire200 => "LF2016_EVH_200_CONUS/LF2016_EVH_200_CONUS/Tif/LC16_EVH_200.tif",
        }
    }

    /// Table of height class names, relative to the dataset folder.
    pub fn height_csv(&self) -> &'static str {
        match self {
            Self::Landfire140 => "US_140EVH_20180618/CSV_Data/LF_140EVH_05092014.csv",
            Self::Landfire200 => {
                "LF2016_EVH_200_CONUS/LF2016_EVH_200_CONUS/CSV_Data/LF16_EVH_200.csv"
            }
        }
    }

    pub fn files(&self, folder: &Path) -> VegetationFiles {
        VegetationFiles {
            veg_type: folder.join(self.type_raster()),
            veg_height: folder.join(self.height_raster()),
            height_csv: folder.join(self.height_csv()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VegetationFiles {
    pub veg_type: PathBuf,
    pub veg_height: PathBuf,
    pub height_csv: PathBuf,
}

#[derive(Debug, Deserialize)]
struct HeightClassRecord {
    #[serde(rename = "VALUE")]
    value: i64,
    #[serde(rename = "CLASSNAMES")]
    class_names: String,
}

/// Canopy parameters for one vegetation type.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CanopyParams {
    pub tau: f64,
    pub k: f64,
}

impl Default for CanopyParams {
    fn default() -> Self {
        Self { tau: DEFAULT_TAU, k: DEFAULT_K }
    }
}

#[derive(Debug, Deserialize)]
struct CanopyRecord {
    value: i64,
    tau: f64,
    k: f64,
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d*\.?\d+").expect("the number regex is valid"))
}

/// The height, in meters, for a class name such as "Tree Height = 10 to 25 meters":
/// the mean of the numbers in the name, or 0 if there are none. Numbers
/// touching an asterisk are footnote markers and ignored.
pub fn class_height(class_name: &str) -> f64 {
    let bytes = class_name.as_bytes();
    let numbers: Vec<f64> = number_regex()
        .find_iter(class_name)
        .filter(|m| {
            let before = m.start().checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(m.end()).copied();
            before != Some(b'*') && after != Some(b'*')
        })
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();

    if numbers.is_empty() {
        0.0
    } else {
        numbers.iter().sum::<f64>() / numbers.len() as f64
    }
}

/// Read a LANDFIRE height CSV into a map from raster value to height.
pub fn read_height_table(path: &Path) -> error_stack::Result<IndexMap<i64, f64>, GrmError> {
    let mut rdr = csv::Reader::from_path(path)
        .change_context_lazy(|| GrmError::grid_read(format!("could not open {}", path.display())))?;

    let mut table = IndexMap::new();
    for rec in rdr.deserialize::<HeightClassRecord>() {
        let rec = rec.change_context_lazy(|| {
            GrmError::grid_read(format!("bad vegetation height row in {}", path.display()))
        })?;
        table.insert(rec.value, class_height(&rec.class_names));
    }
    log::debug!("Read {} vegetation height classes from {}", table.len(), path.display());
    Ok(table)
}

/// Read a `value,tau,k` CSV into a map from vegetation type to canopy parameters.
pub fn read_canopy_table(
    path: &Path,
) -> error_stack::Result<IndexMap<i64, CanopyParams>, GrmError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .change_context_lazy(|| GrmError::grid_read(format!("could not open {}", path.display())))?;

    let mut table = IndexMap::new();
    for rec in rdr.deserialize::<CanopyRecord>() {
        let rec = rec.change_context_lazy(|| {
            GrmError::grid_read(format!("bad vegetation parameter row in {}", path.display()))
        })?;
        table.insert(rec.value, CanopyParams { tau: rec.tau, k: rec.k });
    }
    Ok(table)
}

/// The vegetation fields of a topo.
#[derive(Debug, Clone, PartialEq)]
pub struct VegetationLayers {
    pub veg_type: Array2<i32>,
    pub veg_height: Array2<f64>,
    pub veg_tau: Array2<f64>,
    pub veg_k: Array2<f64>,
}

/// Look up height and canopy parameters for every cell. Missing (NaN) cells
/// and codes absent from the tables get height 0 and the no-canopy parameters.
pub fn compute_layers(
    type_codes: &Array2<f32>,
    height_codes: &Array2<f32>,
    heights: &IndexMap<i64, f64>,
    canopy: &IndexMap<i64, CanopyParams>,
) -> VegetationLayers {
    let code = |v: f32| if v.is_finite() { Some(v.round() as i64) } else { None };

    let veg_type = type_codes.mapv(|v| code(v).unwrap_or(0) as i32);
    let veg_height = height_codes.mapv(|v| {
        code(v).and_then(|c| heights.get(&c).copied()).unwrap_or(0.0)
    });

    let mut veg_tau = Array2::from_elem(type_codes.dim(), DEFAULT_TAU);
    let mut veg_k = Array2::from_elem(type_codes.dim(), DEFAULT_K);
    Zip::from(&mut veg_tau)
        .and(&mut veg_k)
        .and(type_codes)
        .for_each(|tau, k, &t| {
            let params = code(t).and_then(|c| canopy.get(&c).copied()).unwrap_or_default();
            *tau = params.tau;
            *k = params.k;
        });

    VegetationLayers { veg_type, veg_height, veg_tau, veg_k }
}
