use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::GrmError;
use crate::gdal::ResampleMethod;
use crate::grid::Extent;
use crate::topo::vegetation::VegetationDataset;

/// Table in the configuration file holding the generator's settings.
const CONFIG_SECTION: &str = "generate_topo";

/// Settings for building a basin's topo file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopoConfig {
    /// Display name of the basin, stored as the mask's `long_name`.
    pub basin_name: String,
    /// Outline of the basin.
    pub basin_shapefile: PathBuf,
    /// Outlines of sub-basins, each gets its own `mask_<name>` variable.
    #[serde(default)]
    pub sub_basin_files: Vec<PathBuf>,
    pub dem_file: PathBuf,
    /// Where `topo.nc` and the `temp` working directory go.
    pub output_folder: PathBuf,
    /// Edge length of a grid cell, in the units of the target spatial reference.
    pub cell_size: f64,
    /// Cells of padding added around the basin outline (left, bottom, right, top).
    pub pad_domain: [f64; 4],
    /// Explicit domain (xmin, ymin, xmax, ymax); overrides the basin outline and padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate_extent: Option<[f64; 4]>,
    /// Target spatial reference; when absent, the basin outline's `.prj` file is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_srs: Option<String>,
    pub vegetation_dataset: VegetationDataset,
    /// Directory the vegetation dataset was unpacked into.
    pub vegetation_folder: PathBuf,
    /// CSV with `value,tau,k` columns giving canopy parameters per vegetation type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vegetation_params_file: Option<PathBuf>,
    pub vegetation_type_resample_method: ResampleMethod,
    pub vegetation_height_resample_method: ResampleMethod,
}

impl Default for TopoConfig {
    fn default() -> Self {
        Self {
            basin_name: String::new(),
            basin_shapefile: PathBuf::new(),
            sub_basin_files: vec![],
            dem_file: PathBuf::new(),
            output_folder: PathBuf::from("output"),
            cell_size: 50.0,
            pad_domain: [0.0; 4],
            coordinate_extent: None,
            target_srs: None,
            vegetation_dataset: VegetationDataset::Landfire140,
            vegetation_folder: PathBuf::from("landfire"),
            vegetation_params_file: None,
            vegetation_type_resample_method: ResampleMethod::Mode,
            vegetation_height_resample_method: ResampleMethod::Mode,
        }
    }
}

#[derive(Serialize)]
struct ConfigFile<'a> {
    generate_topo: &'a TopoConfig,
}

impl TopoConfig {
    /// Load and validate the `[generate_topo]` table of a TOML file. Keys
    /// missing from the file take their default values.
    pub fn from_file(path: &Path) -> error_stack::Result<Self, GrmError> {
        if !path.exists() {
            let msg = format!("configuration file {} does not exist", path.display());
            return Err(GrmError::config(msg).into());
        }
        Self::from_figment(Figment::new().merge(Toml::file(path)))
            .attach_printable_lazy(|| format!("in configuration file {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> error_stack::Result<Self, GrmError> {
        Self::from_figment(Figment::new().merge(Toml::string(s)))
    }

    fn from_figment(user: Figment) -> error_stack::Result<Self, GrmError> {
        let config: Self = Figment::from(Serialized::default(CONFIG_SECTION, Self::default()))
            .merge(user)
            .extract_inner(CONFIG_SECTION)
            .change_context_lazy(|| {
                GrmError::config("could not parse the [generate_topo] section")
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a parser cannot.
    pub fn validate(&self) -> Result<(), GrmError> {
        if self.basin_name.trim().is_empty() {
            return Err(GrmError::config("basin_name must not be empty"));
        }
        if self.basin_shapefile.as_os_str().is_empty() {
            return Err(GrmError::config("basin_shapefile is required"));
        }
        if self.dem_file.as_os_str().is_empty() {
            return Err(GrmError::config("dem_file is required"));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(GrmError::config(format!(
                "cell_size must be a positive number, got {}",
                self.cell_size
            )));
        }
        if self.pad_domain.iter().any(|&p| !(p.is_finite() && p >= 0.0)) {
            return Err(GrmError::config(format!(
                "pad_domain values must be non-negative, got {:?}",
                self.pad_domain
            )));
        }
        if let Some([xmin, ymin, xmax, ymax]) = self.coordinate_extent {
            if xmax <= xmin || ymax <= ymin {
                return Err(GrmError::config(format!(
                    "coordinate_extent must be [xmin, ymin, xmax, ymax] with max > min, got {:?}",
                    [xmin, ymin, xmax, ymax]
                )));
            }
        }
        Ok(())
    }

    pub fn coordinate_extent(&self) -> Option<Extent> {
        self.coordinate_extent
            .map(|[xmin, ymin, xmax, ymax]| Extent { xmin, ymin, xmax, ymax })
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.output_folder.join("temp")
    }

    pub fn topo_path(&self) -> PathBuf {
        self.output_folder.join("topo.nc")
    }

    /// Write an example configuration file, with comments, to `path`.
    pub fn write_template_example(path: &Path) -> error_stack::Result<(), GrmError> {
        let comments = [
            "Example configuration for generate_topo.",
            "",
            "cell_size and pad_domain are in the units of the target spatial reference;",
            "pad_domain is a number of cells to add to the left, bottom, right and top of",
            "the basin outline. Set coordinate_extent = [xmin, ymin, xmax, ymax] to skip",
            "the outline and use that domain exactly.",
            "",
            "vegetation_dataset may be \"landfire_1.4.0\" or \"landfire_2.0.0\".",
        ];
        let template = Self::template_example();
        let s = toml::to_string_pretty(&ConfigFile { generate_topo: &template })
            .change_context_lazy(|| {
                GrmError::config("could not serialize the example configuration")
            })?;

        let mut f = std::fs::File::create(path).change_context_lazy(|| {
            GrmError::store_io(format!("could not create template file {}", path.display()))
        })?;
        let write_err = || GrmError::store_io(format!("error writing to {}", path.display()));
        for line in comments {
            writeln!(f, "# {line}").change_context_lazy(write_err)?;
        }
        write!(f, "{s}").change_context_lazy(write_err)?;
        Ok(())
    }

    pub fn template_example() -> Self {
        Self {
            basin_name: "Lakes Basin".to_string(),
            basin_shapefile: PathBuf::from("data/basin_outline.shp"),
            sub_basin_files: vec![],
            dem_file: PathBuf::from("data/dem.tif"),
            output_folder: PathBuf::from("output"),
            cell_size: 150.0,
            pad_domain: [1.0, 1.0, 1.0, 1.0],
            coordinate_extent: None,
            target_srs: Some("EPSG:32611".to_string()),
            vegetation_dataset: VegetationDataset::Landfire140,
            vegetation_folder: PathBuf::from("/data/landfire"),
            vegetation_params_file: Some(PathBuf::from("data/vegetation_params.csv")),
            vegetation_type_resample_method: ResampleMethod::Mode,
            vegetation_height_resample_method: ResampleMethod::Mode,
        }
    }
}
