//! Invocation contracts for the external GDAL command line tools.
//!
//! Nothing here knows how to resample a raster. The request types describe
//! exactly what to ask for and the [`Warp`] trait is the seam that lets the
//! pipeline run against `gdalwarp` in production and against a fake in tests.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use error_stack::ResultExt;

use crate::error::GrmError;
use crate::grid::Extent;

/// The sentinel used for missing pixels in both source and destination rasters.
pub const NODATA_SENTINEL: f64 = -9999.0;

/// Resampling algorithms passed through to the warp tool.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ResampleMethod {
    #[strum(serialize = "near")]
    #[value(name = "near")]
    #[serde(rename = "near")]
    Near,
    #[default]
    #[strum(serialize = "bilinear")]
    #[value(name = "bilinear")]
    #[serde(rename = "bilinear")]
    Bilinear,
    #[strum(serialize = "cubic")]
    #[value(name = "cubic")]
    #[serde(rename = "cubic")]
    Cubic,
    #[strum(serialize = "cubicspline")]
    #[value(name = "cubicspline")]
    #[serde(rename = "cubicspline")]
    CubicSpline,
    #[strum(serialize = "lanczos")]
    #[value(name = "lanczos")]
    #[serde(rename = "lanczos")]
    Lanczos,
    #[strum(serialize = "average")]
    #[value(name = "average")]
    #[serde(rename = "average")]
    Average,
    #[strum(serialize = "mode")]
    #[value(name = "mode")]
    #[serde(rename = "mode")]
    Mode,
    #[strum(serialize = "max")]
    #[value(name = "max")]
    #[serde(rename = "max")]
    Max,
    #[strum(serialize = "min")]
    #[value(name = "min")]
    #[serde(rename = "min")]
    Min,
    #[strum(serialize = "med")]
    #[value(name = "med")]
    #[serde(rename = "med")]
    Median,
    #[strum(serialize = "Q1")]
    #[value(name = "Q1")]
    #[serde(rename = "Q1")]
    FirstQuartile,
    #[strum(serialize = "Q3")]
    #[value(name = "Q3")]
    #[serde(rename = "Q3")]
    ThirdQuartile,
}

/// Everything the warp tool needs to put a raster onto a target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Target spatial reference; when `None` the source's is kept.
    pub target_srs: Option<String>,
    pub extent: Extent,
    /// Output size as (columns, rows).
    pub size: (usize, usize),
    pub resample: ResampleMethod,
    pub nodata: f64,
}

impl WarpRequest {
    /// The `gdalwarp` arguments for this request. The output is always a
    /// netCDF file so it can be read back with the same code as the topo.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-r".into(),
            self.resample.to_string().into(),
            "-of".into(),
            "netCDF".into(),
            "-overwrite".into(),
            "-srcnodata".into(),
            self.nodata.to_string().into(),
            "-dstnodata".into(),
            self.nodata.to_string().into(),
        ];

        if let Some(srs) = &self.target_srs {
            args.push("-t_srs".into());
            args.push(srs.into());
        }

        args.push("-te".into());
        args.extend(extent_args(&self.extent));
        args.push("-ts".into());
        args.push(self.size.0.to_string().into());
        args.push(self.size.1.to_string().into());
        args.push(self.source.clone().into_os_string());
        args.push(self.destination.clone().into_os_string());
        args
    }
}

/// Burn a vector outline into a raster on a target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizeRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub extent: Extent,
    pub size: (usize, usize),
}

impl RasterizeRequest {
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-burn".into(),
            "1".into(),
            "-init".into(),
            "0".into(),
            "-ot".into(),
            "Byte".into(),
            "-of".into(),
            "netCDF".into(),
            "-te".into(),
        ];
        args.extend(extent_args(&self.extent));
        args.push("-ts".into());
        args.push(self.size.0.to_string().into());
        args.push(self.size.1.to_string().into());
        args.push(self.source.clone().into_os_string());
        args.push(self.destination.clone().into_os_string());
        args
    }
}

fn extent_args(extent: &Extent) -> [OsString; 4] {
    [
        extent.xmin.to_string().into(),
        extent.ymin.to_string().into(),
        extent.xmax.to_string().into(),
        extent.ymax.to_string().into(),
    ]
}

/// The external raster collaborator: regrid or rasterize into a netCDF file
/// with dimensions `x`, `y` and a single band variable.
pub trait Warp {
    fn warp(&self, request: &WarpRequest) -> error_stack::Result<(), GrmError>;

    fn rasterize(&self, request: &RasterizeRequest) -> error_stack::Result<(), GrmError>;

    /// Bounding box of the features in a vector file.
    fn vector_extent(&self, path: &Path) -> error_stack::Result<Extent, GrmError> {
        vector_extent(path)
    }
}

/// [`Warp`] implementation that shells out to the GDAL command line tools.
#[derive(Debug, Clone)]
pub struct GdalTools {
    warp_program: PathBuf,
    rasterize_program: PathBuf,
}

impl Default for GdalTools {
    fn default() -> Self {
        Self {
            warp_program: PathBuf::from("gdalwarp"),
            rasterize_program: PathBuf::from("gdal_rasterize"),
        }
    }
}

impl GdalTools {
    pub fn new(warp_program: PathBuf, rasterize_program: PathBuf) -> Self {
        Self { warp_program, rasterize_program }
    }
}

impl Warp for GdalTools {
    fn warp(&self, request: &WarpRequest) -> error_stack::Result<(), GrmError> {
        run_tool(&self.warp_program, &request.to_args())
    }

    fn rasterize(&self, request: &RasterizeRequest) -> error_stack::Result<(), GrmError> {
        run_tool(&self.rasterize_program, &request.to_args())
    }
}

/// Run one external program to completion. It is tried exactly once; a
/// non-zero exit is reported with the tool's stderr attached.
fn run_tool(program: &Path, args: &[OsString]) -> error_stack::Result<(), GrmError> {
    log::debug!(
        "Executing: {} {}",
        program.display(),
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    );

    let output = Command::new(program)
        .args(args)
        .output()
        .change_context_lazy(|| {
            GrmError::warp(format!(
                "could not run {}, make sure GDAL is installed and on your PATH",
                program.display()
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(error_stack::Report::new(GrmError::warp(format!(
            "{} exited with {}",
            program.display(),
            output.status
        )))
        .attach_printable(stderr.trim().to_string()));
    }

    Ok(())
}

/// Read the extent of the first layer in a vector file from `ogrinfo`'s summary output,
/// e.g. the line `Extent: (319570.405027, 4157787.075470) - (328270.405027, 4167087.075470)`.
pub fn vector_extent(path: &Path) -> error_stack::Result<Extent, GrmError> {
    let output = Command::new("ogrinfo")
        .arg("-so")
        .arg("-al")
        .arg(path)
        .output()
        .change_context_lazy(|| GrmError::warp("could not run ogrinfo"))?;

    if !output.status.success() {
        return Err(GrmError::warp(format!(
            "ogrinfo failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
        .into());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ogrinfo_extent(&stdout).ok_or_else(|| {
        GrmError::warp(format!("no extent found in ogrinfo output for {}", path.display())).into()
    })
}

pub(crate) fn parse_ogrinfo_extent(summary: &str) -> Option<Extent> {
    let line = summary.lines().find(|l| l.trim_start().starts_with("Extent:"))?;
    let numbers: Vec<f64> = line
        .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == 'e' || c == 'E'))
        .filter(|s| !s.is_empty() && *s != "-")
        .filter_map(|s| s.parse().ok())
        .collect();

    if numbers.len() != 4 {
        return None;
    }

    Some(Extent {
        xmin: numbers[0],
        ymin: numbers[1],
        xmax: numbers[2],
        ymax: numbers[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn args_as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_warp_args() {
        let req = WarpRequest {
            source: PathBuf::from("in.tif"),
            destination: PathBuf::from("tmp/out.nc"),
            target_srs: Some("EPSG:32611".to_string()),
            extent: Extent { xmin: 0.0, ymin: 0.0, xmax: 100.0, ymax: 50.5 },
            size: (10, 5),
            resample: ResampleMethod::Bilinear,
            nodata: NODATA_SENTINEL,
        };

        let expected = [
            "-r", "bilinear", "-of", "netCDF", "-overwrite", "-srcnodata", "-9999", "-dstnodata",
            "-9999", "-t_srs", "EPSG:32611", "-te", "0", "0", "100", "50.5", "-ts", "10", "5",
            "in.tif", "tmp/out.nc",
        ];
        assert_eq!(args_as_strings(req.to_args()), expected);
        // Same request, same command
        assert_eq!(req.to_args(), req.clone().to_args());
    }

    #[test]
    fn test_rasterize_args() {
        let req = RasterizeRequest {
            source: PathBuf::from("basin.shp"),
            destination: PathBuf::from("mask.nc"),
            extent: Extent { xmin: 1.0, ymin: 2.0, xmax: 3.0, ymax: 4.0 },
            size: (2, 2),
        };
        let args = args_as_strings(req.to_args());
        assert_eq!(&args[..4], ["-burn", "1", "-init", "0"]);
        assert_eq!(&args[args.len() - 2..], ["basin.shp", "mask.nc"]);
    }

    #[test]
    fn test_resample_names() {
        assert_eq!(ResampleMethod::default().to_string(), "bilinear");
        assert_eq!(ResampleMethod::ThirdQuartile.to_string(), "Q3");
        assert_eq!(ResampleMethod::from_str("med").unwrap(), ResampleMethod::Median);
        assert!(ResampleMethod::from_str("nearest").is_err());
    }

    #[test]
    fn test_missing_program_is_warp_error() {
        let tools = GdalTools::new(
            PathBuf::from("/definitely/not/gdalwarp"),
            PathBuf::from("/definitely/not/gdal_rasterize"),
        );
        let req = WarpRequest {
            source: PathBuf::from("in.tif"),
            destination: PathBuf::from("out.nc"),
            target_srs: None,
            extent: Extent { xmin: 0.0, ymin: 0.0, xmax: 1.0, ymax: 1.0 },
            size: (1, 1),
            resample: ResampleMethod::Near,
            nodata: NODATA_SENTINEL,
        };
        let err = tools.warp(&req).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::Warp(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_warp_error_with_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_gdalwarp.sh");
        let body = "#!/bin/sh\necho 'ERROR 4: in.tif: No such file' >&2\nexit 3\n";
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tools = GdalTools::new(script.clone(), script);
        let req = WarpRequest {
            source: PathBuf::from("in.tif"),
            destination: dir.path().join("out.nc"),
            target_srs: None,
            extent: Extent { xmin: 0.0, ymin: 0.0, xmax: 1.0, ymax: 1.0 },
            size: (1, 1),
            resample: ResampleMethod::Bilinear,
            nodata: NODATA_SENTINEL,
        };
        let err = tools.warp(&req).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::Warp(_)));
        assert!(err.current_context().to_string().contains("exit"));
        assert!(format!("{err:?}").contains("ERROR 4: in.tif: No such file"));
    }

    #[test]
    fn test_parse_ogrinfo_extent() {
        let summary = "INFO: Open of `basin.shp'\n\
                       Layer name: basin\n\
                       Geometry: Polygon\n\
                       Feature Count: 1\n\
                       Extent: (319570.405027, 4157787.075470) - (328270.405027, 4167087.075470)\n";
        let extent = parse_ogrinfo_extent(summary).unwrap();
        assert_eq!(
            extent,
            Extent {
                xmin: 319570.405027,
                ymin: 4157787.07547,
                xmax: 328270.405027,
                ymax: 4167087.07547
            }
        );
        assert!(parse_ogrinfo_extent("Layer name: basin").is_none());
    }
}
