//! Command line interface definitions
use std::path::PathBuf;

use basin_setup::{basins::Basin, dates::parse_date_arg, gdal::ResampleMethod};
use chrono::NaiveDate;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Add ASO lidar snow depth images to the per-water-year depth collections
/// of a basin. Each image is regridded onto the topo's grid, masked to the
/// basin, and appended as a new time step.
#[derive(Debug, Parser)]
#[command(version)]
pub(crate) struct Cli {
    /// Topo file defining the grid and basin mask the images are put onto.
    #[clap(short, long)]
    pub(crate) topo: PathBuf,

    /// Lidar depth images to add. They are processed in date order.
    #[clap(short, long, num_args = 1.., required = true)]
    pub(crate) images: Vec<PathBuf>,

    /// Basin the images belong to.
    #[clap(short, long, value_enum)]
    pub(crate) basin: Basin,

    /// Directory where the lidar_depths_wy<YEAR>.nc files are kept.
    #[clap(short, long, default_value = "output")]
    pub(crate) output: PathBuf,

    /// Log debugging messages and keep temporary files. Unless
    /// --allow_exceptions is also given, the first failed image stops the run.
    #[clap(short, long)]
    pub(crate) debug: bool,

    /// Flight dates, one per image in the same order as --images. By
    /// default the dates are parsed from the image file names.
    #[clap(long, num_args = 1.., value_parser = parse_date_arg)]
    pub(crate) dates: Option<Vec<NaiveDate>>,

    /// With --debug, skip failed images instead of stopping.
    #[clap(short = 'e', long = "allow_exceptions")]
    pub(crate) allow_exceptions: bool,

    /// Resampling method used to put the images on the topo grid.
    #[clap(short, long, value_enum, default_value_t)]
    pub(crate) resample: ResampleMethod,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

impl Cli {
    /// Stop at the first failed image rather than skipping it.
    pub(crate) fn strict(&self) -> bool {
        self.debug && !self.allow_exceptions
    }

    pub(crate) fn log_level(&self) -> log::LevelFilter {
        let level = self.verbosity.log_level_filter();
        if self.debug {
            level.max(log::LevelFilter::Debug)
        } else {
            level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "grm",
            "-t",
            "topo.nc",
            "-i",
            "a_20200401.tif",
            "b_20200402.tif",
            "-b",
            "tuolumne",
            "-d",
        ])
        .unwrap();
        assert_eq!(cli.images.len(), 2);
        assert_eq!(cli.basin, Basin::Tuolumne);
        assert_eq!(cli.output, PathBuf::from("output"));
        assert_eq!(cli.resample, ResampleMethod::Bilinear);
        assert!(cli.strict());
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_allow_exceptions_and_dates() {
        let cli = Cli::try_parse_from([
            "grm", "-t", "topo.nc", "-i", "a.tif", "-b", "brb", "-d", "-e", "--dates", "2020-04-01",
            "-r", "near",
        ])
        .unwrap();
        assert!(!cli.strict());
        assert_eq!(cli.dates, Some(vec![NaiveDate::from_ymd_opt(2020, 4, 1).unwrap()]));
        assert_eq!(cli.resample, ResampleMethod::Near);
    }

    #[test]
    fn test_rejects_unknown_basin() {
        let args = ["grm", "-t", "topo.nc", "-i", "a.tif", "-b", "yosemite"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
