//! Adding lidar flights to the per-water-year collections.
//!
//! [`run_grm`] takes one image through the whole pipeline; [`run_batch`]
//! sorts a set of images by date and runs each of them, isolating failures
//! unless asked to stop at the first one.
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use error_stack::ResultExt;

use crate::basins::Basin;
use crate::collection::CollectionStore;
use crate::dates::parse_fname_date;
use crate::error::GrmError;
use crate::gdal::{ResampleMethod, Warp};
use crate::grid::{BasinMask, GridDescriptor};
use crate::regrid::regrid_and_mask;
use crate::validation::{validate, Candidate};
use crate::water_year::{compute_time_index, water_year};

/// Everything needed to add one image to its collection.
#[derive(Debug, Clone, PartialEq)]
pub struct GrmSettings {
    /// The lidar depth raster to add.
    pub image: PathBuf,
    /// The reference topo that defines the grid and basin mask.
    pub topo: PathBuf,
    pub basin: Basin,
    /// Keep temporary files. In a batch, also stop at the first error unless
    /// exceptions are allowed.
    pub debug: bool,
    /// Directory holding the collection files.
    pub output: PathBuf,
    /// Directory for regridded images.
    pub temp: PathBuf,
    pub resample: ResampleMethod,
    /// Flight date; parsed from the image file name when `None`.
    pub date: Option<NaiveDate>,
}

/// Where an image ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedFlight {
    pub date: NaiveDate,
    pub water_year: i32,
    pub collection: PathBuf,
    pub time_index: usize,
}

/// Run the full pipeline for one image: date, grid, regrid, checks, write.
pub fn run_grm(
    settings: &GrmSettings,
    warper: &dyn Warp,
) -> error_stack::Result<AddedFlight, GrmError> {
    let date = match settings.date {
        Some(d) => d,
        None => parse_fname_date(&settings.image).ok_or_else(|| {
            GrmError::date_parse(format!(
                "no date found in the file name of {}, pass it explicitly with --dates",
                settings.image.display()
            ))
        })?,
    };
    let wy = water_year(date);
    log::info!("Image date is {date}, water year {wy}");

    let grid = GridDescriptor::describe(&settings.topo)?;
    let mask = BasinMask::read(&settings.topo)?;
    log::debug!(
        "Reference grid is {} x {} cells of {} x {} {}",
        grid.nx,
        grid.ny,
        grid.cell_size_x.abs(),
        grid.cell_size_y.abs(),
        grid.units.as_deref().unwrap_or("(unknown units)")
    );

    let depths = regrid_and_mask(
        warper,
        &settings.image,
        &grid,
        &mask,
        settings.resample,
        &settings.temp,
    )?;

    let store = CollectionStore::new(&settings.output);
    let existing = store.open(wy)?;
    let candidate = Candidate {
        grid: &grid,
        mask_name: &mask.name,
        basin: settings.basin,
        date,
        water_year: wy,
    };
    validate(existing.as_ref(), &candidate)?;

    let mut state = match existing {
        Some(state) => state,
        None => store.create(&settings.topo, &grid, settings.basin, wy)?,
    };

    let index = compute_time_index(&state.times, &state.time, date);
    store
        .append(&mut state, index, date, &depths)
        .attach_printable_lazy(|| format!("adding {}", settings.image.display()))?;

    let collection = store.path_for(wy);
    log::info!("Added {date} to {}", collection.display());
    Ok(AddedFlight {
        date,
        water_year: wy,
        collection,
        time_index: index.index,
    })
}

/// Settings shared by every image in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub topo: PathBuf,
    pub basin: Basin,
    pub output: PathBuf,
    pub resample: ResampleMethod,
    pub debug: bool,
    /// Stop at the first failed image instead of skipping it.
    pub strict: bool,
}

/// An image that could not be added, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub image: PathBuf,
    pub error: GrmError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub total: usize,
    pub skipped: Vec<SkippedImage>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn log(&self) {
        for skip in self.skipped.iter() {
            log::warn!("Skipped {}: {}", skip.image.display(), skip.error.kind());
        }
        log::info!(
            "Finished processing {}/{} images in {:.1} s, {} skipped",
            self.processed,
            self.total,
            self.elapsed.as_secs_f64(),
            self.skipped.len()
        );
        if self.processed == 0 {
            log::warn!("No images were processed!");
        }
    }
}

/// Pair images with their dates and sort them, stably, by date. Images
/// without a date go last.
pub fn order_observations(
    images: Vec<PathBuf>,
    dates: Option<Vec<NaiveDate>>,
) -> error_stack::Result<Vec<(PathBuf, Option<NaiveDate>)>, GrmError> {
    let mut observations: Vec<(PathBuf, Option<NaiveDate>)> = match dates {
        Some(dates) => {
            if dates.len() != images.len() {
                return Err(GrmError::config(format!(
                    "{} dates were given for {} images, the counts must match",
                    dates.len(),
                    images.len()
                ))
                .into());
            }
            images.into_iter().zip(dates.into_iter().map(Some)).collect()
        }
        None => images
            .into_iter()
            .map(|img| {
                let d = parse_fname_date(&img);
                (img, d)
            })
            .collect(),
    };

    observations.sort_by_key(|(_, d)| (d.is_none(), *d));
    Ok(observations)
}

/// Add every image to its collection.
///
/// Per-image errors are logged and counted as skips unless `options.strict`
/// is set, in which case the first one is returned. The temporary directory
/// is removed at the end unless `options.debug` is set.
pub fn run_batch(
    images: Vec<PathBuf>,
    dates: Option<Vec<NaiveDate>>,
    options: &BatchOptions,
    warper: &dyn Warp,
) -> error_stack::Result<BatchSummary, GrmError> {
    let start = Instant::now();
    let observations = order_observations(images, dates)?;
    let store = CollectionStore::new(&options.output);
    let temp = store.temp_dir();

    std::fs::create_dir_all(&temp).change_context_lazy(|| {
        GrmError::store_io(format!("could not create {}", temp.display()))
    })?;

    let total = observations.len();
    let mut processed = 0;
    let mut skipped = vec![];

    for (i, (image, date)) in observations.into_iter().enumerate() {
        log::info!("Processing {} ({}/{total})", image.display(), i + 1);
        let settings = GrmSettings {
            image: image.clone(),
            topo: options.topo.clone(),
            basin: options.basin,
            debug: options.debug,
            output: options.output.clone(),
            temp: temp.clone(),
            resample: options.resample,
            date,
        };

        match run_grm(&settings, warper) {
            Ok(_) => processed += 1,
            Err(e) if options.strict => {
                log::error!("{e}");
                return Err(e.attach_printable(format!("while processing {}", image.display())));
            }
            Err(e) => {
                log::error!("{}: {e:?}", e.current_context().kind());
                skipped.push(SkippedImage {
                    image,
                    error: e.current_context().clone(),
                });
            }
        }
    }

    if !options.debug && temp.exists() {
        log::debug!("Removing {}", temp.display());
        if let Err(e) = std::fs::remove_dir_all(&temp) {
            log::warn!("Could not remove temporary directory {}: {e}", temp.display());
        }
    }

    let summary = BatchSummary {
        processed,
        total,
        skipped,
        elapsed: start.elapsed(),
    };
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::test_topo;
    use crate::regrid::tests::{touch_image, FakeWarp};
    use std::path::Path;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn options(dir: &Path, strict: bool) -> BatchOptions {
        BatchOptions {
            topo: test_topo(dir, "topo.nc", 100.0, 10),
            basin: Basin::Tuolumne,
            output: dir.join("output"),
            resample: ResampleMethod::Bilinear,
            debug: strict,
            strict,
        }
    }

    fn three_images(dir: &Path) -> Vec<PathBuf> {
        vec![
            touch_image(dir, "USCATB20200401_depth.tif"),
            touch_image(dir, "USCATB20200301_bad.tif"),
            touch_image(dir, "USCATB20200201_depth.tif"),
        ]
    }

    #[test]
    fn test_single_image() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), false);
        let settings = GrmSettings {
            image: touch_image(dir.path(), "USCATB20200414_depth.tif"),
            topo: opts.topo.clone(),
            basin: Basin::Tuolumne,
            debug: false,
            output: opts.output.clone(),
            temp: opts.output.join("tmp"),
            resample: ResampleMethod::Bilinear,
            date: None,
        };

        let added = run_grm(&settings, &FakeWarp::new()).unwrap();
        assert_eq!(added.date, ymd(2020, 4, 14));
        assert_eq!(added.water_year, 2020);
        assert_eq!(added.time_index, 0);
        assert_eq!(added.collection, opts.output.join("lidar_depths_wy2020.nc"));

        // Same image again is a duplicate
        let err = run_grm(&settings, &FakeWarp::new()).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::DuplicateDate(_)));

        // Same date under another basin is rejected by the basin check first
        let other = GrmSettings { basin: Basin::Merced, ..settings };
        let err = run_grm(&other, &FakeWarp::new()).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::BasinMismatch(_)));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), false);
        let images = three_images(dir.path());

        let summary = run_batch(images, None, &opts, &FakeWarp::failing_on("bad")).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].image.ends_with("USCATB20200301_bad.tif"));
        assert!(matches!(summary.skipped[0].error, GrmError::Warp(_)));

        let store = CollectionStore::new(&opts.output);
        let state = store.open(2020).unwrap().unwrap();
        assert_eq!(state.dates(), vec![ymd(2020, 2, 1), ymd(2020, 4, 1)]);
        assert!(!store.temp_dir().exists());
    }

    #[test]
    fn test_strict_batch_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), true);
        let images = three_images(dir.path());

        let err = run_batch(images, None, &opts, &FakeWarp::failing_on("bad")).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::Warp(_)));

        // Only the earliest image made it in; debug keeps the temporary files
        let store = CollectionStore::new(&opts.output);
        let state = store.open(2020).unwrap().unwrap();
        assert_eq!(state.dates(), vec![ymd(2020, 2, 1)]);
        assert!(store.temp_dir().exists());
    }

    #[test]
    fn test_order_observations() {
        let images = vec![
            PathBuf::from("undated.tif"),
            PathBuf::from("x_20200401.tif"),
            PathBuf::from("y_20191201.tif"),
        ];
        let ordered = order_observations(images, None).unwrap();
        let names: Vec<_> = ordered.iter().map(|(p, _)| p.to_string_lossy().to_string()).collect();
        assert_eq!(names, ["y_20191201.tif", "x_20200401.tif", "undated.tif"]);
        assert_eq!(ordered[2].1, None);

        let err = order_observations(vec![PathBuf::from("a.tif")], Some(vec![])).unwrap_err();
        assert!(matches!(err.current_context(), GrmError::ConfigValidation(_)));
    }

    #[test]
    fn test_undated_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), false);
        let images = vec![
            touch_image(dir.path(), "depth_nodate.tif"),
            touch_image(dir.path(), "USCATB20200201_depth.tif"),
        ];

        let summary = run_batch(images, None, &opts, &FakeWarp::new()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(matches!(summary.skipped[0].error, GrmError::DateParse(_)));
    }

    #[test]
    fn test_explicit_dates_override_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), false);
        let images = vec![
            touch_image(dir.path(), "depth_a.tif"),
            touch_image(dir.path(), "depth_b.tif"),
        ];
        let dates = vec![ymd(2019, 12, 5), ymd(2019, 11, 5)];

        let summary = run_batch(images, Some(dates), &opts, &FakeWarp::new()).unwrap();
        assert_eq!(summary.processed, 2);
        let state = CollectionStore::new(&opts.output).open(2020).unwrap().unwrap();
        assert_eq!(state.dates(), vec![ymd(2019, 11, 5), ymd(2019, 12, 5)]);
    }
}
