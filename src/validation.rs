//! Consistency checks run before an observation is written to a collection.
//!
//! Each check is a plain function of the collection's current state and the
//! incoming observation. None of them touch the file system, so the whole
//! list can run (and be tested) before anything is opened for writing.
use chrono::NaiveDate;

use crate::basins::Basin;
use crate::collection::CollectionState;
use crate::error::GrmError;
use crate::grid::{coord_min_max, GridDescriptor};

/// Words in a mask's name too generic to identify a basin.
const GENERIC_MASK_WORDS: &[&str] = &["river", "basin"];

/// What is known about the observation being added.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// The reference grid the observation was regridded onto.
    pub grid: &'a GridDescriptor,
    /// The reference grid's basin mask display name.
    pub mask_name: &'a str,
    pub basin: Basin,
    pub date: NaiveDate,
    pub water_year: i32,
}

/// The outcome of one check: a message for the debug log on success, the
/// error to abort with on failure.
pub type CheckResult = Result<&'static str, GrmError>;

/// One named consistency check. `collection` is `None` when the observation
/// would create a new collection.
#[derive(Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    pub run: fn(Option<&CollectionState>, &Candidate) -> CheckResult,
}

/// All checks, in the order they run.
pub const CHECKS: [Check; 5] = [
    Check { name: "basin", run: check_basin_match },
    Check { name: "domain", run: check_domain_match },
    Check { name: "water year", run: check_water_year_match },
    Check { name: "duplicate date", run: check_duplicate_date },
    Check { name: "mask name", run: check_mask_name },
];

/// Run every check and stop at the first failure.
pub fn validate(
    collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> Result<(), GrmError> {
    for check in CHECKS.iter() {
        let msg = (check.run)(collection, candidate)?;
        log::debug!("{msg}");
    }
    Ok(())
}

/// Run every check and return all of the failures.
pub fn validate_all(collection: Option<&CollectionState>, candidate: &Candidate) -> Vec<GrmError> {
    CHECKS
        .iter()
        .filter_map(|check| (check.run)(collection, candidate).err())
        .collect()
}

/// The collection's title must name the basin being added.
pub fn check_basin_match(
    collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> CheckResult {
    let Some(coll) = collection else {
        return Ok("New collection, no basin to compare against.");
    };

    let basin = candidate.basin.display_name();
    if coll.title.to_lowercase().contains(&basin.to_lowercase()) {
        Ok("Basin entered matches the basin in the preexisting file.")
    } else {
        Err(GrmError::BasinMismatch(format!(
            "the preexisting lidar depths file has the title '{}', which does not name {basin}",
            coll.title
        )))
    }
}

/// The incoming topo must have exactly the collection's `x`/`y` extrema and lengths.
pub fn check_domain_match(
    collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> CheckResult {
    let Some(coll) = collection else {
        return Ok("New collection, domain taken from the topo.");
    };

    let axes = [
        ("x", candidate.grid.x.as_slice(), coll.x.as_slice()),
        ("y", candidate.grid.y.as_slice(), coll.y.as_slice()),
    ];

    let mut problems = vec![];
    for (name, topo, lidar) in axes {
        if topo.len() != lidar.len() {
            let (nt, nl) = (topo.len(), lidar.len());
            problems.push(format!("topo n{name} ({nt}) != lidar n{name} ({nl})"));
        }

        let (topo_min, topo_max) = coord_min_max(topo);
        let (lidar_min, lidar_max) = coord_min_max(lidar);
        if topo_min != lidar_min {
            problems.push(format!(
                "topo {name} min ({topo_min}) != lidar {name} min ({lidar_min})"
            ));
        }
        if topo_max != lidar_max {
            problems.push(format!(
                "topo {name} max ({topo_max}) != lidar {name} max ({lidar_max})"
            ));
        }
    }

    if problems.is_empty() {
        Ok("Topo domain and resolution matches the current lidar netCDF.")
    } else {
        Err(GrmError::DomainMismatch(format!(
            "this lidar file was not initially created with this topo ({}). \
            Either delete the existing lidar netCDF you are adding to, \
            or find the correct topo.",
            problems.join("; ")
        )))
    }
}

/// The collection's epoch must be the start of the observation's water year.
pub fn check_water_year_match(
    collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> CheckResult {
    let Some(coll) = collection else {
        return Ok("New collection, water year taken from the image date.");
    };

    let nc_wy = coll.time.water_year();
    if nc_wy == candidate.water_year {
        Ok("Input image water year matches preexisting netCDF's.")
    } else {
        Err(GrmError::WaterYearMismatch(format!(
            "attempting to add an image from water year {} to a collection for water year {nc_wy}",
            candidate.water_year
        )))
    }
}

/// The collection must not already have a flight on the observation's date.
pub fn check_duplicate_date(
    collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> CheckResult {
    let Some(coll) = collection else {
        return Ok("New collection, no dates recorded yet.");
    };

    if coll.dates().contains(&candidate.date) {
        Err(GrmError::DuplicateDate(format!(
            "this image's date ({}) is already in the preexisting netCDF",
            candidate.date
        )))
    } else {
        Ok("Incoming date appears to be unique to the dataset.")
    }
}

/// At least one distinctive word of the topo's mask name must appear in the basin name.
pub fn check_mask_name(
    _collection: Option<&CollectionState>,
    candidate: &Candidate,
) -> CheckResult {
    let mask_name = candidate.mask_name.to_lowercase();
    let basin = candidate.basin.display_name().to_lowercase();

    let found = mask_name
        .split_whitespace()
        .filter(|w| !GENERIC_MASK_WORDS.contains(w))
        .any(|w| basin.contains(w));

    if found {
        Ok("Topo's mask name matches the basin name.")
    } else {
        Err(GrmError::MaskNameMismatch(format!(
            "topo's mask ({mask_name}) is not associated to the {}",
            candidate.basin.display_name()
        )))
    }
}
