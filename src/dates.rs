//! Getting flight dates from file names or from the user.
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::GrmError;

/// Formats tried, by number of digits, on a digits-only file name segment.
const DIGIT_FORMATS: &[(usize, &str)] = &[(8, "%Y%m%d"), (12, "%Y%m%d%H%M"), (14, "%Y%m%d%H%M%S")];

/// Formats accepted for dates given explicitly on the command line.
const ARG_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];
const ARG_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Find a date in an image file name.
///
/// The extension is dropped and the name split on underscores. Each segment
/// is reduced to its digits and the first one that parses as a date wins,
/// so `USCASJ20200414_SUPERsnow_depth_50p0m_agg.tif` gives 2020-04-14.
pub fn parse_fname_date(path: &Path) -> Option<NaiveDate> {
    let bname = path.file_name()?.to_string_lossy();
    let stem = bname.split('.').next().unwrap_or_default();

    stem.split('_').find_map(|segment| {
        let digits: String = segment.chars().filter(|c| c.is_ascii_digit()).collect();
        parse_digits(&digits)
    })
}

fn parse_digits(digits: &str) -> Option<NaiveDate> {
    DIGIT_FORMATS
        .iter()
        .filter(|(n, _)| *n == digits.len())
        .find_map(|(n, fmt)| {
            if *n == 8 {
                NaiveDate::parse_from_str(digits, fmt).ok()
            } else {
                NaiveDateTime::parse_from_str(digits, fmt).ok().map(|dt| dt.date())
            }
        })
}

/// Parse a date given explicitly by the user. A time of day, if given, is ignored
/// since every flight is stamped at the same hour.
pub fn parse_date_arg(s: &str) -> Result<NaiveDate, GrmError> {
    let s = s.trim();
    ARG_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            ARG_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
        .ok_or_else(|| {
            GrmError::date_parse(format!(
                "'{s}' is not a date, expected a format like YYYY-MM-DD or YYYYMMDD"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case("USCASJ20200414_SUPERsnow_depth_50p0m_agg.tif", Some(ymd(2020, 4, 14)))]
    #[case("/data/aso/USCATB20190403_SUPERsnow_depth.tif", Some(ymd(2019, 4, 3)))]
    #[case("snow_depth_50p0m_20200508.tif", Some(ymd(2020, 5, 8)))]
    #[case("20200214.tif", Some(ymd(2020, 2, 14)))]
    #[case("flight_202002141530.tif", Some(ymd(2020, 2, 14)))]
    #[case("snow_depth_50p0m_agg.tif", None)]
    #[case("USCASJ20201399_depth.tif", None)]
    fn test_parse_fname_date(#[case] fname: &str, #[case] expected: Option<NaiveDate>) {
        assert_eq!(parse_fname_date(Path::new(fname)), expected);
    }

    #[rstest]
    #[case("2020-04-14")]
    #[case("20200414")]
    #[case("2020/04/14")]
    #[case("2020-04-14 10:30:00")]
    #[case("2020-04-14T10:30:00")]
    fn test_parse_date_arg(#[case] s: &str) {
        assert_eq!(parse_date_arg(s).unwrap(), ymd(2020, 4, 14));
    }

    #[test]
    fn test_parse_date_arg_error() {
        let err = parse_date_arg("April 14").unwrap_err();
        assert!(matches!(err, GrmError::DateParse(_)));
    }
}
