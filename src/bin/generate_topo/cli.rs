//! Command line interface definitions
use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Build a basin's topo.nc (DEM, basin masks and vegetation fields on a
/// common grid) from a TOML configuration file.
#[derive(Debug, Parser)]
#[command(version)]
pub(crate) struct Cli {
    /// Path to the TOML configuration file.
    #[clap(required_unless_present = "template")]
    pub(crate) config_file: Option<PathBuf>,

    /// Write an annotated example configuration to this path and exit.
    #[clap(long, conflicts_with = "config_file")]
    pub(crate) template: Option<PathBuf>,

    /// Print the parsed configuration and exit without generating the topo.
    /// Useful to confirm the file says what you meant it to.
    #[clap(long)]
    pub(crate) show_config: bool,

    /// Log debugging messages and keep the temporary files.
    #[clap(short, long)]
    pub(crate) debug: bool,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

impl Cli {
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
    fn test_config_or_template_required() {
        assert!(Cli::try_parse_from(["generate_topo"]).is_err());
        let both = ["generate_topo", "cfg.toml", "--template", "t.toml"];
        assert!(Cli::try_parse_from(both).is_err());

        let cli = Cli::try_parse_from(["generate_topo", "--template", "t.toml"]).unwrap();
        assert_eq!(cli.template, Some(PathBuf::from("t.toml")));

        let cli = Cli::try_parse_from(["generate_topo", "cfg.toml", "-d"]).unwrap();
        assert_eq!(cli.config_file, Some(PathBuf::from("cfg.toml")));
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
    }
}
