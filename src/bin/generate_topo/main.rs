use std::process::ExitCode;

use basin_setup::gdal::GdalTools;
use basin_setup::logging::init_logging;
use basin_setup::topo::{GenerateTopo, TopoConfig};
use clap::Parser;
use error_stack::ResultExt;

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    init_logging(clargs.log_level());
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: cli::Cli) -> error_stack::Result<(), CliError> {
    if let Some(template) = clargs.template.as_deref() {
        TopoConfig::write_template_example(template).change_context_lazy(|| {
            CliError::context("Could not write the template configuration")
        })?;
        log::info!("Example configuration written to {}", template.display());
        return Ok(());
    }

    let Some(config_file) = clargs.config_file.as_deref() else {
        return Err(CliError::context("A configuration file is required").into());
    };
    let config = TopoConfig::from_file(config_file)
        .change_context_lazy(|| {
            CliError::context(format!("Could not load {}", config_file.display()))
        })?;

    if clargs.show_config {
        println!("Configuration:\n\n{config:#?}");
        return Ok(());
    }

    log::info!(
        "Generating topo for {}, basin-setup v{}",
        config.basin_name,
        env!("CARGO_PKG_VERSION")
    );
    let tools = GdalTools::default();
    let topo = GenerateTopo::new(config, &tools)
        .run(clargs.debug)
        .change_context_lazy(|| CliError::context("Could not generate the topo"))?;
    println!("{}", topo.display());
    Ok(())
}

/// Program error type
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
