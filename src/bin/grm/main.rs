use std::process::ExitCode;

use basin_setup::gdal::GdalTools;
use basin_setup::grid::GridDescriptor;
use basin_setup::grm::{run_batch, BatchOptions};
use basin_setup::logging::init_logging;
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
    log::info!("Lidar Depth Image Adder, basin-setup v{}", env!("CARGO_PKG_VERSION"));
    if clargs.debug {
        log::debug!("Debug mode: temporary files will be kept");
    }

    // A bad topo would fail every image, so check it before starting.
    let grid = GridDescriptor::describe(&clargs.topo).change_context_lazy(|| {
        CliError::context(format!("Could not use {} as the topo", clargs.topo.display()))
    })?;
    log::info!(
        "Topo grid is {} x {} cells of {} {}",
        grid.nx,
        grid.ny,
        grid.cell_size_x.abs(),
        grid.units.as_deref().unwrap_or("(unknown units)")
    );

    let options = BatchOptions {
        topo: clargs.topo.clone(),
        basin: clargs.basin,
        output: clargs.output.clone(),
        resample: clargs.resample,
        debug: clargs.debug,
        strict: clargs.strict(),
    };

    // Skipped images are reported in the summary, not through the exit code.
    run_batch(clargs.images, clargs.dates, &options, &GdalTools::default())
        .change_context_lazy(|| CliError::context("Stopped processing images"))?;
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
