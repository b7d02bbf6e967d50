//! Errors-in-variables regression of temperature anomalies on CO2 radiative
//! forcing, with uncertainty estimated by a circular block bootstrap.
//!
//! A run reads a [Settings](routines::settings::Settings) file, loads the two
//! input tables, collects `niter` converged fits and writes the coefficient
//! ensembles to the output folder. See [start].

pub mod algorithms;
pub mod routines;

pub mod prelude {
    pub use crate::algorithms::eiv::{fit, EivBootstrap, Estimates, Iteration};
    pub use crate::algorithms::Status;
    pub use crate::routines::bootstrap::{BlockBootstrap, Draw};
    pub use crate::routines::data::{Resample, Series};
    pub use crate::routines::forcing::{concentration, forcing, forcing_series};
    pub use crate::routines::likelihood::{EivParams, EivProblem};
    pub use crate::routines::optimization::{Lbfgs, Minimizer, Minimum, NelderMeadSimplex};
    pub use crate::routines::output::{EivResult, Ensembles};
    pub use crate::routines::settings::{read_settings, Settings};
    pub use crate::routines::*;
}

use eyre::{Result, WrapErr};
use prelude::*;
use std::time::Instant;

/// Runs the regression described by the settings file at `settings_path`
///
/// Logging is set up from the settings before anything else, so this can only
/// be called once per process.
pub fn start(settings_path: impl AsRef<str>) -> Result<EivResult> {
    let now = Instant::now();
    let settings = read_settings(settings_path)?;
    logger::setup_log(&settings)?;
    tracing::info!(
        "Starting eivboot v{} at {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let series = Series::read(
        &settings.paths.explanatory,
        &settings.paths.response,
        settings.paths.headers,
    )
    .wrap_err("Failed to read the input series")?;
    tracing::info!(
        "Read {} observations, reference concentration {}",
        series.len(),
        series.reference()
    );

    let result = fit(&series, &settings)?;
    result.write_outputs()?;

    tracing::info!("Total time: {:.2?}", now.elapsed());
    Ok(result)
}
