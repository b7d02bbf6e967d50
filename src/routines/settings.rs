use crate::routines::output::OutputFile;
use config::Config as eConfig;
use eyre::{ensure, Result, WrapErr};
use serde::Deserialize;
use serde_derive::Serialize;

/// Settings of one regression run
///
/// Read from a TOML file with [read_settings]; every value can be overridden
/// through environment variables prefixed with `EIVBOOT`, using `__` between
/// section and key, e.g. `EIVBOOT_CONFIG__NITER=200`.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Settings {
    pub paths: Paths,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub log: Log,
}

/// Input tables, each with two columns: value and standard deviation
///
/// Choosing a different pair of files is how an uncertainty variant is selected.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Paths {
    /// CO2 concentrations
    pub explanatory: String,
    /// Temperature anomalies
    pub response: String,
    /// Whether the files start with a header row
    #[serde(default = "default_false")]
    pub headers: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Config {
    /// Number of converged bootstrap fits to collect
    #[serde(default = "default_niter")]
    pub niter: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Polynomial order of the fit
    #[serde(default = "default_order")]
    pub order: usize,
    /// Starting value of the intrinsic scatter
    #[serde(default = "default_sigma0")]
    pub sigma0: f64,
    /// The minimizer may take `iteration_factor * n` iterations
    #[serde(default = "default_iteration_factor")]
    pub iteration_factor: u64,
    /// Number of independent bootstrap workers
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    Lbfgs,
    NelderMead,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Optimizer {
    #[serde(default = "default_solver")]
    pub solver: Solver,
    /// L-BFGS history size
    #[serde(default = "default_memory")]
    pub memory: usize,
    #[serde(default = "default_tol_grad")]
    pub tol_grad: f64,
    #[serde(default = "default_tol_cost")]
    pub tol_cost: f64,
    /// Nelder-Mead stops once the standard deviation of the simplex costs falls below this
    #[serde(default = "default_sd_tolerance")]
    pub sd_tolerance: f64,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Output {
    #[serde(default = "default_true")]
    pub write: bool,
    #[serde(default = "default_output_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default = "default_true")]
    pub stdout: bool,
}

impl Settings {
    /// Settings with default values for everything but the input paths
    pub fn new(explanatory: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            paths: Paths {
                explanatory: explanatory.into(),
                response: response.into(),
                headers: false,
            },
            config: Config::default(),
            optimizer: Optimizer::default(),
            output: Output::default(),
            log: Log::default(),
        }
    }

    /// Rejects settings the run cannot work with
    pub fn validate(&self) -> Result<()> {
        let c = &self.config;
        ensure!(c.niter > 0, "niter must be at least 1");
        ensure!(c.order > 0, "The polynomial order must be at least 1");
        ensure!(
            c.sigma0.is_finite(),
            "The initial scatter must be finite, got {}",
            c.sigma0
        );
        ensure!(c.iteration_factor > 0, "iteration_factor must be at least 1");
        ensure!(c.threads > 0, "threads must be at least 1");

        let o = &self.optimizer;
        ensure!(o.memory > 0, "The L-BFGS memory must be at least 1");
        for (name, tol) in [
            ("tol_grad", o.tol_grad),
            ("tol_cost", o.tol_cost),
            ("sd_tolerance", o.sd_tolerance),
        ] {
            ensure!(
                tol.is_finite() && tol > 0.0,
                "{} must be finite and positive, got {}",
                name,
                tol
            );
        }
        Ok(())
    }

    /// Iteration cap of the minimizer for a series of `n` points
    pub fn max_iters(&self, n: usize) -> u64 {
        self.config.iteration_factor.saturating_mul(n as u64)
    }

    /// Writes the settings as `settings.json` to the output folder
    pub fn write(&self) -> Result<()> {
        let outputfile = OutputFile::new(&self.output.path, "settings.json")?;
        serde_json::to_writer_pretty(outputfile.file(), self)
            .wrap_err("Failed to serialize settings")?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            niter: default_niter(),
            seed: default_seed(),
            order: default_order(),
            sigma0: default_sigma0(),
            iteration_factor: default_iteration_factor(),
            threads: default_threads(),
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            solver: default_solver(),
            memory: default_memory(),
            tol_grad: default_tol_grad(),
            tol_cost: default_tol_cost(),
            sd_tolerance: default_sd_tolerance(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self {
            write: default_true(),
            path: default_output_path(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            stdout: default_true(),
        }
    }
}

/// Reads and validates the settings file at `path`
pub fn read_settings(path: impl AsRef<str>) -> Result<Settings> {
    let settings_path = path.as_ref();

    let parsed = eConfig::builder()
        .add_source(config::File::with_name(settings_path).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix("EIVBOOT")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .wrap_err_with(|| format!("Failed to read settings from {}", settings_path))?;

    let settings: Settings = parsed
        .try_deserialize()
        .wrap_err("Failed to parse settings")?;
    settings.validate()?;

    Ok(settings)
}

// *********************************
// Default values for deserializing
// *********************************
fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_niter() -> usize {
    1000
}

fn default_seed() -> u64 {
    347
}

fn default_order() -> usize {
    1
}

fn default_sigma0() -> f64 {
    0.5
}

fn default_iteration_factor() -> u64 {
    10_000
}

fn default_threads() -> usize {
    1
}

fn default_solver() -> Solver {
    Solver::Lbfgs
}

fn default_memory() -> usize {
    7
}

fn default_tol_grad() -> f64 {
    1e-8
}

fn default_tol_cost() -> f64 {
    1e-12
}

fn default_sd_tolerance() -> f64 {
    1e-8
}

fn default_output_path() -> String {
    "outputs/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "log.txt".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::new("co2.csv", "temperature.csv");
        assert_eq!(settings.config.niter, 1000);
        assert_eq!(settings.config.order, 1);
        assert_eq!(settings.config.sigma0, 0.5);
        assert_eq!(settings.config.threads, 1);
        assert_eq!(settings.optimizer.solver, Solver::Lbfgs);
        assert_eq!(settings.max_iters(50), 500_000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = Settings::new("co2.csv", "temperature.csv");
        settings.config.order = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::new("co2.csv", "temperature.csv");
        settings.config.sigma0 = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::new("co2.csv", "temperature.csv");
        settings.optimizer.tol_cost = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_solver_names() {
        let solver: Solver = serde_json::from_str("\"neldermead\"").unwrap();
        assert_eq!(solver, Solver::NelderMead);
        let solver: Solver = serde_json::from_str("\"lbfgs\"").unwrap();
        assert_eq!(solver, Solver::Lbfgs);
    }
}
