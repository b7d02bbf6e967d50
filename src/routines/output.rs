use crate::routines::settings::Settings;
use csv::WriterBuilder;
use eyre::{ensure, Result, WrapErr};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_csv::Array2Writer;
use ndarray_stats::interpolate::Linear;
use ndarray_stats::Quantile1dExt;
use noisy_float::types::{n64, N64};
use serde::Serialize;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Coefficient estimates of every accepted bootstrap iteration
///
/// One row per iteration in each table. The EIV and intercept OLS tables have
/// `order + 1` columns, the through-origin OLS table `order` columns, all
/// ordered highest degree first.
///
/// Rows are only ever appended as a triple, so the three tables always have
/// the same number of rows, and row `i` of each table comes from the same draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensembles {
    eiv: Array2<f64>,
    ols_intercept: Array2<f64>,
    ols_origin: Array2<f64>,
}

impl Ensembles {
    pub fn new(order: usize) -> Self {
        Self {
            eiv: Array2::zeros((0, order + 1)),
            ols_intercept: Array2::zeros((0, order + 1)),
            ols_origin: Array2::zeros((0, order)),
        }
    }

    /// Records the three estimates of one accepted iteration
    pub fn push(
        &mut self,
        eiv: ArrayView1<f64>,
        ols_intercept: ArrayView1<f64>,
        ols_origin: ArrayView1<f64>,
    ) -> Result<()> {
        ensure!(
            eiv.len() == self.eiv.ncols()
                && ols_intercept.len() == self.ols_intercept.ncols()
                && ols_origin.len() == self.ols_origin.ncols(),
            "Coefficient row lengths ({}, {}, {}) do not match the ensembles ({}, {}, {})",
            eiv.len(),
            ols_intercept.len(),
            ols_origin.len(),
            self.eiv.ncols(),
            self.ols_intercept.ncols(),
            self.ols_origin.ncols()
        );
        self.eiv.push_row(eiv)?;
        self.ols_intercept.push_row(ols_intercept)?;
        self.ols_origin.push_row(ols_origin)?;
        Ok(())
    }

    /// Appends every row of `other`
    pub fn merge(&mut self, other: &Ensembles) -> Result<()> {
        for i in 0..other.len() {
            self.push(
                other.eiv.row(i),
                other.ols_intercept.row(i),
                other.ols_origin.row(i),
            )?;
        }
        Ok(())
    }

    /// Number of accepted iterations
    pub fn len(&self) -> usize {
        self.eiv.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn eiv(&self) -> &Array2<f64> {
        &self.eiv
    }

    pub fn ols_intercept(&self) -> &Array2<f64> {
        &self.ols_intercept
    }

    pub fn ols_origin(&self) -> &Array2<f64> {
        &self.ols_origin
    }

    /// Median and central 95% interval of every coefficient of every estimator
    pub fn summary(&self) -> Vec<CoefficientSummary> {
        let tables = [
            ("eiv", &self.eiv),
            ("ols_intercept", &self.ols_intercept),
            ("ols_origin", &self.ols_origin),
        ];
        let mut rows = Vec::new();
        for (estimator, table) in tables {
            for (coefficient, column) in table.axis_iter(Axis(1)).enumerate() {
                let values = column.to_vec();
                rows.push(CoefficientSummary {
                    estimator: estimator.to_string(),
                    coefficient,
                    median: median(&values),
                    lower: percentile(&values, 2.5),
                    upper: percentile(&values, 97.5),
                });
            }
        }
        rows
    }
}

/// Distribution summary of a single coefficient across the ensemble
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CoefficientSummary {
    pub estimator: String,
    /// Column of the coefficient, `0` being the highest degree
    pub coefficient: usize,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Result of a complete bootstrap run
#[derive(Debug)]
pub struct EivResult {
    ensembles: Ensembles,
    attempts: usize,
    settings: Settings,
}

impl EivResult {
    pub fn new(ensembles: Ensembles, attempts: usize, settings: Settings) -> Self {
        Self {
            ensembles,
            attempts,
            settings,
        }
    }

    pub fn ensembles(&self) -> &Ensembles {
        &self.ensembles
    }

    /// Accepted plus rejected iterations
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Iterations discarded because the minimizer did not converge
    pub fn rejected(&self) -> usize {
        self.attempts - self.ensembles.len()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn write_outputs(&self) -> Result<()> {
        if self.settings.output.write {
            tracing::debug!("Writing outputs to {:?}", self.settings.output.path);
            self.settings.write()?;
            let folder = &self.settings.output.path;
            write_table(folder, "eiv.csv", self.ensembles.eiv())
                .wrap_err("Failed to write EIV coefficients")?;
            write_table(folder, "ols_intercept.csv", self.ensembles.ols_intercept())
                .wrap_err("Failed to write OLS coefficients")?;
            write_table(folder, "ols_origin.csv", self.ensembles.ols_origin())
                .wrap_err("Failed to write OLS coefficients")?;
            self.write_summary().wrap_err("Failed to write summary")?;
        }
        Ok(())
    }

    fn write_summary(&self) -> Result<()> {
        let outputfile = OutputFile::new(&self.settings.output.path, "summary.csv")?;
        let mut writer = WriterBuilder::new()
            .has_headers(true)
            .from_writer(outputfile.file());
        for row in self.ensembles.summary() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Writes one ensemble with a `p0, p1, ...` header
fn write_table(folder: &str, file_name: &str, table: &Array2<f64>) -> Result<()> {
    let outputfile = OutputFile::new(folder, file_name)?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(outputfile.file());
    let header: Vec<String> = (0..table.ncols()).map(|j| format!("p{}", j)).collect();
    writer.write_record(&header)?;
    writer.serialize_array2(table)?;
    writer.flush()?;
    Ok(())
}

pub fn median(data: &[f64]) -> f64 {
    let mut data: Vec<f64> = data.to_vec();
    data.sort_by(|a, b| a.total_cmp(b));

    let size = data.len();
    match size {
        0 => f64::NAN,
        even if even % 2 == 0 => (data[even / 2 - 1] + data[even / 2]) / 2.0,
        odd => data[odd / 2],
    }
}

/// Percentile `q` (0-100) with linear interpolation between order statistics
///
/// NaN entries are ignored.
pub fn percentile(data: &[f64], q: f64) -> f64 {
    let mut values: Array1<N64> = data
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| n64(v))
        .collect();
    values
        .quantile_mut(n64((q / 100.0).clamp(0.0, 1.0)), &Linear)
        .map(|v| v.raw())
        .unwrap_or(f64::NAN)
}

/// Column means, used for logging the run summary
pub(crate) fn column_means(table: &Array2<f64>) -> Array1<f64> {
    table
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::from_elem(table.ncols(), f64::NAN))
}

#[derive(Debug)]
pub struct OutputFile {
    file: File,
    relative_path: PathBuf,
}

impl OutputFile {
    pub fn new(folder: &str, file_name: &str) -> Result<Self> {
        let relative_path = Path::new(&folder).join(file_name);

        if let Some(parent) = relative_path.parent() {
            create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create directories for {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&relative_path)
            .wrap_err_with(|| format!("Failed to open file: {:?}", relative_path))?;

        Ok(OutputFile {
            file,
            relative_path,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }
}
