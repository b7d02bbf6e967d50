use crate::routines::forcing::forcing_series;
use csv::ReaderBuilder;
use eyre::{bail, ensure, Result, WrapErr};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_csv::Array2Reader;
use std::fs::File;
use std::path::Path;

/// Paired explanatory (concentration) and response (temperature) observations
///
/// Each observation carries its own standard deviation. Index order is
/// temporal order, which the block bootstrap relies on.
///
/// A [Series] can only be built through [Series::new] (or the readers on top
/// of it), which guarantees:
/// - all four arrays have the same length, and at least two points
/// - concentrations are finite and strictly positive
/// - all standard deviations are finite and strictly positive
/// - responses are finite
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    x: Array1<f64>,
    dx: Array1<f64>,
    y: Array1<f64>,
    dy: Array1<f64>,
}

impl Series {
    pub fn new(x: Array1<f64>, dx: Array1<f64>, y: Array1<f64>, dy: Array1<f64>) -> Result<Self> {
        let n = x.len();
        if dx.len() != n || y.len() != n || dy.len() != n {
            bail!(
                "Series lengths do not match: x has {}, dx has {}, y has {}, dy has {}",
                n,
                dx.len(),
                y.len(),
                dy.len()
            );
        }
        ensure!(n >= 2, "At least two observations are required, got {}", n);

        check_positive("concentration", x.view())?;
        check_positive("concentration uncertainty", dx.view())?;
        check_positive("response uncertainty", dy.view())?;
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            bail!("Response at index {} is not finite ({})", i, y[i]);
        }

        Ok(Self { x, dx, y, dy })
    }

    /// Builds a series from two `(value, sd)` tables
    pub fn from_tables(explanatory: &Array2<f64>, response: &Array2<f64>) -> Result<Self> {
        ensure!(
            explanatory.ncols() == 2,
            "Explanatory table must have 2 columns (value, sd), found {}",
            explanatory.ncols()
        );
        ensure!(
            response.ncols() == 2,
            "Response table must have 2 columns (value, sd), found {}",
            response.ncols()
        );
        Self::new(
            explanatory.column(0).to_owned(),
            explanatory.column(1).to_owned(),
            response.column(0).to_owned(),
            response.column(1).to_owned(),
        )
    }

    /// Reads the explanatory and response CSV files
    pub fn read(
        explanatory: impl AsRef<Path>,
        response: impl AsRef<Path>,
        headers: bool,
    ) -> Result<Self> {
        let x_table = read_table(explanatory.as_ref(), headers)?;
        let y_table = read_table(response.as_ref(), headers)?;
        tracing::debug!(
            "Read {} explanatory and {} response rows",
            x_table.nrows(),
            y_table.nrows()
        );
        Self::from_tables(&x_table, &y_table)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn dx(&self) -> &Array1<f64> {
        &self.dx
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn dy(&self) -> &Array1<f64> {
        &self.dy
    }

    /// Reference concentration, taken from the first explanatory observation
    pub fn reference(&self) -> f64 {
        self.x[0]
    }

    /// Forcing of every explanatory observation relative to [Series::reference]
    pub fn forcing(&self) -> Array1<f64> {
        forcing_series(self.x.view(), self.reference())
    }

    /// Selects the observations at `indices`, each weighted by `counts`
    pub fn resample(&self, indices: &[usize], counts: &[usize]) -> Resample {
        debug_assert_eq!(indices.len(), counts.len());
        Resample {
            x: self.x.select(Axis(0), indices),
            dx: self.dx.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
            dy: self.dy.select(Axis(0), indices),
            counts: counts.iter().map(|&c| c as f64).collect(),
        }
    }
}

/// The distinct observations touched by one bootstrap draw and their multiplicity
///
/// This is what the likelihood is evaluated over: a point drawn `k` times
/// contributes `k` times its per-point term.
#[derive(Debug, Clone, PartialEq)]
pub struct Resample {
    pub x: Array1<f64>,
    pub dx: Array1<f64>,
    pub y: Array1<f64>,
    pub dy: Array1<f64>,
    pub counts: Array1<f64>,
}

impl Resample {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Same observations with every count multiplied by `factor`
    pub fn scale_counts(&self, factor: f64) -> Self {
        Self {
            counts: &self.counts * factor,
            ..self.clone()
        }
    }
}

fn read_table(path: &Path, headers: bool) -> Result<Array2<f64>> {
    let file = File::open(path).wrap_err_with(|| format!("Failed to open {:?}", path))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(headers)
        .trim(csv::Trim::All)
        .from_reader(file);
    let table: Array2<f64> = reader
        .deserialize_array2_dynamic()
        .wrap_err_with(|| format!("Failed to parse {:?}", path))?;
    Ok(table)
}

fn check_positive(name: &str, values: ArrayView1<f64>) -> Result<()> {
    if let Some(i) = values.iter().position(|v| !v.is_finite() || *v <= 0.0) {
        bail!(
            "The {} at index {} must be finite and strictly positive, found {}",
            name,
            i,
            values[i]
        );
    }
    Ok(())
}
