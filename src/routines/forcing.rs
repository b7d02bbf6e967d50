use ndarray::{Array1, ArrayView1};

/// Radiative forcing coefficient for CO2, in W m^-2 per e-fold of concentration
pub const FORCING_COEFFICIENT: f64 = 5.35;

/// Radiative forcing of a concentration `c` relative to the reference `c0`
///
/// `F = 5.35 * ln(c / c0)`
///
/// Both arguments must be strictly positive. This is not checked here, the
/// [Series](crate::routines::data::Series) constructor rejects non-positive
/// concentrations before they can reach the transform.
#[inline]
pub fn forcing(c: f64, c0: f64) -> f64 {
    FORCING_COEFFICIENT * (c / c0).ln()
}

/// Inverse of [forcing], mapping a forcing value back to a concentration
#[inline]
pub fn concentration(g: f64, c0: f64) -> f64 {
    c0 * (g / FORCING_COEFFICIENT).exp()
}

/// Element-wise [forcing] of a concentration series
pub fn forcing_series(c: ArrayView1<f64>, c0: f64) -> Array1<f64> {
    c.mapv(|ci| forcing(ci, c0))
}
