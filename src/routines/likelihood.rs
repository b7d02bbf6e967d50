//! Joint negative log-likelihood of the errors-in-variables model
//!
//! Every observed point `i` has a latent true forcing `g_i`. The response is
//! modelled as `y_i ~ N(p(g_i), sigma^2 + dy_i^2)` where `p` is a polynomial,
//! and the observed concentration as `x_i ~ N(c0 * exp(g_i / 5.35), dx_i^2)`.
//! The explanatory term additionally carries the change-of-variables correction
//! `-|g_i / 5.35 + ln(c0) - ln(5.35)|` between concentration and forcing space.
//! The absolute value makes the function non-smooth at a single point per
//! observation; it is kept as is.

use crate::routines::data::Resample;
use crate::routines::forcing::{concentration, FORCING_COEFFICIENT};
use crate::routines::linalg::{polyder, polyval};
use argmin::core::{CostFunction, Error, Gradient};
use eyre::{ensure, Result};
use ndarray::{s, Array1};
use std::f64::consts::PI;

/// Parameters of the EIV model, kept apart instead of packed into one vector
#[derive(Debug, Clone, PartialEq)]
pub struct EivParams {
    /// Latent true forcing of every point of the draw
    pub latent: Array1<f64>,
    /// Intrinsic scatter of the response around the polynomial. Only its absolute value matters.
    pub sigma: f64,
    /// Polynomial coefficients, highest degree first
    pub coefficients: Array1<f64>,
}

impl EivParams {
    pub fn new(latent: Array1<f64>, sigma: f64, coefficients: Array1<f64>) -> Self {
        Self {
            latent,
            sigma,
            coefficients,
        }
    }

    /// Packs the parameters as `[latent | sigma | coefficients]` for the minimizer
    pub fn flatten(&self) -> Array1<f64> {
        self.latent
            .iter()
            .chain(std::iter::once(&self.sigma))
            .chain(self.coefficients.iter())
            .copied()
            .collect()
    }

    /// Unpacks a minimizer vector holding `npoints` latent values
    pub fn unflatten(flat: &Array1<f64>, npoints: usize) -> Result<Self> {
        ensure!(
            flat.len() > npoints + 1,
            "Parameter vector of length {} cannot hold {} latent values, sigma and coefficients",
            flat.len(),
            npoints
        );
        Ok(Self {
            latent: flat.slice(s![..npoints]).to_owned(),
            sigma: flat[npoints],
            coefficients: flat.slice(s![npoints + 1..]).to_owned(),
        })
    }

    /// Polynomial order of the fit
    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }
}

/// Negative log-likelihood of `params` given the observations in `data`
///
/// The returned value is a count-weighted sum over the points, not an average.
pub fn neg_log_likelihood(params: &EivParams, data: &Resample, c0: f64) -> f64 {
    let sigma2 = params.sigma * params.sigma;
    let ln_sqrt_2pi = 0.5 * (2.0 * PI).ln();
    let offset = c0.ln() - FORCING_COEFFICIENT.ln();
    let pp = params.coefficients.view();

    let mut total = 0.0;
    for i in 0..data.len() {
        let g = params.latent[i];

        let mu = polyval(pp, g);
        let tau = (sigma2 + data.dy[i] * data.dy[i]).sqrt();
        let r = (data.y[i] - mu) / tau;
        let response = 0.5 * r * r + tau.ln() + ln_sqrt_2pi;

        let q = (concentration(g, c0) - data.x[i]) / data.dx[i];
        let explanatory = 0.5 * q * q + data.dx[i].ln() + ln_sqrt_2pi
            - (g / FORCING_COEFFICIENT + offset).abs();

        total += data.counts[i] * (response + explanatory);
    }
    total
}

/// Gradient of [neg_log_likelihood] with the same layout as [EivParams]
///
/// At the kink of the absolute-value correction the sub-gradient `0` is used.
pub fn neg_log_likelihood_gradient(params: &EivParams, data: &Resample, c0: f64) -> EivParams {
    let sigma2 = params.sigma * params.sigma;
    let offset = c0.ln() - FORCING_COEFFICIENT.ln();
    let pp = params.coefficients.view();
    let ncoef = params.coefficients.len();

    let mut d_latent = Array1::zeros(data.len());
    let mut d_sigma = 0.0;
    let mut d_coef = Array1::zeros(ncoef);

    for i in 0..data.len() {
        let g = params.latent[i];
        let w = data.counts[i];

        let mu = polyval(pp, g);
        let tau = (sigma2 + data.dy[i] * data.dy[i]).sqrt();
        let r = (data.y[i] - mu) / tau;
        let d_mu = -r / tau;
        let d_tau = (1.0 - r * r) / tau;

        let c = concentration(g, c0);
        let q = (c - data.x[i]) / data.dx[i];
        let kink = g / FORCING_COEFFICIENT + offset;
        let d_explanatory = (q / data.dx[i]) * c / FORCING_COEFFICIENT
            - signum(kink) / FORCING_COEFFICIENT;

        d_latent[i] = w * (d_mu * polyder(pp, g) + d_explanatory);
        d_sigma += w * d_tau * params.sigma / tau;

        let mut power = 1.0;
        for k in (0..ncoef).rev() {
            d_coef[k] += w * d_mu * power;
            power *= g;
        }
    }

    EivParams::new(d_latent, d_sigma, d_coef)
}

fn signum(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// The EIV fit of one bootstrap draw, as seen by `argmin`
///
/// The solver works on flat vectors; the conversion to [EivParams] happens here
/// and nowhere else.
#[derive(Debug, Clone, Copy)]
pub struct EivProblem<'a> {
    data: &'a Resample,
    c0: f64,
}

impl<'a> EivProblem<'a> {
    pub fn new(data: &'a Resample, c0: f64) -> Self {
        Self { data, c0 }
    }

    pub fn npoints(&self) -> usize {
        self.data.len()
    }

    pub fn unflatten(&self, flat: &Array1<f64>) -> Result<EivParams> {
        EivParams::unflatten(flat, self.npoints())
    }
}

impl CostFunction for EivProblem<'_> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let params = self.unflatten(param).map_err(|e| Error::msg(e.to_string()))?;
        Ok(neg_log_likelihood(&params, self.data, self.c0))
    }
}

impl Gradient for EivProblem<'_> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        let params = self.unflatten(param).map_err(|e| Error::msg(e.to_string()))?;
        Ok(neg_log_likelihood_gradient(&params, self.data, self.c0).flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::forcing::forcing;
    use ndarray::array;

    fn data() -> Resample {
        Resample {
            x: array![280.0, 300.0, 340.0, 390.0],
            dx: array![2.0, 2.5, 1.0, 0.5],
            y: array![-0.1, 0.05, 0.3, 0.6],
            dy: array![0.1, 0.08, 0.05, 0.05],
            counts: array![1.0, 2.0, 1.0, 3.0],
        }
    }

    fn params() -> EivParams {
        let c0 = 280.0;
        let latent = data().x.mapv(|c| forcing(c, c0) + 0.01);
        EivParams::new(latent, 0.3, array![0.45, -0.05])
    }

    #[test]
    fn test_flatten_roundtrip() {
        let p = params();
        let flat = p.flatten();
        assert_eq!(flat.len(), 4 + 1 + 2);
        assert_eq!(flat[4], 0.3);
        assert_eq!(EivParams::unflatten(&flat, 4).unwrap(), p);
        assert_eq!(p.order(), 1);
    }

    #[test]
    fn test_unflatten_too_short() {
        assert!(EivParams::unflatten(&array![1.0, 2.0, 3.0], 2).is_err());
    }

    #[test]
    fn test_single_point_value() {
        // One point sitting exactly on the model: only normalisation terms remain
        let c0: f64 = 280.0;
        let d = Resample {
            x: array![280.0],
            dx: array![1.0],
            y: array![0.5],
            dy: array![1.0],
            counts: array![1.0],
        };
        let p = EivParams::new(array![0.0], 0.0, array![1.0, 0.5]);
        let expected = (2.0 * PI).ln() - (c0.ln() - 5.35f64.ln()).abs();
        let nll = neg_log_likelihood(&p, &d, c0);
        assert!((nll - expected).abs() < 1e-12);
    }

    #[test]
    fn test_count_weighting_is_linear() {
        let d = data();
        let p = params();
        let base = neg_log_likelihood(&p, &d, 280.0);
        let doubled = neg_log_likelihood(&p, &d.scale_counts(2.0), 280.0);
        assert!((doubled - 2.0 * base).abs() <= 1e-12 * base.abs().max(1.0));
    }

    #[test]
    fn test_sigma_sign_is_irrelevant() {
        let d = data();
        let p = params();
        let mut negated = p.clone();
        negated.sigma = -p.sigma;
        assert_eq!(
            neg_log_likelihood(&p, &d, 280.0),
            neg_log_likelihood(&negated, &d, 280.0)
        );
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let d = data();
        let c0 = 280.0;
        let problem = EivProblem::new(&d, c0);
        let theta = params().flatten();
        let grad = problem.gradient(&theta).unwrap();

        let h = 1e-6;
        for k in 0..theta.len() {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[k] += h;
            down[k] -= h;
            let numeric =
                (problem.cost(&up).unwrap() - problem.cost(&down).unwrap()) / (2.0 * h);
            let scale = numeric.abs().max(1.0);
            assert!(
                (grad[k] - numeric).abs() < 1e-4 * scale,
                "component {}: analytic {} vs numeric {}",
                k,
                grad[k],
                numeric
            );
        }
    }

    #[test]
    fn test_cost_rejects_wrong_length() {
        let d = data();
        let problem = EivProblem::new(&d, 280.0);
        assert!(problem.cost(&array![0.0, 1.0]).is_err());
    }
}
