use crate::routines::likelihood::EivProblem;
use crate::routines::settings::{Optimizer, Solver};
use argmin::core::{Executor, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use eyre::{eyre, Result};
use ndarray::Array1;

/// Outcome of one minimization
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best parameter vector found
    pub param: Array1<f64>,
    /// Negative log-likelihood at `param`
    pub cost: f64,
    pub iterations: u64,
    /// `true` only if the solver terminated on its own convergence criterion
    pub converged: bool,
}

/// A numerical minimizer for the EIV negative log-likelihood
///
/// Implementations must report `converged == false` whenever the solver stopped
/// for any other reason than meeting its tolerance, e.g. because the
/// iteration cap was reached.
pub trait Minimizer: Send + Sync {
    fn minimize(
        &self,
        problem: EivProblem<'_>,
        initial: Array1<f64>,
        max_iters: u64,
    ) -> Result<Minimum>;
}

/// Builds the minimizer selected in the settings
pub fn minimizer(settings: &Optimizer) -> Box<dyn Minimizer> {
    match settings.solver {
        Solver::Lbfgs => Box::new(Lbfgs {
            memory: settings.memory,
            tol_grad: settings.tol_grad,
            tol_cost: settings.tol_cost,
        }),
        Solver::NelderMead => Box::new(NelderMeadSimplex {
            sd_tolerance: settings.sd_tolerance,
        }),
    }
}

/// Limited-memory BFGS with More-Thuente line search and the analytic gradient
#[derive(Debug, Clone)]
pub struct Lbfgs {
    pub memory: usize,
    pub tol_grad: f64,
    pub tol_cost: f64,
}

impl Minimizer for Lbfgs {
    fn minimize(
        &self,
        problem: EivProblem<'_>,
        initial: Array1<f64>,
        max_iters: u64,
    ) -> Result<Minimum> {
        let linesearch: MoreThuenteLineSearch<Array1<f64>, Array1<f64>, f64> =
            MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.memory)
            .with_tolerance_grad(self.tol_grad)
            .and_then(|s| s.with_tolerance_cost(self.tol_cost))
            .map_err(|e| eyre!("Failed creating L-BFGS: {}", e))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(initial).max_iters(max_iters))
            .run()
            .map_err(|e| eyre!("L-BFGS run failed: {}", e))?;

        let state = res.state();
        let param = state
            .best_param
            .clone()
            .ok_or_else(|| eyre!("L-BFGS finished without a best parameter"))?;
        Ok(Minimum {
            param,
            cost: state.best_cost,
            iterations: state.iter,
            converged: solver_converged(&state.termination_status, state.best_cost),
        })
    }
}

/// Derivative-free Nelder-Mead simplex search
#[derive(Debug, Clone)]
pub struct NelderMeadSimplex {
    pub sd_tolerance: f64,
}

impl Minimizer for NelderMeadSimplex {
    fn minimize(
        &self,
        problem: EivProblem<'_>,
        initial: Array1<f64>,
        max_iters: u64,
    ) -> Result<Minimum> {
        let simplex = create_initial_simplex(&initial);
        let solver: NelderMead<Array1<f64>, f64> =
            NelderMead::new(simplex)
                .with_sd_tolerance(self.sd_tolerance)
                .map_err(|e| eyre!("Failed creating Nelder-Mead: {}", e))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()
            .map_err(|e| eyre!("Nelder-Mead run failed: {}", e))?;

        let state = res.state();
        let param = state
            .best_param
            .clone()
            .ok_or_else(|| eyre!("Nelder-Mead finished without a best parameter"))?;
        Ok(Minimum {
            param,
            cost: state.best_cost,
            iterations: state.iter,
            converged: solver_converged(&state.termination_status, state.best_cost),
        })
    }
}

fn solver_converged(status: &TerminationStatus, cost: f64) -> bool {
    let converged = match status {
        TerminationStatus::Terminated(reason) => {
            matches!(reason, TerminationReason::SolverConverged)
        }
        _ => false,
    };
    converged && cost.is_finite()
}

/// Simplex of `n + 1` vertices around `initial_point`, each vertex moving one coordinate by 5%
fn create_initial_simplex(initial_point: &Array1<f64>) -> Vec<Array1<f64>> {
    let num_dimensions = initial_point.len();
    let perturbation_percentage = 0.05;

    let mut vertices = Vec::with_capacity(num_dimensions + 1);
    vertices.push(initial_point.to_owned());

    for i in 0..num_dimensions {
        let perturbation = if initial_point[i] == 0.0 {
            0.00025 // Special case for components equal to 0
        } else {
            perturbation_percentage * initial_point[i]
        };

        let mut perturbed_point = initial_point.to_owned();
        perturbed_point[i] += perturbation;
        vertices.push(perturbed_point);
    }

    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::data::Resample;
    use crate::routines::forcing::forcing;
    use crate::routines::likelihood::EivParams;
    use ndarray::array;

    fn line_data() -> Resample {
        let x = array![280.0, 560.0, 1120.0, 2240.0];
        let y = x.mapv(|c| 0.5 * forcing(c, 280.0) + 0.2);
        Resample {
            dx: &x * 0.005,
            x,
            y,
            dy: array![0.05, 0.05, 0.05, 0.05],
            counts: array![1.0, 1.0, 2.0, 1.0],
        }
    }

    fn initial(data: &Resample) -> Array1<f64> {
        let latent = data.x.mapv(|c| forcing(c, 280.0));
        EivParams::new(latent, 0.5, array![0.4, 0.3]).flatten()
    }

    #[test]
    fn test_initial_simplex() {
        let simplex = create_initial_simplex(&array![0.0, 2.0]);
        assert_eq!(simplex.len(), 3);
        assert_eq!(simplex[0], array![0.0, 2.0]);
        assert_eq!(simplex[1], array![0.00025, 2.0]);
        assert_eq!(simplex[2], array![0.0, 2.1]);
    }

    #[test]
    fn test_lbfgs_recovers_slope() {
        let data = line_data();
        let problem = EivProblem::new(&data, 280.0);
        let lbfgs = Lbfgs {
            memory: 7,
            tol_grad: 1e-8,
            tol_cost: 1e-12,
        };
        let min = lbfgs.minimize(problem, initial(&data), 10_000).unwrap();
        assert!(min.converged);
        let fitted = problem.unflatten(&min.param).unwrap();
        assert!((fitted.coefficients[0] - 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_iteration_cap_is_not_convergence() {
        let data = line_data();
        let problem = EivProblem::new(&data, 280.0);
        let nm = NelderMeadSimplex { sd_tolerance: 1e-12 };
        let min = nm.minimize(problem, initial(&data), 1).unwrap();
        assert!(!min.converged);
    }
}
