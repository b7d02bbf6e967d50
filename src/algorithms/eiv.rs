use crate::algorithms::Status;
use crate::routines::bootstrap::{BlockBootstrap, Draw};
use crate::routines::data::{Resample, Series};
use crate::routines::likelihood::{EivParams, EivProblem};
use crate::routines::linalg::{ols, polyfit, polyval};
use crate::routines::optimization::{minimizer, Minimizer};
use crate::routines::output::{column_means, EivResult, Ensembles};
use crate::routines::settings::Settings;
use eyre::{ensure, Result, WrapErr};
use ndarray::{Array1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;

/// Coefficients produced by one converged iteration
#[derive(Debug, Clone, PartialEq)]
pub struct Estimates {
    /// Polynomial coefficients of the EIV fit, highest degree first
    pub eiv: Array1<f64>,
    /// Ordinary least squares with intercept
    pub ols_intercept: Array1<f64>,
    /// Ordinary least squares through the origin
    pub ols_origin: Array1<f64>,
}

/// How a single bootstrap iteration ended
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    Accepted(Estimates),
    Rejected,
}

/// Data carried between the stages of one iteration
enum Stage {
    Draw,
    Initialize(Draw),
    Minimize(Draw, Resample, EivParams),
    Done(Iteration),
}

impl Stage {
    fn status(&self) -> Status {
        match self {
            Stage::Draw => Status::Draw,
            Stage::Initialize(..) => Status::Initialize,
            Stage::Minimize(..) => Status::Minimize,
            Stage::Done(Iteration::Accepted(_)) => Status::Accept,
            Stage::Done(Iteration::Rejected) => Status::Reject,
        }
    }
}

/// Block-bootstrap errors-in-variables regression of one [Series]
///
/// Each iteration resamples the series, seeds the fit with averaged forward and
/// reverse least-squares lines, minimizes the negative log-likelihood and, if
/// the minimizer converged, keeps the EIV coefficients together with the two
/// ordinary least-squares references computed on the same draw.
pub struct EivBootstrap<'a> {
    series: &'a Series,
    settings: &'a Settings,
    minimizer: &'a dyn Minimizer,
    sampler: BlockBootstrap,
    forcing: Array1<f64>,
}

impl<'a> EivBootstrap<'a> {
    pub fn new(
        series: &'a Series,
        settings: &'a Settings,
        minimizer: &'a dyn Minimizer,
    ) -> Result<Self> {
        settings.validate()?;
        let sampler = BlockBootstrap::new(series.len())?;
        tracing::debug!(
            "Block bootstrap over {} points: {} blocks of length {}",
            series.len(),
            sampler.nblocks(),
            sampler.block_length()
        );
        Ok(Self {
            series,
            settings,
            minimizer,
            sampler,
            forcing: series.forcing(),
        })
    }

    pub fn sampler(&self) -> &BlockBootstrap {
        &self.sampler
    }

    /// Runs iterations until `niter` of them converged
    ///
    /// Returns the ensembles and the total number of attempts. There is no cap
    /// on the number of rejected attempts: if the minimizer never converges,
    /// this never returns.
    pub fn run<R: Rng + ?Sized>(&self, niter: usize, rng: &mut R) -> Result<(Ensembles, usize)> {
        let mut ensembles = Ensembles::new(self.settings.config.order);
        let mut attempts = 0;

        while ensembles.len() < niter {
            attempts += 1;
            match self.iterate(rng)? {
                Iteration::Accepted(estimates) => {
                    ensembles.push(
                        estimates.eiv.view(),
                        estimates.ols_intercept.view(),
                        estimates.ols_origin.view(),
                    )?;
                    tracing::debug!(
                        "Iteration {}/{} accepted after {} attempts, EIV coefficients {}",
                        ensembles.len(),
                        niter,
                        attempts,
                        estimates.eiv
                    );
                }
                Iteration::Rejected => {
                    tracing::debug!("Attempt {} rejected, drawing again", attempts);
                }
            }
        }

        Ok((ensembles, attempts))
    }

    /// One pass through draw, initialization and minimization
    pub fn iterate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Iteration> {
        let mut stage = Stage::Draw;
        loop {
            tracing::trace!("Stage: {}", stage.status());
            stage = match stage {
                Stage::Draw => Stage::Initialize(self.sampler.draw(rng)),
                Stage::Initialize(draw) => match self.initial_guess(&draw) {
                    Ok(initial) => {
                        let data = self.series.resample(&draw.unique, &draw.counts);
                        Stage::Minimize(draw, data, initial)
                    }
                    Err(e) => {
                        tracing::warn!("Could not initialize the fit: {}", e);
                        Stage::Done(Iteration::Rejected)
                    }
                },
                Stage::Minimize(draw, data, initial) => {
                    Stage::Done(self.minimize(&draw, &data, &initial)?)
                }
                Stage::Done(iteration) => return Ok(iteration),
            };
        }
    }

    /// Starting point of the minimizer for `draw`
    ///
    /// The latent values start at the forcing of the drawn observations and the
    /// scatter at the configured value. The coefficients come from averaging the
    /// response predicted by the regression of response on forcing with the
    /// response implied by inverting the regression of forcing on response, and
    /// fitting that average against forcing.
    pub fn initial_guess(&self, draw: &Draw) -> Result<EivParams> {
        let f = self.forcing.select(Axis(0), &draw.unique);
        let y = self.series.y().select(Axis(0), &draw.unique);

        let forward = polyfit(f.view(), y.view(), 1)?;
        let reverse = polyfit(y.view(), f.view(), 1)?;

        let direct = f.mapv(|fi| polyval(forward.view(), fi));
        let averaged = if reverse[0].abs() > f64::EPSILON && reverse[0].is_finite() {
            let inverted = f.mapv(|fi| (fi - reverse[1]) / reverse[0]);
            (&direct + &inverted) / 2.0
        } else {
            tracing::warn!("Reverse regression is flat, seeding from the forward fit only");
            direct
        };

        let coefficients = polyfit(f.view(), averaged.view(), self.settings.config.order)?;
        ensure!(
            coefficients.iter().all(|c| c.is_finite()),
            "Initial coefficients are not finite: {}",
            coefficients
        );

        Ok(EivParams::new(f, self.settings.config.sigma0, coefficients))
    }

    /// Ordinary least squares on the drawn indices, repetitions included
    pub fn reference_fits(&self, draw: &Draw) -> Result<(Array1<f64>, Array1<f64>)> {
        let f = self.forcing.select(Axis(0), &draw.indices);
        let y = self.series.y().select(Axis(0), &draw.indices);
        let order = self.settings.config.order;
        let with_intercept = ols(f.view(), y.view(), order, true)?;
        let through_origin = ols(f.view(), y.view(), order, false)?;
        Ok((with_intercept, through_origin))
    }

    fn minimize(&self, draw: &Draw, data: &Resample, initial: &EivParams) -> Result<Iteration> {
        let problem = EivProblem::new(data, self.series.reference());
        let max_iters = self.settings.max_iters(self.series.len());

        let minimum = match self
            .minimizer
            .minimize(problem, initial.flatten(), max_iters)
        {
            Ok(minimum) => minimum,
            Err(e) => {
                tracing::debug!("Minimizer failed: {}", e);
                return Ok(Iteration::Rejected);
            }
        };
        if !minimum.converged {
            tracing::debug!(
                "Minimizer did not converge after {} iterations",
                minimum.iterations
            );
            return Ok(Iteration::Rejected);
        }

        let fitted = problem.unflatten(&minimum.param)?;
        let (ols_intercept, ols_origin) = self
            .reference_fits(draw)
            .wrap_err("Reference least-squares fit failed")?;

        Ok(Iteration::Accepted(Estimates {
            eiv: fitted.coefficients,
            ols_intercept,
            ols_origin,
        }))
    }
}

/// Runs the full bootstrap described by `settings` on `series`
///
/// With `threads == 1` a single random stream seeded with `seed` drives every
/// draw. With more threads, that stream only hands out one seed per worker;
/// each worker collects its share of the accepted iterations with its own
/// stream, and the batches are concatenated in worker order. Either way the
/// result is fully determined by `(seed, threads)`.
pub fn fit(series: &Series, settings: &Settings) -> Result<EivResult> {
    let now = Instant::now();
    let minimizer = minimizer(&settings.optimizer);
    let driver = EivBootstrap::new(series, settings, minimizer.as_ref())?;
    let niter = settings.config.niter;
    let threads = settings.config.threads;

    tracing::info!(
        "Fitting {} bootstrap iterations on {} observations ({} worker{})",
        niter,
        series.len(),
        threads,
        if threads == 1 { "" } else { "s" }
    );

    let mut master = StdRng::seed_from_u64(settings.config.seed);
    let (ensembles, attempts) = if threads == 1 {
        driver.run(niter, &mut master)?
    } else {
        let jobs: Vec<(u64, usize)> = (0..threads)
            .map(|w| (master.random::<u64>(), share(niter, threads, w)))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .wrap_err("Failed to build the worker pool")?;
        let batches: Vec<(Ensembles, usize)> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(seed, quota)| driver.run(quota, &mut StdRng::seed_from_u64(seed)))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut ensembles = Ensembles::new(settings.config.order);
        let mut attempts = 0;
        for (batch, batch_attempts) in &batches {
            ensembles.merge(batch)?;
            attempts += batch_attempts;
        }
        (ensembles, attempts)
    };

    tracing::info!(
        "Collected {} fits in {} attempts ({} rejected) in {:.2?}",
        ensembles.len(),
        attempts,
        attempts - ensembles.len(),
        now.elapsed()
    );
    tracing::info!("Mean EIV coefficients: {}", column_means(ensembles.eiv()));
    tracing::info!(
        "Mean OLS coefficients: {} (intercept), {} (origin)",
        column_means(ensembles.ols_intercept()),
        column_means(ensembles.ols_origin())
    );

    Ok(EivResult::new(ensembles, attempts, settings.clone()))
}

/// Number of accepted iterations worker `w` of `threads` is responsible for
fn share(niter: usize, threads: usize, w: usize) -> usize {
    niter / threads + usize::from(w < niter % threads)
}
