//! Squared extrapolation (SQUAREM) for monotone fixed-point maps
//!
//! Varadhan & Roland (2008), step length scheme 3, with a guarded
//! fallback to the plain two-step update whenever the extrapolated state
//! is rejected or does not improve the objective.

use crate::common::*;
use crate::elbo::Objective;

/// A fixed-point iteration over a flat parameter vector together with a
/// merit function to be minimized
pub trait FixedPointProblem {
    /// One application of the map. Invalid states should come back with
    /// NaN entries rather than an error.
    fn fixed_point(&self, par: &DVec) -> anyhow::Result<DVec>;

    /// Merit function, smaller is better
    fn objective(&self, par: &DVec) -> Objective;
}

#[derive(Debug, Clone)]
pub struct SquaremOptions {
    /// Stop when the objective changes less than this, or the residual
    /// norm `|F(x) - x|` falls below it
    pub tol: f64,
    /// Budget of fixed-point evaluations
    pub max_iter: usize,
    pub step_min: f64,
    pub step_max: f64,
    /// Growth (and shrink) factor of the maximum step length
    pub mstep: f64,
    /// Largest objective increase tolerated for an extrapolated step
    pub objective_increase: f64,
}

impl Default for SquaremOptions {
    fn default() -> Self {
        Self {
            tol: 1e-4,
            max_iter: 1500,
            step_min: 1.0,
            step_max: 1.0,
            mstep: 4.0,
            objective_increase: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SquaremOutput {
    pub par: DVec,
    /// Objective at `par`
    pub value: Objective,
    pub iterations: usize,
    /// Number of fixed-point evaluations
    pub fevals: usize,
    pub converged: bool,
    /// Extrapolations replaced by the plain two-step update
    pub fallbacks: usize,
    /// Objective of the accepted state after each iteration
    pub trace: Vec<f64>,
}

fn has_nan(x: &DVec) -> bool {
    x.iter().any(|v| v.is_nan())
}

pub fn squarem<P: FixedPointProblem>(
    problem: &P,
    par0: DVec,
    options: &SquaremOptions,
) -> anyhow::Result<SquaremOutput> {
    anyhow::ensure!(
        options.step_min <= options.step_max && options.mstep > 1.0,
        "invalid step bounds: [{}, {}], mstep {}",
        options.step_min,
        options.step_max,
        options.mstep
    );

    let Some(mut lold) = problem.objective(&par0).value() else {
        anyhow::bail!("the starting point is not a valid state");
    };

    let tol = options.tol;
    let step_max0 = options.step_max;
    let mut step_max = options.step_max;
    let mut step_min = options.step_min;

    let mut par = par0;
    let mut fevals = 0;
    let mut iter = 0;
    let mut converged = false;
    let mut fallbacks = 0;
    let mut trace = Vec::new();

    while fevals < options.max_iter {
        iter += 1;

        let p1 = problem.fixed_point(&par)?;
        fevals += 1;
        if has_nan(&p1) {
            warn!("fixed-point map failed at iteration {}", iter);
            break;
        }

        let q1 = &p1 - &par;
        let sr2 = q1.norm_squared();
        if sr2.sqrt() < tol {
            converged = true;
            break;
        }

        let p2 = problem.fixed_point(&p1)?;
        fevals += 1;
        if has_nan(&p2) {
            warn!("fixed-point map failed at iteration {}", iter);
            break;
        }

        let q2 = &p2 - &p1;
        if q2.norm() < tol {
            par = p2;
            converged = true;
            break;
        }

        let v = &q2 - &q1;
        let sv2 = v.norm_squared();
        let mut alpha = (sr2 / sv2).sqrt().clamp(step_min, step_max);
        if alpha.is_nan() {
            alpha = 1.0;
        }

        let mut p_new = &par + &q1 * (2.0 * alpha) + &v * (alpha * alpha);
        if (alpha - 1.0).abs() > 0.01 {
            p_new = problem.fixed_point(&p_new)?;
            fevals += 1;
        }

        let extrapolated = if has_nan(&p_new) {
            Objective::Rejected
        } else {
            problem.objective(&p_new)
        };

        let lnew = match extrapolated {
            Objective::Finite(l) if l <= lold + options.objective_increase => {
                Objective::Finite(l)
            }
            _ => {
                debug!(
                    "SQUAREM iter {}: extrapolation with step {:.3} rejected",
                    iter, alpha
                );
                fallbacks += 1;
                if alpha == step_max {
                    step_max = step_max0.max(step_max / options.mstep);
                }
                alpha = 1.0;
                p_new = p2;
                problem.objective(&p_new)
            }
        };

        if alpha == step_max {
            step_max *= options.mstep;
        }
        if step_min < 0.0 && alpha == step_min {
            step_min *= options.mstep;
        }

        par = p_new;
        trace.push(lnew.value().unwrap_or(f64::NAN));

        if iter % 10 == 0 {
            info!(
                "SQUAREM iter {:4}: objective = {:.6}, step = {:.3}, fevals = {}",
                iter,
                lnew.value().unwrap_or(f64::NAN),
                alpha,
                fevals
            );
        }

        if let Some(l) = lnew.value() {
            let delta = (l - lold).abs();
            lold = l;
            if delta < tol {
                converged = true;
                break;
            }
        }
    }

    let value = problem.objective(&par);

    if converged {
        info!(
            "SQUAREM converged after {} iterations ({} fixed-point evaluations)",
            iter, fevals
        );
    } else {
        warn!(
            "SQUAREM stopped without convergence after {} fixed-point evaluations",
            fevals
        );
    }

    Ok(SquaremOutput {
        par,
        value,
        iterations: iter,
        fevals,
        converged,
        fallbacks,
        trace,
    })
}
