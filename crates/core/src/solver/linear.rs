//! Conjugate gradient and MINRES
//!
//! PCG with SSOR preconditioning is tried first. If it stalls, breaks down
//! or runs out of iterations, Jacobi-preconditioned MINRES is tried once.
//! When both fail the run aborts with [`WindError::SolverDiverged`].

use super::assembly::SparseSystem;
use super::preconditioner::Preconditioner;
use super::r#trait::{LinearSolver, SolveContext, SolveReport};
use crate::error::{WindError, WindResult};
use crate::simulation::progress::{solver_time_percent, ProgressStage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Iterations between progress reports and cancellation checks
const REPORT_INTERVAL: usize = 10;

/// Stopping criteria shared by both solvers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverConfig {
    /// Relative residual `‖r‖ / ‖b‖` at which a solve is accepted
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            tolerance: 0.1,
            max_iterations: 100_000,
        }
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y += alpha x`
#[inline]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.par_iter_mut().zip(x.par_iter()).for_each(|(y, x)| *y += alpha * x);
}

/// `‖b‖`, with a zero right-hand side treated as 1
fn rhs_scale(system: &SparseSystem) -> f64 {
    let b = norm(&system.rhs);
    if b > 0.0 {
        b
    } else {
        1.0
    }
}

/// True relative residual of `x`
fn relative_residual(system: &SparseSystem, x: &[f64], scale: f64) -> f64 {
    let mut ax = vec![0.0; system.len()];
    system.apply(x, &mut ax);
    let r2: f64 = ax
        .par_iter()
        .zip(system.rhs.par_iter())
        .map(|(a, b)| (b - a) * (b - a))
        .sum();
    r2.sqrt() / scale
}

struct Monitor<'a> {
    ctx: SolveContext<'a>,
    tolerance: f64,
    initial: Option<f64>,
}

impl Monitor<'_> {
    fn report(&mut self, iteration: usize, residual: f64) -> WindResult<()> {
        if iteration % REPORT_INTERVAL != 0 {
            return Ok(());
        }
        self.ctx.cancel.check()?;
        let initial = *self.initial.get_or_insert(residual);
        self.ctx.progress.progress(
            ProgressStage::Solving,
            solver_time_percent(residual, initial, self.tolerance),
        );
        Ok(())
    }
}

/// Preconditioned conjugate gradient
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcg {
    pub config: SolverConfig,
}

impl LinearSolver for Pcg {
    fn name(&self) -> &'static str {
        "PCG"
    }

    fn solve(&self, system: &SparseSystem, ctx: SolveContext<'_>) -> WindResult<SolveReport> {
        let n = system.len();
        let scale = rhs_scale(system);
        let tol = self.config.tolerance;
        let mut monitor = Monitor {
            ctx,
            tolerance: tol,
            initial: None,
        };
        let mut x = vec![0.0; n];
        let mut r = system.rhs.clone();
        let mut z = vec![0.0; n];
        let mut q = vec![0.0; n];
        let mut preconditioner = Preconditioner::ssor(system);

        let mut residual = norm(&r) / scale;
        let stopped = |x: Vec<f64>, iterations, residual, converged| SolveReport {
            solution: x,
            iterations,
            residual,
            converged,
        };
        if residual <= tol {
            return Ok(stopped(x, 0, residual, true));
        }
        if !preconditioner.apply_or_degrade(system, &r, &mut z) {
            return Ok(stopped(x, 0, residual, false));
        }
        let mut p = z.clone();
        let mut rho = dot(&r, &z);

        for iteration in 1..=self.config.max_iterations {
            system.apply(&p, &mut q);
            let pq = dot(&p, &q);
            if !(pq.is_finite() && pq > 0.0) {
                warn!(iteration, pq, "PCG breakdown: search direction lost positivity");
                return Ok(stopped(x, iteration, residual, false));
            }
            let alpha = rho / pq;
            axpy(alpha, &p, &mut x);
            axpy(-alpha, &q, &mut r);

            residual = norm(&r) / scale;
            if !residual.is_finite() {
                warn!(iteration, "PCG residual is not finite");
                return Ok(stopped(x, iteration, residual, false));
            }
            monitor.report(iteration, residual)?;
            if residual <= tol {
                debug!(iteration, residual, "PCG converged");
                return Ok(stopped(x, iteration, residual, true));
            }

            if !preconditioner.apply_or_degrade(system, &r, &mut z) {
                return Ok(stopped(x, iteration, residual, false));
            }
            let rho_next = dot(&r, &z);
            let beta = rho_next / rho;
            rho = rho_next;
            p.par_iter_mut().zip(z.par_iter()).for_each(|(p, z)| *p = z + beta * *p);
        }
        warn!(
            iterations = self.config.max_iterations,
            residual, "PCG reached its iteration limit"
        );
        Ok(stopped(x, self.config.max_iterations, residual, false))
    }
}

/// Jacobi-preconditioned minimum residual method
#[derive(Debug, Clone, Copy, Default)]
pub struct Minres {
    pub config: SolverConfig,
}

impl LinearSolver for Minres {
    fn name(&self) -> &'static str {
        "MINRES"
    }

    fn solve(&self, system: &SparseSystem, ctx: SolveContext<'_>) -> WindResult<SolveReport> {
        let n = system.len();
        let scale = rhs_scale(system);
        let tol = self.config.tolerance;
        let mut monitor = Monitor {
            ctx,
            tolerance: tol,
            initial: None,
        };
        let preconditioner = Preconditioner::jacobi(system);
        let stopped = |x: Vec<f64>, iterations, residual, converged| SolveReport {
            solution: x,
            iterations,
            residual,
            converged,
        };

        let mut x = vec![0.0; n];
        let mut r1 = system.rhs.clone();
        let mut y = vec![0.0; n];
        preconditioner.apply(system, &r1, &mut y);
        let beta1_sq = dot(&r1, &y);
        if beta1_sq <= 0.0 || !beta1_sq.is_finite() {
            let residual = norm(&r1) / scale;
            return Ok(stopped(x, 0, residual, residual <= tol));
        }
        let beta1 = beta1_sq.sqrt();
        let mut r2 = r1.clone();
        let mut v = vec![0.0; n];
        let (mut w, mut w1, mut w2) = (vec![0.0; n], vec![0.0; n], vec![0.0; n]);
        let (mut old_beta, mut beta) = (0.0, beta1);
        let (mut dbar, mut epsilon) = (0.0_f64, 0.0_f64);
        let mut phibar = beta1;
        let (mut cs, mut sn) = (-1.0_f64, 0.0_f64);
        let mut residual = norm(&r1) / scale;

        for iteration in 1..=self.config.max_iterations {
            let s = 1.0 / beta;
            v.par_iter_mut().zip(y.par_iter()).for_each(|(v, y)| *v = s * y);
            system.apply(&v, &mut y);
            if iteration >= 2 {
                axpy(-beta / old_beta, &r1, &mut y);
            }
            let alpha = dot(&v, &y);
            axpy(-alpha / beta, &r2, &mut y);
            std::mem::swap(&mut r1, &mut r2);
            r2.copy_from_slice(&y);
            if !preconditioner.apply(system, &r2, &mut y) {
                return Ok(stopped(x, iteration, residual, false));
            }
            old_beta = beta;
            let beta_sq = dot(&r2, &y);
            if beta_sq < 0.0 || !beta_sq.is_finite() {
                warn!(iteration, "MINRES preconditioner is not positive definite");
                return Ok(stopped(x, iteration, residual, false));
            }
            beta = beta_sq.sqrt();

            let old_epsilon = epsilon;
            let delta = cs * dbar + sn * alpha;
            let gbar = sn * dbar - cs * alpha;
            epsilon = sn * beta;
            dbar = -cs * beta;
            let gamma = gbar.hypot(beta).max(f64::EPSILON);
            cs = gbar / gamma;
            sn = beta / gamma;
            let phi = cs * phibar;
            phibar *= sn;

            std::mem::swap(&mut w1, &mut w2);
            std::mem::swap(&mut w2, &mut w);
            w.par_iter_mut()
                .zip(v.par_iter())
                .zip(w1.par_iter().zip(w2.par_iter()))
                .for_each(|((w, v), (w1, w2))| *w = (v - old_epsilon * w1 - delta * w2) / gamma);
            axpy(phi, &w, &mut x);

            // phibar tracks the residual in the preconditioned norm
            let estimate = phibar / beta1;
            monitor.report(iteration, estimate)?;
            if estimate <= tol || beta == 0.0 {
                residual = relative_residual(system, &x, scale);
                if residual <= tol {
                    debug!(iteration, residual, "MINRES converged");
                    return Ok(stopped(x, iteration, residual, true));
                }
                if beta == 0.0 {
                    return Ok(stopped(x, iteration, residual, false));
                }
            }
        }
        residual = relative_residual(system, &x, scale);
        warn!(
            iterations = self.config.max_iterations,
            residual, "MINRES reached its iteration limit"
        );
        Ok(stopped(x, self.config.max_iterations, residual, false))
    }
}

/// Outcome of [`solve_with_fallback`]
#[derive(Debug, Clone)]
pub struct FallbackSolve {
    pub report: SolveReport,
    /// Name of the solver that produced `report`
    pub solver: &'static str,
}

/// PCG first, MINRES if PCG fails
///
/// # Errors
/// Returns [`WindError::SolverDiverged`] when neither solver converges and
/// [`WindError::Cancelled`] on cancellation.
pub fn solve_with_fallback(
    system: &SparseSystem,
    config: SolverConfig,
    ctx: SolveContext<'_>,
) -> WindResult<FallbackSolve> {
    let solvers: [&dyn LinearSolver; 2] = [&Pcg { config }, &Minres { config }];
    let mut failures = Vec::with_capacity(solvers.len());
    let mut last = (0, f64::NAN);
    for solver in solvers {
        let report = solver.solve(system, ctx)?;
        if report.converged {
            info!(
                solver = solver.name(),
                iterations = report.iterations,
                residual = report.residual,
                "linear solve converged"
            );
            return Ok(FallbackSolve {
                report,
                solver: solver.name(),
            });
        }
        warn!(
            solver = solver.name(),
            iterations = report.iterations,
            residual = report.residual,
            "linear solve failed"
        );
        failures.push(format!(
            "{} stopped after {} iterations at residual {:.3e}",
            solver.name(),
            report.iterations,
            report.residual
        ));
        last = (report.iterations, report.residual);
    }
    Err(WindError::SolverDiverged {
        message: failures.join("; "),
        iterations: last.0,
        residual: last.1,
    })
}
