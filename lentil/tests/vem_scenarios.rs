use lentil::common::*;
use lentil::elbo::elbo;
use lentil::fit::{fit_lentil, fit_vem, LentilOptions, RotatedInput};
use lentil::grid::{GridSpec, MixtureGrid, PenaltyType};
use lentil::seed::{initial_state, normal_means_seed, PiInit};
use lentil::squarem::SquaremOptions;
use lentil::sufficient::VemData;
use lentil::summary::summarize;
use lentil::update::vem_sweep;

use matrix_util::traits::SampleOps;

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Two null and two strong effects, one nearly irrelevant confounder
fn four_features(s: f64) -> anyhow::Result<VemData> {
    let grid = MixtureGrid::from_parts(vec![0.0, 0.25, 1.0], vec![1.0, 1.0, 1.0])?;
    VemData::new(
        DVec::from_vec(vec![0.0, 0.0, 2.0, -2.0]),
        DVec::from_element(4, s),
        Mat::from_element(4, 1, 1e-3),
        grid,
        false,
        0.0,
    )
}

fn run_four_features(s: f64) -> anyhow::Result<(DVec, DVec)> {
    let data = four_features(s)?;
    let seed = normal_means_seed(&data.betahat, &data.s_diag, &data.grid);
    let init = initial_state(&data, &seed, &PiInit::ZeroConc)?;
    let fit = fit_vem(&data, &init, &SquaremOptions::default())?;

    let se = data.s_diag.map(|x| x.sqrt());
    let table = summarize(&fit.params, &data.grid, &data.betahat, &se);
    Ok((table.lfdr, table.posterior_mean))
}

#[test]
fn null_and_strong_effects_separate() -> anyhow::Result<()> {
    let (lfdr, pm) = run_four_features(0.01)?;

    assert!(lfdr[0] > 0.5 && lfdr[1] > 0.5, "lfdr = {:?}", lfdr);
    assert!(lfdr[2] < 1e-3 && lfdr[3] < 1e-3, "lfdr = {:?}", lfdr);

    assert_abs_diff_eq!(pm[0], 0.0, epsilon = 1e-6);
    assert!(pm[2] > 1.5 && pm[2] < 2.0, "pm = {:?}", pm);
    assert!(pm[3] < -1.5 && pm[3] > -2.0, "pm = {:?}", pm);
    Ok(())
}

#[test]
fn unit_noise_shrinks_with_sign() -> anyhow::Result<()> {
    let (lfdr, pm) = run_four_features(1.0)?;

    assert!(lfdr.iter().all(|&x| (0.0..=1.0).contains(&x)));
    assert!(pm[2] > 0.0 && pm[2] < 2.0, "pm = {:?}", pm);
    assert!(pm[3] < 0.0 && pm[3] > -2.0, "pm = {:?}", pm);
    Ok(())
}

struct Confounded {
    input: RotatedInput,
    z: DVec,
}

fn confounded(p: usize, seed: u64) -> anyhow::Result<Confounded> {
    let k = 2;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let effect = Normal::new(0.0, 2.0)?;

    let loadings = Mat::rnorm_rng(p, k, &mut rng);
    let z = DVec::from_vec(vec![3.0, -2.0]);

    let beta = DVec::from_fn(p, |_, _| {
        if rng.random::<f64>() < 0.7 {
            0.0
        } else {
            effect.sample(&mut rng)
        }
    });
    let s_diag = DVec::from_fn(p, |_, _| 0.5 + rng.random::<f64>());
    let noise = DVec::from_fn(p, |j, _| s_diag[j].sqrt() * effect.sample(&mut rng) / 2.0);

    let betahat = &beta + &loadings * &z + noise;

    Ok(Confounded {
        input: RotatedInput {
            betahat_ols: betahat,
            s_diag,
            loadings,
        },
        z,
    })
}

#[test]
fn plain_sweeps_never_decrease_elbo() -> anyhow::Result<()> {
    let sim = confounded(100, 5)?;
    let input = &sim.input;

    let grid = MixtureGrid::build(
        input.betahat_ols.as_slice(),
        input.s_diag.as_slice(),
        &GridSpec::default(),
        &PenaltyType::default(),
    )?;
    let white = lentil::whiten::Whitening::new(&input.loadings)?;
    let data = VemData::new(
        input.betahat_ols.clone(),
        input.s_diag.clone(),
        white.amat,
        grid,
        true,
        0.0,
    )?;

    let seed = normal_means_seed(&data.betahat, &data.s_diag, &data.grid);
    let mut params = initial_state(&data, &seed, &PiInit::ZeroConc)?;
    let mut prev = elbo(&data, &params)
        .value()
        .ok_or(anyhow::anyhow!("invalid initial state"))?;

    for _ in 0..100 {
        params = vem_sweep(&data, &params);
        let curr = elbo(&data, &params)
            .value()
            .ok_or(anyhow::anyhow!("invalid state"))?;
        assert!(curr >= prev - 1e-6, "ELBO decreased: {} -> {}", prev, curr);
        prev = curr;
    }
    Ok(())
}

#[test]
fn confounder_matches_direct_regression() -> anyhow::Result<()> {
    let sim = confounded(150, 3)?;
    let input = &sim.input;

    let fit = fit_lentil(input, &LentilOptions::default())?;
    let zhat = &fit.z_hat * fit.phi;

    // generalized least squares of betahat on the loadings
    let l = &input.loadings;
    let inv_s = input.s_diag.map(|s| 1.0 / s);
    let lsl = l.transpose() * Mat::from_diagonal(&inv_s) * l;
    let lsb = l.transpose() * input.betahat_ols.component_mul(&inv_s);
    let direct = lsl
        .cholesky()
        .ok_or(anyhow::anyhow!("singular"))?
        .solve(&lsb);

    for a in 0..2 {
        assert!(
            (zhat[a] - direct[a]).abs() < 0.3,
            "zhat = {:?}, direct = {:?}",
            zhat.as_slice(),
            direct.as_slice()
        );
        assert!((zhat[a] - sim.z[a]).abs() < 0.5);
    }

    assert!(fit.xi > 0.0);
    assert_eq!(fit.summary.num_features(), 150);
    assert!(fit.summary.lfsr.iter().all(|&x| (0.0..=1.0 + 1e-12).contains(&x)));
    Ok(())
}

#[test]
fn duplicate_zero_in_grid_fails() -> anyhow::Result<()> {
    let sim = confounded(20, 7)?;
    let options = LentilOptions {
        grid: GridSpec::Custom(vec![0.0, 1e-15, 1.0, 4.0]),
        ..Default::default()
    };
    assert!(fit_lentil(&sim.input, &options).is_err());
    Ok(())
}

#[test]
fn reweighting_restores_scale() -> anyhow::Result<()> {
    let sim = confounded(60, 9)?;
    let options = LentilOptions {
        sprop: 1.0,
        scale_var: false,
        ..Default::default()
    };
    let fit = fit_lentil(&sim.input, &options)?;

    let table = &fit.summary;
    assert_eq!(table.betahat, sim.input.betahat_ols);
    for j in 0..60 {
        assert_abs_diff_eq!(
            table.sebetahat[j],
            sim.input.s_diag[j].sqrt(),
            epsilon = 1e-12
        );
        assert!(table.posterior_mean[j].is_finite());
        assert!(table.posterior_sd[j] >= 0.0);
    }
    Ok(())
}

#[test]
fn reweighting_rescales_only_posterior_moments() -> anyhow::Result<()> {
    let sim = confounded(80, 11)?;
    let sprop = 0.5;
    let options = LentilOptions {
        sprop,
        scale_var: true,
        ..Default::default()
    };
    let fit = fit_lentil(&sim.input, &options)?;

    let table = &fit.summary;
    let prior = &fit.prior;
    for j in 0..80 {
        let w = sim.input.s_diag[j].sqrt().powf(sprop);

        let (mut mean, mut second) = (0.0, 0.0);
        for m in 0..prior.pivec.len() {
            let (g, mu, s2) = (
                prior.proportions[(j, m)],
                prior.means[(j, m)],
                prior.variances[(j, m)],
            );
            mean += g * mu;
            second += g * (mu * mu + s2);
        }
        let sd = (second - mean * mean).max(0.0).sqrt();

        assert_abs_diff_eq!(table.posterior_mean[j], w * mean, epsilon = 1e-10);
        assert_abs_diff_eq!(table.posterior_sd[j], w * sd, epsilon = 1e-10);

        // local rates stay on the reweighted scale
        assert_eq!(table.lfdr[j], prior.proportions[(j, prior.zero_spot)]);
        let pos = table.positive_prob[j];
        let neg = table.negative_prob[j];
        assert_abs_diff_eq!(table.lfsr[j], pos.min(neg) + table.lfdr[j], epsilon = 1e-12);
    }
    Ok(())
}
