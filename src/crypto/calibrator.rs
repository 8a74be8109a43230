//! Host-specific choice of the PBKDF2 iteration count.
//!
//! The cost of `n` iterations is modelled as `overhead + n * per_iteration`.
//! Both terms are estimated from the medians of timing 1-iteration and
//! 2-iteration derivations, then solved for the count that hits a target
//! wall-clock duration.

use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::KeyEncryptionKey;
use super::Passphrase;
use crate::config::settings::KdfSettings;
use crate::error::CacheError;
use crate::error::Result;

/// Measures the wall-clock cost of a KDF run.
pub trait IterationTimer {
    /// Nanoseconds taken by one derivation with `iterations` rounds.
    fn time_iterations(&mut self, iterations: u32) -> Result<u64>;
}

/// Times real PBKDF2 derivations.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pbkdf2Timer;

impl IterationTimer for Pbkdf2Timer {
    fn time_iterations(&mut self, iterations: u32) -> Result<u64> {
        let passphrase = Passphrase::try_from("password")?;
        let salt = KeyEncryptionKey::generate_salt();

        let start = Instant::now();
        let _kek = KeyEncryptionKey::derive(&passphrase, &salt, iterations)?;
        let elapsed = start.elapsed();

        Ok(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Linear cost model fitted by the calibrator, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    pub fixed_overhead_nanos: i128,
    pub per_iteration_nanos: i128,
}

#[derive(Debug)]
pub struct KdfIterationCalibrator<T = Pbkdf2Timer> {
    samples: usize,
    max_rounds: usize,
    timer: T,
}

impl KdfIterationCalibrator<Pbkdf2Timer> {
    pub fn from_settings(kdf: &KdfSettings) -> Self {
        Self::with_timer(kdf.calibration_samples, kdf.max_calibration_rounds, Pbkdf2Timer)
    }
}

impl<T: IterationTimer> KdfIterationCalibrator<T> {
    pub fn with_timer(samples: usize, max_rounds: usize, timer: T) -> Self {
        Self {
            samples,
            max_rounds,
            timer,
        }
    }

    /// Iteration count whose derivation should take about `target`.
    ///
    /// Always at least 1, saturating at `u32::MAX`. Fails with
    /// [`CacheError::CalibrationDivergence`] if no round of sampling yields a
    /// positive overhead and a positive per-iteration cost.
    pub fn choose_iteration_count(&mut self, target: Duration) -> Result<u32> {
        let estimate = self.estimate()?;

        let target_nanos = i128::try_from(target.as_nanos()).unwrap_or(i128::MAX);
        let remaining = target_nanos.saturating_sub(estimate.fixed_overhead_nanos);
        if remaining <= 0 {
            return Ok(1);
        }

        // round to nearest
        let per_iteration = estimate.per_iteration_nanos;
        let iterations = remaining / per_iteration + i128::from(remaining % per_iteration * 2 >= per_iteration);

        let chosen = u32::try_from(iterations).unwrap_or(u32::MAX).max(1);
        info!(
            "kdf calibration chose {} iterations for a {}ms target",
            chosen,
            target.as_millis()
        );
        Ok(chosen)
    }

    /// Fit the cost model, resampling until both terms are positive.
    pub fn estimate(&mut self) -> Result<CostEstimate> {
        if self.samples == 0 || self.max_rounds == 0 {
            return Err(CacheError::InvalidConfiguration(
                "calibration needs at least one sample and one round".to_string(),
            ));
        }

        let mut one = Vec::with_capacity(self.samples);
        let mut two = Vec::with_capacity(self.samples);

        for round in 1..=self.max_rounds {
            one.clear();
            two.clear();
            for _ in 0..self.samples {
                one.push(self.timer.time_iterations(1)?);
                two.push(self.timer.time_iterations(2)?);
            }

            let t1 = i128::from(lower_median(&mut one));
            let t2 = i128::from(lower_median(&mut two));
            let per_iteration_nanos = t2 - t1;
            let fixed_overhead_nanos = t1 - per_iteration_nanos;

            if per_iteration_nanos > 0 && fixed_overhead_nanos > 0 {
                debug!(
                    "kdf cost estimate after {} round(s): overhead {}ns, per-iteration {}ns",
                    round, fixed_overhead_nanos, per_iteration_nanos
                );
                return Ok(CostEstimate {
                    fixed_overhead_nanos,
                    per_iteration_nanos,
                });
            }

            debug!(
                "discarding kdf calibration round {}: overhead {}ns, per-iteration {}ns",
                round, fixed_overhead_nanos, per_iteration_nanos
            );
        }

        warn!("kdf calibration did not converge after {} rounds", self.max_rounds);
        Err(CacheError::CalibrationDivergence {
            rounds: self.max_rounds,
        })
    }
}

/// Iteration count for a secret about to be written.
///
/// With auto-calibration on this is the larger of the calibrated count and
/// the configured floor; otherwise it is the floor.
pub fn iterations_for_new_secret(kdf: &KdfSettings) -> Result<u32> {
    kdf.validate()?;

    if !kdf.auto_calibrate {
        return Ok(kdf.min_iterations);
    }

    let calibrated =
        KdfIterationCalibrator::from_settings(kdf).choose_iteration_count(kdf.calibration_target())?;
    Ok(calibrated.max(kdf.min_iterations))
}

/// Lower of the two middle values for even lengths. `samples` must be
/// non-empty.
fn lower_median(samples: &mut [u64]) -> u64 {
    samples.sort_unstable();
    samples[(samples.len() - 1) / 2]
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Exact `overhead + n * per_iteration` cost.
    struct LinearTimer {
        overhead: u64,
        per_iteration: u64,
    }

    impl IterationTimer for LinearTimer {
        fn time_iterations(&mut self, iterations: u32) -> Result<u64> {
            Ok(self.overhead + u64::from(iterations) * self.per_iteration)
        }
    }

    /// Replays queued measurements, then falls back to a linear cost.
    struct ScriptedTimer {
        script: VecDeque<u64>,
        fallback: LinearTimer,
    }

    impl IterationTimer for ScriptedTimer {
        fn time_iterations(&mut self, iterations: u32) -> Result<u64> {
            match self.script.pop_front() {
                Some(nanos) => Ok(nanos),
                None => self.fallback.time_iterations(iterations),
            }
        }
    }

    fn linear() -> KdfIterationCalibrator<LinearTimer> {
        KdfIterationCalibrator::with_timer(
            5,
            3,
            LinearTimer {
                overhead: 50_000,
                per_iteration: 1_000,
            },
        )
    }

    #[test]
    fn linear_cost_is_recovered_exactly() {
        let estimate = linear().estimate().unwrap();
        assert_eq!(50_000, estimate.fixed_overhead_nanos);
        assert_eq!(1_000, estimate.per_iteration_nanos);
    }

    #[test]
    fn chooses_count_that_fills_target() {
        let chosen = linear().choose_iteration_count(Duration::from_millis(1)).unwrap();
        assert_eq!(950, chosen);
    }

    #[test]
    fn rounds_to_nearest() {
        // (51_600 - 50_000) / 1_000 = 1.6
        let chosen = linear().choose_iteration_count(Duration::from_nanos(51_600)).unwrap();
        assert_eq!(2, chosen);

        let chosen = linear().choose_iteration_count(Duration::from_nanos(51_400)).unwrap();
        assert_eq!(1, chosen);
    }

    #[test]
    fn zero_target_yields_one() {
        assert_eq!(1, linear().choose_iteration_count(Duration::ZERO).unwrap());
    }

    #[test]
    fn huge_target_saturates() {
        assert_eq!(u32::MAX, linear().choose_iteration_count(Duration::MAX).unwrap());
    }

    #[test]
    fn larger_targets_never_yield_fewer_iterations() {
        let mut calibrator = linear();
        let mut previous = 0;
        for millis in [0, 1, 2, 10, 100, 1_000, 60_000] {
            let chosen = calibrator
                .choose_iteration_count(Duration::from_millis(millis))
                .unwrap();
            assert!(chosen >= previous);
            previous = chosen;
        }
    }

    #[test]
    fn noisy_round_is_discarded() {
        // first round: 2 iterations look cheaper than 1
        let script = VecDeque::from(vec![9_000, 1_000]);
        let mut calibrator = KdfIterationCalibrator::with_timer(
            1,
            2,
            ScriptedTimer {
                script,
                fallback: LinearTimer {
                    overhead: 50_000,
                    per_iteration: 1_000,
                },
            },
        );

        assert_eq!(1_000, calibrator.estimate().unwrap().per_iteration_nanos);
    }

    #[test]
    fn flat_timings_diverge() {
        let mut calibrator = KdfIterationCalibrator::with_timer(
            4,
            3,
            LinearTimer {
                overhead: 10_000,
                per_iteration: 0,
            },
        );

        assert!(matches!(
            calibrator.choose_iteration_count(Duration::from_secs(1)),
            Err(CacheError::CalibrationDivergence { rounds: 3 })
        ));
    }

    #[test]
    fn zero_samples_rejected() {
        let mut calibrator = KdfIterationCalibrator::with_timer(
            0,
            3,
            LinearTimer {
                overhead: 1,
                per_iteration: 1,
            },
        );
        assert!(matches!(
            calibrator.estimate(),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn lower_median_picks_lower_middle() {
        assert_eq!(5, lower_median(&mut [9, 5, 1]));
        assert_eq!(3, lower_median(&mut [7, 3, 1, 5]));
        assert_eq!(4, lower_median(&mut [4]));
    }

    #[test]
    fn real_pbkdf2_calibration_brackets() {
        let kdf = KdfSettings::default();
        let mut calibrator = KdfIterationCalibrator::from_settings(&kdf);

        assert_eq!(1, calibrator.choose_iteration_count(Duration::ZERO).unwrap());
        assert_eq!(u32::MAX, calibrator.choose_iteration_count(Duration::MAX).unwrap());
        assert!(calibrator.choose_iteration_count(Duration::from_secs(10)).unwrap() > 1);
    }

    #[test]
    fn new_secrets_respect_floor() {
        let kdf = KdfSettings {
            min_iterations: 5_000,
            auto_calibrate: false,
            ..KdfSettings::default()
        };
        assert_eq!(5_000, iterations_for_new_secret(&kdf).unwrap());

        let kdf = KdfSettings {
            min_iterations: 5_000,
            calibration_target_millis: 1,
            ..KdfSettings::default()
        };
        assert!(iterations_for_new_secret(&kdf).unwrap() >= 5_000);
    }
}
