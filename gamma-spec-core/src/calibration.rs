//! The immutable [`EnergyCalibration`] value object (C2) and the calibration
//! algebra built on top of it (C3): polynomial/FRF conversion, channel/energy
//! lookup, rebin, truncate and combine-channels.
use std::sync::Arc;

use crate::enums::EnergyCalType;
use crate::errors::*;
use crate::settings::SpecFileSettings;
use crate::spline;

/// Channel counts are clamped to this inclusive range; values outside cause
/// calibration constructors to fail with [`SpecError::InvalidCalibration`].
pub const MIN_CHANNELS: usize = 1;
pub const MAX_CHANNELS: usize = 65536 + 8;

/// The largest positive polynomial offset (zeroth coefficient) considered
/// plausible for a "normal" calibration; values above this (or below -500
/// keV) suggest corrupt data.
pub const POLYNOMIAL_OFFSET_UPPER_LIMIT_KEV: f32 = 5500.0;
pub const POLYNOMIAL_OFFSET_LOWER_LIMIT_KEV: f32 = -500.0;

/// An immutable energy calibration: type, coefficients, deviation pairs and
/// the derived lower-edge energies.
///
/// Two calibrations compare equal by `(channel_count, type, coefficients,
/// deviation_pairs)`; the derived lower-edge vector is considered redundant
/// for this purpose (except that for `LowerChannelEdge` the "coefficients"
/// *are* the lower-edge vector, so they already participate).
#[derive(Debug, Clone)]
pub struct EnergyCalibration {
    cal_type: EnergyCalType,
    coefficients: Vec<f32>,
    deviation_pairs: Vec<(f32, f32)>,
    channel_count: usize,
    lower_edge_energies: Option<Arc<Vec<f32>>>,
}

impl PartialEq for EnergyCalibration {
    fn eq(&self, other: &Self) -> bool {
        self.channel_count == other.channel_count
            && self.cal_type == other.cal_type
            && self.coefficients == other.coefficients
            && self.deviation_pairs == other.deviation_pairs
    }
}

impl Default for EnergyCalibration {
    fn default() -> Self {
        Self::invalid()
    }
}

fn strictly_increasing(v: &[f32]) -> bool {
    v.windows(2).all(|w| w[0] < w[1])
}

impl EnergyCalibration {
    /// The sentinel "no calibration" value.
    pub fn invalid() -> Self {
        EnergyCalibration {
            cal_type: EnergyCalType::InvalidEquationType,
            coefficients: vec![],
            deviation_pairs: vec![],
            channel_count: 0,
            lower_edge_energies: None,
        }
    }

    fn validate_channel_count(n: usize) -> Result<(), SpecError> {
        if n < MIN_CHANNELS || n > MAX_CHANNELS {
            return Err(SpecError::InvalidCalibration {
                msg: format!(
                    "channel count {} outside allowed range [{}, {}]",
                    n, MIN_CHANNELS, MAX_CHANNELS
                ),
            });
        }
        Ok(())
    }

    fn from_parts(
        cal_type: EnergyCalType,
        coefficients: Vec<f32>,
        deviation_pairs: Vec<(f32, f32)>,
        channel_count: usize,
    ) -> Result<Self, SpecError> {
        Self::validate_channel_count(channel_count)?;
        let edges = fullrangefraction_binning_generic(
            cal_type,
            &coefficients,
            channel_count,
            &deviation_pairs,
            true,
        )?;
        if !strictly_increasing(&edges) {
            return Err(SpecError::InvalidCalibration {
                msg: "derived lower-edge energies are not strictly increasing".to_string(),
            });
        }
        Ok(EnergyCalibration {
            cal_type,
            coefficients,
            deviation_pairs,
            channel_count,
            lower_edge_energies: Some(Arc::new(edges)),
        })
    }

    /// Builds a `Polynomial` calibration. Fails (and leaves no partial state)
    /// if the channel count is out of range or the resulting lower-edge
    /// energies are not strictly increasing.
    /// ```
    /// use gamma_spec_core::calibration::EnergyCalibration;
    ///
    /// let cal = EnergyCalibration::polynomial(1024, vec![0.0, 3.0], vec![]).unwrap();
    /// assert_eq!(cal.energy_for_channel(0.0), 0.0);
    /// ```
    pub fn polynomial(
        channel_count: usize,
        coefficients: Vec<f32>,
        deviation_pairs: Vec<(f32, f32)>,
    ) -> Result<Self, SpecError> {
        Self::from_parts(
            EnergyCalType::Polynomial,
            coefficients,
            deviation_pairs,
            channel_count,
        )
    }

    /// Same as [`Self::polynomial`] but marks the calibration as a guessed
    /// default rather than one actually parsed from the file.
    pub fn default_polynomial_typed(
        channel_count: usize,
        coefficients: Vec<f32>,
        deviation_pairs: Vec<(f32, f32)>,
    ) -> Result<Self, SpecError> {
        Self::from_parts(
            EnergyCalType::UnspecifiedUsingDefaultPolynomial,
            coefficients,
            deviation_pairs,
            channel_count,
        )
    }

    /// The consolidation pass's fallback calibration: polynomial spanning
    /// `[0, 3000 keV]` over `channel_count` channels.
    pub fn consolidation_default(channel_count: usize) -> Self {
        let gain = if channel_count > 1 {
            3000.0 / (channel_count as f32 - 1.0)
        } else {
            3000.0
        };
        Self::default_polynomial_typed(channel_count, vec![0.0, gain], vec![])
            .unwrap_or_else(|_| Self::invalid())
    }

    /// Builds a `FullRangeFraction` calibration.
    pub fn full_range_fraction(
        channel_count: usize,
        coefficients: Vec<f32>,
        deviation_pairs: Vec<(f32, f32)>,
    ) -> Result<Self, SpecError> {
        Self::from_parts(
            EnergyCalType::FullRangeFraction,
            coefficients,
            deviation_pairs,
            channel_count,
        )
    }

    /// Builds a `LowerChannelEdge` calibration. `channel_energies` must have
    /// at least `channel_count` entries; if it has exactly `channel_count`,
    /// an upper edge is synthesized by linear extrapolation of the last gap.
    pub fn lower_channel_edge(
        channel_count: usize,
        mut channel_energies: Vec<f32>,
    ) -> Result<Self, SpecError> {
        Self::validate_channel_count(channel_count)?;
        if channel_energies.len() < channel_count {
            return Err(SpecError::InvalidCalibration {
                msg: format!(
                    "lower channel edge needs at least {} entries, got {}",
                    channel_count,
                    channel_energies.len()
                ),
            });
        }
        channel_energies.truncate(channel_count + 1);
        if channel_energies.len() == channel_count {
            if channel_count == 1 {
                return Err(SpecError::InvalidCalibration {
                    msg: "single-channel lower-edge calibration needs two energies".to_string(),
                });
            }
            let n = channel_energies.len();
            let last_gap = channel_energies[n - 1] - channel_energies[n - 2];
            channel_energies.push(channel_energies[n - 1] + last_gap);
        }
        if !strictly_increasing(&channel_energies) {
            return Err(SpecError::InvalidCalibration {
                msg: "lower channel edge energies are not strictly increasing".to_string(),
            });
        }
        Ok(EnergyCalibration {
            cal_type: EnergyCalType::LowerChannelEdge,
            coefficients: channel_energies.clone(),
            deviation_pairs: vec![],
            channel_count,
            lower_edge_energies: Some(Arc::new(channel_energies)),
        })
    }

    pub fn cal_type(&self) -> EnergyCalType {
        self.cal_type
    }

    pub fn valid(&self) -> bool {
        self.cal_type != EnergyCalType::InvalidEquationType
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    pub fn deviation_pairs(&self) -> &[(f32, f32)] {
        &self.deviation_pairs
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn channel_energies(&self) -> Option<&Arc<Vec<f32>>> {
        self.lower_edge_energies.as_ref()
    }

    /// Lower energy of the first channel.
    pub fn lower_energy(&self) -> Result<f32, SpecError> {
        self.channel_energies()
            .and_then(|e| e.first().copied())
            .ok_or_else(|| SpecError::InvalidCalibration {
                msg: "no calibration".to_string(),
            })
    }

    /// Upper energy of the last channel.
    pub fn upper_energy(&self) -> Result<f32, SpecError> {
        self.channel_energies()
            .and_then(|e| e.last().copied())
            .ok_or_else(|| SpecError::InvalidCalibration {
                msg: "no calibration".to_string(),
            })
    }

    /// Energy corresponding to the (possibly fractional) channel number.
    /// Polynomial/FRF evaluate directly, even outside `[0, N]`.
    /// `LowerChannelEdge` requires `0 <= c <= N` and interpolates linearly.
    pub fn energy_for_channel(&self, channel: f64) -> f64 {
        match self.cal_type {
            EnergyCalType::Polynomial | EnergyCalType::UnspecifiedUsingDefaultPolynomial => {
                polynomial_energy(channel, &self.coefficients, &self.deviation_pairs)
            }
            EnergyCalType::FullRangeFraction => {
                frf_energy(channel, &self.coefficients, self.channel_count, &self.deviation_pairs)
            }
            EnergyCalType::LowerChannelEdge => {
                let edges = self.lower_edge_energies.as_ref().map(|e| e.as_slice()).unwrap_or(&[]);
                interpolate_lower_edge(channel, edges)
            }
            EnergyCalType::InvalidEquationType => 0.0,
        }
    }

    /// Fractional channel number corresponding to `energy`. Algebraic
    /// inversion is used where possible; a binary search (doubling the
    /// bracket on either side) is used for `LowerChannelEdge` and for
    /// polynomial/FRF equations with deviation pairs or higher-order terms.
    pub fn channel_for_energy(
        &self,
        energy: f64,
        settings: &SpecFileSettings,
    ) -> Result<f64, SpecError> {
        match self.cal_type {
            EnergyCalType::Polynomial | EnergyCalType::UnspecifiedUsingDefaultPolynomial => {
                find_polynomial_channel(
                    energy,
                    &self.coefficients,
                    self.channel_count,
                    &self.deviation_pairs,
                    settings.get_channel_for_energy_tolerance_kev(),
                    settings,
                )
            }
            EnergyCalType::FullRangeFraction => find_fullrangefraction_channel(
                energy,
                &self.coefficients,
                self.channel_count,
                &self.deviation_pairs,
                settings.get_channel_for_energy_tolerance_kev(),
                settings,
            ),
            EnergyCalType::LowerChannelEdge => {
                let edges = self
                    .lower_edge_energies
                    .as_ref()
                    .map(|e| e.as_slice())
                    .unwrap_or(&[]);
                channel_for_lower_edge_energy(energy, edges)
            }
            EnergyCalType::InvalidEquationType => Err(SpecError::InvalidCalibration {
                msg: "cannot evaluate an invalid calibration".to_string(),
            }),
        }
    }
}

fn interpolate_lower_edge(channel: f64, edges: &[f32]) -> f64 {
    if edges.len() < 2 {
        return 0.0;
    }
    let n = edges.len() - 1;
    let c = channel.clamp(0.0, n as f64);
    let lo = c.floor() as usize;
    let lo = lo.min(n - 1);
    let frac = c - lo as f64;
    let e0 = edges[lo] as f64;
    let e1 = edges[lo + 1] as f64;
    e0 + frac * (e1 - e0)
}

fn channel_for_lower_edge_energy(energy: f64, edges: &[f32]) -> Result<f64, SpecError> {
    if edges.len() < 2 {
        return Err(SpecError::InvalidCalibration {
            msg: "no lower-edge energies".to_string(),
        });
    }
    let idx = edges.partition_point(|&e| (e as f64) <= energy);
    if idx == 0 {
        return Ok(0.0);
    }
    if idx >= edges.len() {
        return Ok((edges.len() - 1) as f64);
    }
    let lo = edges[idx - 1] as f64;
    let hi = edges[idx] as f64;
    Ok((idx - 1) as f64 + (energy - lo) / (hi - lo))
}

/// `E(i) = Σ c_k · i^k`, then add the deviation-pair correction.
pub fn polynomial_energy(channel: f64, coeffs: &[f32], dev_pairs: &[(f32, f32)]) -> f64 {
    let mut e = 0.0f64;
    let mut pow = 1.0f64;
    for c in coeffs {
        e += *c as f64 * pow;
        pow *= channel;
    }
    e + deviation_pair_correction(e, dev_pairs)
}

/// `x = i/N; E(i) = c0 + c1·x + c2·x² + c3·x³ + c4/(1+60·x)`, then add the
/// deviation-pair correction.
pub fn frf_energy(channel: f64, coeffs: &[f32], nchannel: usize, dev_pairs: &[(f32, f32)]) -> f64 {
    let n = nchannel.max(1) as f64;
    let x = channel / n;
    let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0) as f64;
    let e = c(0) + c(1) * x + c(2) * x * x + c(3) * x * x * x + c(4) / (1.0 + 60.0 * x);
    e + deviation_pair_correction(e, dev_pairs)
}

/// Evaluates the forward deviation-pair spline at `nominal_energy`. Returns
/// `0.0` for an empty deviation-pair list.
pub fn deviation_pair_correction(nominal_energy: f64, dev_pairs: &[(f32, f32)]) -> f64 {
    if dev_pairs.is_empty() {
        return 0.0;
    }
    let nodes = spline::forward_spline_for_dev_pairs(dev_pairs);
    spline::eval(nominal_energy, &nodes)
}

/// Newton-like refinement of the inverse deviation-pair spline: given the
/// true (post-correction) energy, returns the additive amount that was
/// contributed by the deviation pairs over the underlying polynomial/FRF
/// equation. Iterates up to `settings`'s bound, falling back to whichever
/// candidate has the smaller residual if it fails to converge within
/// tolerance (logging a warning, per the crate's error-handling design).
pub fn correction_due_to_dev_pairs(true_energy: f64, dev_pairs: &[(f32, f32)], settings: &SpecFileSettings) -> f64 {
    if dev_pairs.is_empty() {
        return 0.0;
    }

    let fwd = spline::forward_spline_for_dev_pairs(dev_pairs);
    let inv = spline::inverse_spline_for_dev_pairs(dev_pairs);

    let tolerance = settings.get_dev_pair_refinement_tolerance_kev();
    let max_iters = settings.get_dev_pair_max_iterations();

    let initial_answer = spline::eval(true_energy, &inv);
    let initial_check = spline::eval(true_energy - initial_answer, &fwd);
    let initial_diff = initial_answer - initial_check;

    if initial_diff.abs() < tolerance {
        return initial_answer;
    }

    let mut answer = initial_answer;
    let mut diff = initial_diff;
    let mut iters = 0usize;
    while diff.abs() > tolerance {
        answer -= diff;
        let check = spline::eval(true_energy - answer, &fwd);
        diff = answer - check;
        iters += 1;
        if iters > max_iters {
            let initial_is_closer = initial_diff.abs() < diff.abs();
            let result = if initial_is_closer { initial_answer } else { answer };
            log::warn!(
                "correction_due_to_dev_pairs({} keV) did not converge after {} iterations \
                 (residual={} keV); returning {} answer",
                true_energy,
                iters,
                diff,
                if initial_is_closer { "initial" } else { "last" }
            );
            return result;
        }
    }
    answer
}

/// Applies the deviation pairs to a vector of lower-channel energies.
pub fn apply_deviation_pair(binning: &[f32], dev_pairs: &[(f32, f32)]) -> Vec<f32> {
    if dev_pairs.is_empty() {
        return binning.to_vec();
    }
    let nodes = spline::forward_spline_for_dev_pairs(dev_pairs);
    binning
        .iter()
        .map(|e| (*e as f64 + spline::eval(*e as f64, &nodes)) as f32)
        .collect()
}

fn fullrangefraction_binning_generic(
    cal_type: EnergyCalType,
    coeffs: &[f32],
    nchannel: usize,
    dev_pairs: &[(f32, f32)],
    include_upper: bool,
) -> Result<Vec<f32>, SpecError> {
    let n = nchannel.max(1);
    let count = if include_upper { n + 1 } else { n };
    let mut energies = Vec::with_capacity(count);
    for i in 0..count {
        let e = match cal_type {
            EnergyCalType::Polynomial | EnergyCalType::UnspecifiedUsingDefaultPolynomial => {
                polynomial_energy(i as f64, coeffs, dev_pairs)
            }
            EnergyCalType::FullRangeFraction => frf_energy(i as f64, coeffs, n, dev_pairs),
            EnergyCalType::LowerChannelEdge => {
                return coeffs
                    .get(..count.min(coeffs.len()))
                    .map(|s| s.to_vec())
                    .ok_or_else(|| SpecError::InvalidCalibration {
                        msg: "not enough lower-channel energies".to_string(),
                    });
            }
            EnergyCalType::InvalidEquationType => {
                return Err(SpecError::InvalidCalibration {
                    msg: "invalid calibration has no binning".to_string(),
                })
            }
        };
        energies.push(e as f32);
    }
    Ok(energies)
}

/// Lower channel energies from a polynomial calibration. Has `nchannel+1` entries.
pub fn polynomial_binning(
    coeffs: &[f32],
    nchannel: usize,
    dev_pairs: &[(f32, f32)],
) -> Result<Vec<f32>, SpecError> {
    fullrangefraction_binning_generic(EnergyCalType::Polynomial, coeffs, nchannel, dev_pairs, true)
}

/// Lower channel energies from an FRF calibration.
pub fn fullrangefraction_binning(
    coeffs: &[f32],
    nchannel: usize,
    dev_pairs: &[(f32, f32)],
    include_upper_energy: bool,
) -> Result<Vec<f32>, SpecError> {
    fullrangefraction_binning_generic(
        EnergyCalType::FullRangeFraction,
        coeffs,
        nchannel,
        dev_pairs,
        include_upper_energy,
    )
}

/// Converts polynomial coefficients (up to degree 3) to full-range-fraction
/// coefficients. Vendor-compatible scaling: `a_k = N^k * c_k`.
/// ```
/// use gamma_spec_core::calibration::polynomial_to_frf;
///
/// let frf = polynomial_to_frf(&[0.0, 3.0], 1024);
/// assert_eq!(frf, vec![0.0, 3072.0]);
/// ```
pub fn polynomial_to_frf(coeffs: &[f32], nchannel: usize) -> Vec<f32> {
    let n = nchannel as f32;
    let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
    let a0 = c(0);
    let a1 = n * c(1);
    let a2 = n * n * c(2);
    let a3 = n * n * n * c(3);

    let mut out = vec![a0, a1];
    if a2 != 0.0 || a3 != 0.0 {
        out.push(a2);
    }
    if a3 != 0.0 {
        out.push(a3);
    }
    out
}

/// Converts full-range-fraction coefficients (up to degree 3) to polynomial
/// coefficients. The fifth FRF term (`c4/(1+60x)`) has no polynomial
/// equivalent and is dropped; a nonzero `c4` logs a warning, per the crate's
/// recorded design decision on this open question.
pub fn frf_to_polynomial(coeffs: &[f32], nchannel: usize) -> Vec<f32> {
    if nchannel == 0 || coeffs.is_empty() {
        return vec![];
    }
    if let Some(&c4) = coeffs.get(4) {
        if c4.abs() > f32::EPSILON {
            log::warn!(
                "frf_to_polynomial: dropping nonzero FullRangeFraction c4 term ({}), \
                 which has no polynomial equivalent",
                c4
            );
        }
    }

    let n = nchannel as f32;
    let a = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
    let c0 = a(0);
    let c1 = a(1) / n;
    let c2 = a(2) / (n * n);
    let c3 = a(3) / (n * n * n);

    let mut out = vec![];
    if c0 != 0.0 || c1 != 0.0 || c2 != 0.0 || c3 != 0.0 {
        out.push(c0);
        if c1 != 0.0 || c2 != 0.0 || c3 != 0.0 {
            out.push(c1);
            if c2 != 0.0 || c3 != 0.0 {
                out.push(c2);
                if c3 != 0.0 {
                    out.push(c3);
                }
            }
        }
    }
    out
}

/// Converts "mid-channel" polynomial coefficients (the convention where the
/// equation gives the *center* of a channel rather than its lower edge) to
/// standard full-range-fraction coefficients.
pub fn mid_channel_polynomial_to_frf(coeffs: &[f32], nchannel: usize) -> Vec<f32> {
    let n = nchannel as f32;
    let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
    let (c0, c1, c2, c3) = (c(0), c(1), c(2), c(3));

    let a0 = c0 - 0.5 * c1 + 0.25 * c2 + (1.0 / 8.0) * c3;
    let a1 = n * (c1 + c2 + 0.75 * c3);
    let a2 = n * n * (c2 + 1.5 * c3);
    let a3 = n * n * n * c3;

    let mut out = vec![a0, a1];
    if a2 != 0.0 || a3 != 0.0 {
        out.push(a2);
    }
    if a3 != 0.0 {
        out.push(a3);
    }
    out
}

/// Shifts the polynomial origin by `m` channels (closed-form binomial
/// expansion, exact for degree <= 5; higher-order terms beyond the 6th
/// coefficient are dropped). Channel count is unaffected; pair with a
/// counts-vector truncation.
pub fn remove_first_channels(coeffs: &[f32], m: i32) -> Vec<f32> {
    let n = m as f32;
    let a = coeffs;
    match a.len() {
        0 => vec![],
        1 => vec![a[0]],
        2 => vec![a[0] + n * a[1], a[1]],
        3 => vec![a[0] + n * a[1] + n * n * a[2], a[1] + 2.0 * n * a[2], a[2]],
        4 => vec![
            n * n * n * a[3] + n * n * a[2] + n * a[1] + a[0],
            3.0 * n * n * a[3] + 2.0 * n * a[2] + a[1],
            3.0 * n * a[3] + a[2],
            a[3],
        ],
        _ => {
            // Degree >= 5: handle the first five coefficients exactly and
            // drop anything past the sixth, matching the original's cap.
            let a4 = a.get(4).copied().unwrap_or(0.0);
            vec![
                n * n * n * n * a4 + n * n * n * a[3] + n * n * a[2] + n * a[1] + a[0],
                4.0 * n * n * n * a4 + 3.0 * n * n * a[3] + 2.0 * n * a[2] + a[1],
                6.0 * n * n * a4 + 3.0 * n * a[3] + a[2],
                4.0 * n * a4 + a[3],
                a4,
            ]
        }
    }
}

/// Returns an energy calibration with `factor` channels combined into one.
/// `N' = ceil(N/factor)`. Fails if `factor == 0` or the result is not
/// strictly monotonic.
pub fn combine_channels(cal: &EnergyCalibration, factor: usize) -> Result<EnergyCalibration, SpecError> {
    if factor == 0 {
        return Err(SpecError::DomainViolation {
            msg: "cannot combine zero channels".to_string(),
        });
    }
    if !cal.valid() {
        return Ok(EnergyCalibration::invalid());
    }
    let n = cal.channel_count();
    let new_n = (n + factor - 1) / factor;

    match cal.cal_type() {
        EnergyCalType::Polynomial | EnergyCalType::UnspecifiedUsingDefaultPolynomial => {
            let k = factor as f32;
            let new_coeffs: Vec<f32> = cal
                .coefficients()
                .iter()
                .enumerate()
                .map(|(i, c)| c * k.powi(i as i32))
                .collect();
            EnergyCalibration::from_parts(
                cal.cal_type(),
                new_coeffs,
                cal.deviation_pairs().to_vec(),
                new_n,
            )
        }
        EnergyCalType::FullRangeFraction => EnergyCalibration::from_parts(
            EnergyCalType::FullRangeFraction,
            cal.coefficients().to_vec(),
            cal.deviation_pairs().to_vec(),
            new_n,
        ),
        EnergyCalType::LowerChannelEdge => {
            let edges = cal.channel_energies().map(|e| e.as_slice()).unwrap_or(&[]);
            let mut new_edges: Vec<f32> = edges.iter().step_by(factor).copied().collect();
            if let Some(&last) = edges.last() {
                if new_edges.last() != Some(&last) {
                    new_edges.push(last);
                }
            }
            EnergyCalibration::lower_channel_edge(new_n, new_edges)
        }
        EnergyCalType::InvalidEquationType => Ok(EnergyCalibration::invalid()),
    }
}

/// Rebuilds the counts vector to `[keep_first, keep_last]` inclusive. If
/// `keep_under_over_flow`, the clipped-off sums are folded into the new
/// first/last channel. The calibration is updated via
/// [`remove_first_channels`] for polynomial/FRF, or by slicing the
/// lower-edge vector.
pub fn truncate_channels(
    cal: &EnergyCalibration,
    counts: &[f32],
    keep_first: usize,
    keep_last: usize,
    keep_under_over_flow: bool,
) -> Result<(EnergyCalibration, Vec<f32>), SpecError> {
    if keep_last < keep_first || keep_last >= counts.len() {
        return Err(SpecError::IncompatibleShape {
            expected: counts.len(),
            got: keep_last + 1,
        });
    }
    let new_len = keep_last - keep_first + 1;
    let mut new_counts = counts[keep_first..=keep_last].to_vec();
    if keep_under_over_flow {
        let underflow: f32 = counts[..keep_first].iter().sum();
        let overflow: f32 = counts[keep_last + 1..].iter().sum();
        new_counts[0] += underflow;
        let last = new_counts.len() - 1;
        new_counts[last] += overflow;
    }

    let new_cal = match cal.cal_type() {
        EnergyCalType::Polynomial | EnergyCalType::UnspecifiedUsingDefaultPolynomial => {
            let shifted = remove_first_channels(cal.coefficients(), keep_first as i32);
            EnergyCalibration::from_parts(cal.cal_type(), shifted, cal.deviation_pairs().to_vec(), new_len)?
        }
        EnergyCalType::FullRangeFraction => {
            // Convert, shift, convert back, matching the source's documented
            // approach of reusing the polynomial shift formula for FRF.
            let poly = frf_to_polynomial(cal.coefficients(), cal.channel_count());
            let shifted = remove_first_channels(&poly, keep_first as i32);
            let frf = polynomial_to_frf(&shifted, new_len);
            EnergyCalibration::from_parts(
                EnergyCalType::FullRangeFraction,
                frf,
                cal.deviation_pairs().to_vec(),
                new_len,
            )?
        }
        EnergyCalType::LowerChannelEdge => {
            let edges = cal.channel_energies().map(|e| e.as_slice()).unwrap_or(&[]);
            let sliced = edges[keep_first..=(keep_last + 1).min(edges.len() - 1)].to_vec();
            EnergyCalibration::lower_channel_edge(new_len, sliced)?
        }
        EnergyCalType::InvalidEquationType => EnergyCalibration::invalid(),
    };

    Ok((new_cal, new_counts))
}

/// Conserves total counts by treating the first and last destination
/// channel's outer edges as unbounded, so that every source channel's
/// counts land somewhere in the destination. Source and destination edges
/// must each have one more entry than their corresponding counts vector.
/// ```
/// use gamma_spec_core::calibration::rebin_by_lower_edge;
///
/// let src_edges = vec![0.0f32, 1.0, 2.0, 3.0];
/// let src_counts = vec![10.0f32, 20.0, 30.0];
/// let dst_edges = vec![0.0f32, 1.5, 3.0];
/// let dst_counts = rebin_by_lower_edge(&src_edges, &src_counts, &dst_edges);
/// let total: f32 = dst_counts.iter().sum();
/// assert!((total - 60.0).abs() < 1e-3);
/// ```
pub fn rebin_by_lower_edge(src_edges: &[f32], src_counts: &[f32], dst_edges: &[f32]) -> Vec<f32> {
    let n_src = src_counts.len();
    let n_dst = dst_edges.len().saturating_sub(1);
    let mut dst_counts = vec![0.0f64; n_dst];

    for i in 0..n_src {
        if i + 1 >= src_edges.len() {
            break;
        }
        let s_lo = src_edges[i] as f64;
        let s_hi = src_edges[i + 1] as f64;
        if s_hi <= s_lo {
            continue;
        }
        let count = src_counts[i] as f64;

        for j in 0..n_dst {
            let d_lo = if j == 0 {
                f64::NEG_INFINITY
            } else {
                dst_edges[j] as f64
            };
            let d_hi = if j == n_dst - 1 {
                f64::INFINITY
            } else {
                dst_edges[j + 1] as f64
            };
            let overlap_lo = s_lo.max(d_lo);
            let overlap_hi = s_hi.min(d_hi);
            if overlap_hi > overlap_lo {
                let frac = (overlap_hi - overlap_lo) / (s_hi - s_lo);
                dst_counts[j] += frac * count;
            }
        }
    }

    dst_counts.into_iter().map(|c| c as f32).collect()
}

fn find_root_bisection(
    energy: f64,
    tolerance: f64,
    mut f: impl FnMut(f64) -> f64,
) -> Result<f64, SpecError> {
    // f(channel) is monotonically increasing energy-vs-channel. Start with a
    // small bracket around zero and double it outward until it brackets the
    // target energy, then bisect.
    let mut lo = -10.0f64;
    let mut hi = 10.0f64;
    let mut expand = 0;
    while (f(lo) - energy) * (f(hi) - energy) > 0.0 {
        lo *= 2.0;
        hi *= 2.0;
        expand += 1;
        if expand > 64 {
            return Err(SpecError::ParseError {
                msg: format!("could not bracket energy {} for channel search", energy),
            });
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let v = f(mid) - energy;
        if v.abs() < tolerance || (hi - lo).abs() < 1e-9 {
            return Ok(mid);
        }
        if (f(lo) - energy) * v <= 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Channel number (possibly fractional) for `energy` under an FRF equation.
/// Uses an algebraic inversion when there are no deviation pairs and at most
/// a quadratic term; otherwise falls back to a bounded binary search.
pub fn find_fullrangefraction_channel(
    energy: f64,
    coeffs: &[f32],
    nchannel: usize,
    dev_pairs: &[(f32, f32)],
    accuracy: f64,
    settings: &SpecFileSettings,
) -> Result<f64, SpecError> {
    let n_sig = coeffs.iter().filter(|c| c.abs() > f32::EPSILON).count();
    if n_sig == 0 && coeffs.len() < 2 {
        return Err(SpecError::ParseError {
            msg: "find_fullrangefraction_channel: need at least two coefficients".to_string(),
        });
    }

    if dev_pairs.is_empty() && coeffs.len() <= 3 {
        let n = nchannel.max(1) as f64;
        let c0 = coeffs.first().copied().unwrap_or(0.0) as f64;
        let c1 = coeffs.get(1).copied().unwrap_or(0.0) as f64;
        let c2 = coeffs.get(2).copied().unwrap_or(0.0) as f64;
        if c2.abs() < 1e-12 {
            if c1.abs() < 1e-12 {
                return Err(SpecError::ParseError {
                    msg: "degenerate FRF equation".to_string(),
                });
            }
            return Ok(((energy - c0) / c1) * n);
        }
        let disc = c1 * c1 - 4.0 * c2 * (c0 - energy);
        if disc < 0.0 {
            return Err(SpecError::ParseError {
                msg: "no real root for FRF quadratic equation".to_string(),
            });
        }
        let sq = disc.sqrt();
        let x1 = (-c1 + sq) / (2.0 * c2);
        let x2 = (-c1 - sq) / (2.0 * c2);
        let n_f = nchannel.max(1) as f64;
        let pick = if (0.0..=1.0).contains(&x1) { x1 } else { x2 };
        return Ok(pick * n_f);
    }

    find_root_bisection(energy, accuracy, |c| {
        frf_energy(c, coeffs, nchannel, dev_pairs)
    })
    .map(|c| {
        let _ = settings;
        c
    })
}

/// Channel number (possibly fractional) for `energy` under a polynomial
/// equation. Algebraic when there are at most 3 coefficients and no
/// deviation pairs; otherwise a bounded binary search.
pub fn find_polynomial_channel(
    energy: f64,
    coeffs: &[f32],
    nchannel: usize,
    dev_pairs: &[(f32, f32)],
    accuracy: f64,
    settings: &SpecFileSettings,
) -> Result<f64, SpecError> {
    if dev_pairs.is_empty() && coeffs.len() <= 3 {
        let c0 = coeffs.first().copied().unwrap_or(0.0) as f64;
        let c1 = coeffs.get(1).copied().unwrap_or(0.0) as f64;
        let c2 = coeffs.get(2).copied().unwrap_or(0.0) as f64;
        if c2.abs() < 1e-12 {
            if c1.abs() < 1e-12 {
                return Err(SpecError::ParseError {
                    msg: "degenerate polynomial equation".to_string(),
                });
            }
            return Ok((energy - c0) / c1);
        }
        let disc = c1 * c1 - 4.0 * c2 * (c0 - energy);
        if disc < 0.0 {
            return Err(SpecError::ParseError {
                msg: "no real root for polynomial quadratic equation".to_string(),
            });
        }
        let sq = disc.sqrt();
        let x1 = (-c1 + sq) / (2.0 * c2);
        let x2 = (-c1 - sq) / (2.0 * c2);
        let n = nchannel.max(1) as f64;
        return Ok(if (0.0..=n).contains(&x1) { x1 } else { x2 });
    }

    find_root_bisection(energy, accuracy, |c| {
        polynomial_energy(c, coeffs, dev_pairs)
    })
    .map(|c| {
        let _ = settings;
        c
    })
}

/// Checks if coefficients + deviation pairs + channel count would produce a
/// valid (strictly increasing) calibration without constructing one.
pub fn calibration_is_valid(
    cal_type: EnergyCalType,
    coeffs: &[f32],
    dev_pairs: &[(f32, f32)],
    nbin: usize,
) -> bool {
    match cal_type {
        EnergyCalType::InvalidEquationType => false,
        EnergyCalType::LowerChannelEdge => {
            !coeffs.is_empty() && coeffs.len() >= nbin && strictly_increasing(coeffs)
        }
        _ => match fullrangefraction_binning_generic(cal_type, coeffs, nbin, dev_pairs, true) {
            Ok(edges) => strictly_increasing(&edges),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_for_channel_zero_is_offset() {
        let cal = EnergyCalibration::polynomial(1024, vec![1.5, 3.0], vec![]).unwrap();
        assert!((cal.energy_for_channel(0.0) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn frf_round_trip_identity_on_first_four_coefficients() {
        let frf = vec![0.0f32, 3072.0, 0.0];
        let poly = frf_to_polynomial(&frf, 1024);
        let back = polynomial_to_frf(&poly, 1024);
        for (a, b) in frf.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1e-5 * a.abs().max(1.0));
        }
    }

    #[test]
    fn deviation_pair_round_trip_scenario() {
        let settings = SpecFileSettings::default();
        let dps = vec![
            (60.0f32, -23.0f32),
            (81.0, -20.6),
            (239.0, -32.0),
            (356.0, -37.0),
            (661.0, -37.0),
            (898.0, -23.5),
            (1332.0, -12.0),
            (1460.0, 0.0),
            (1836.0, 35.0),
            (2223.0, 70.0),
            (2614.0, 201.0),
            (3000.0, 320.0),
        ];
        let corrected = 87.47 + deviation_pair_correction(87.47, &dps);
        assert!((corrected - 65.12).abs() < 0.06, "got {}", corrected);

        let corrected2 = 2413.31 + deviation_pair_correction(2413.31, &dps);
        assert!((corrected2 - 2614.53).abs() < 0.06, "got {}", corrected2);

        let back = corrected - correction_due_to_dev_pairs(corrected, &dps, &settings);
        assert!((back - 87.47).abs() < 0.01, "got {}", back);
    }

    #[test]
    fn find_channel_for_energy_scenarios() {
        let settings = SpecFileSettings::default();
        let coeffs = vec![-1.926107f32, 3020.178, -8.720629];
        for energy in [1121.68f64, 1450.87, 1480.65] {
            let c = find_fullrangefraction_channel(energy, &coeffs, 1024, &[], 0.001, &settings).unwrap();
            let back = frf_energy(c, &coeffs, 1024, &[]);
            assert!((back - energy).abs() < 0.1, "energy {} got back {}", energy, back);
        }
    }

    #[test]
    fn rebin_preserves_total_within_tolerance() {
        let src_edges: Vec<f32> = (0..=100).map(|i| i as f32 * 3.0).collect();
        let src_counts: Vec<f32> = (0..100).map(|i| (i as f32 * 7.0) % 50.0 + 1.0).collect();
        let dst_edges: Vec<f32> = (0..=40).map(|i| i as f32 * 7.5).collect();
        let dst_counts = rebin_by_lower_edge(&src_edges, &src_counts, &dst_edges);
        let total_src: f32 = src_counts.iter().sum();
        let total_dst: f32 = dst_counts.iter().sum();
        let tol = (0.1f32).max(1e-6 * total_src);
        assert!((total_src - total_dst).abs() <= tol, "{} vs {}", total_src, total_dst);
    }

    #[test]
    fn combine_channels_scales_polynomial_and_halves_count() {
        let cal = EnergyCalibration::polynomial(1024, vec![0.0, 3.0], vec![]).unwrap();
        let combined = combine_channels(&cal, 2).unwrap();
        assert_eq!(combined.channel_count(), 512);
        assert!((combined.coefficients()[1] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn lower_channel_edge_rejects_non_monotonic() {
        let err = EnergyCalibration::lower_channel_edge(3, vec![0.0, 5.0, 2.0, 10.0]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCalibration { .. }));
    }
}
