//! This module contains the [`SpecFileSettings`] structure which tunes the
//! tolerances and worker-sharding thresholds used by the calibration engine
//! and the consolidation pass.
//!
//! This structure does not allow direct manipulation of fields, since several
//! of them must stay within a valid range (e.g. a tolerance must be positive).
//! Therefore using setter and getter functions is generally safer.
use crate::errors::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SpecFileSettings {
    /// Max residual, in keV, accepted by the Newton-like refinement of the
    /// inverse deviation-pair spline before it gives up and returns its best
    /// candidate.
    pub(crate) dev_pair_refinement_tolerance_kev: f64,
    /// Bound on the number of refinement iterations for the inverse
    /// deviation-pair spline.
    pub(crate) dev_pair_max_iterations: usize,
    /// Tolerance, in keV, for the binary-search fallback of `channel_for_energy`.
    pub(crate) channel_for_energy_tolerance_kev: f64,
    /// Levenshtein-distance threshold used when pairing orphan neutron
    /// detectors to gamma detectors by name similarity.
    pub(crate) neutron_pairing_distance_threshold: usize,
    /// Minimum number of records assigned to a single worker when sharding
    /// `sum_measurements` or the rebin-to-common-binning step.
    pub(crate) min_records_per_worker: usize,
    /// Enables the `developer-checks`-feature-gated self-checks (sum
    /// preservation assertions, etc) to additionally log at `trace!` level.
    pub(crate) developer_checks: bool,
}

impl Default for SpecFileSettings {
    /// Creates the default instance: a 0.01 keV / 10-iteration deviation-pair
    /// refinement, a 0.001 keV channel-search tolerance, a Levenshtein
    /// threshold of 3, an 8-record worker-sharding floor, developer checks off.
    fn default() -> Self {
        SpecFileSettings {
            dev_pair_refinement_tolerance_kev: 0.01,
            dev_pair_max_iterations: 10,
            channel_for_energy_tolerance_kev: 0.001,
            neutron_pairing_distance_threshold: 3,
            min_records_per_worker: 8,
            developer_checks: false,
        }
    }
}

impl SpecFileSettings {
    #[cfg(feature = "to_json")]
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(&self).map_err(|e| e.to_string())
    }

    pub fn get_dev_pair_refinement_tolerance_kev(&self) -> f64 {
        self.dev_pair_refinement_tolerance_kev
    }

    /// Sets the residual tolerance, in keV, for the inverse deviation-pair
    /// spline's Newton-like refinement. Must be strictly positive.
    /// ```
    /// use gamma_spec_core::settings::SpecFileSettings;
    ///
    /// let mut settings = SpecFileSettings::default();
    /// assert!(settings.set_dev_pair_refinement_tolerance_kev(0.05).is_ok());
    /// assert_eq!(settings.get_dev_pair_refinement_tolerance_kev(), 0.05);
    ///
    /// let err = settings.set_dev_pair_refinement_tolerance_kev(0.0);
    /// assert!(err.is_err());
    /// ```
    pub fn set_dev_pair_refinement_tolerance_kev(&mut self, tol: f64) -> Result<(), SpecError> {
        if !(tol > 0.0) {
            return Err(SpecError::DomainViolation {
                msg: "Deviation-pair refinement tolerance must be positive".to_string(),
            });
        }
        self.dev_pair_refinement_tolerance_kev = tol;
        Ok(())
    }

    pub fn get_dev_pair_max_iterations(&self) -> usize {
        self.dev_pair_max_iterations
    }

    /// Sets the iteration bound for the inverse deviation-pair spline's
    /// Newton-like refinement. Must be non-zero.
    pub fn set_dev_pair_max_iterations(&mut self, iterations: usize) -> Result<(), SpecError> {
        if iterations == 0 {
            return Err(SpecError::DomainViolation {
                msg: "Deviation-pair max iterations must be non-zero".to_string(),
            });
        }
        self.dev_pair_max_iterations = iterations;
        Ok(())
    }

    pub fn get_channel_for_energy_tolerance_kev(&self) -> f64 {
        self.channel_for_energy_tolerance_kev
    }

    /// Sets the binary-search tolerance, in keV, used by `channel_for_energy`
    /// when an algebraic inversion is not available. Must be strictly positive.
    pub fn set_channel_for_energy_tolerance_kev(&mut self, tol: f64) -> Result<(), SpecError> {
        if !(tol > 0.0) {
            return Err(SpecError::DomainViolation {
                msg: "channel_for_energy tolerance must be positive".to_string(),
            });
        }
        self.channel_for_energy_tolerance_kev = tol;
        Ok(())
    }

    pub fn get_neutron_pairing_distance_threshold(&self) -> usize {
        self.neutron_pairing_distance_threshold
    }

    pub fn set_neutron_pairing_distance_threshold(&mut self, threshold: usize) {
        self.neutron_pairing_distance_threshold = threshold;
    }

    pub fn get_min_records_per_worker(&self) -> usize {
        self.min_records_per_worker
    }

    /// Sets the minimum number of records handed to one worker when sharding
    /// a parallel operation. Must be non-zero.
    pub fn set_min_records_per_worker(&mut self, min: usize) -> Result<(), SpecError> {
        if min == 0 {
            return Err(SpecError::DomainViolation {
                msg: "min_records_per_worker must be non-zero".to_string(),
            });
        }
        self.min_records_per_worker = min;
        Ok(())
    }

    pub fn get_developer_checks(&self) -> bool {
        self.developer_checks
    }

    pub fn set_developer_checks(&mut self, enabled: bool) {
        self.developer_checks = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let s = SpecFileSettings::default();
        assert_eq!(s.get_dev_pair_refinement_tolerance_kev(), 0.01);
        assert_eq!(s.get_dev_pair_max_iterations(), 10);
        assert_eq!(s.get_channel_for_energy_tolerance_kev(), 0.001);
        assert_eq!(s.get_neutron_pairing_distance_threshold(), 3);
        assert_eq!(s.get_min_records_per_worker(), 8);
        assert!(!s.get_developer_checks());
    }

    #[test]
    fn rejects_non_positive_tolerances() {
        let mut s = SpecFileSettings::default();
        assert!(s.set_dev_pair_refinement_tolerance_kev(0.0).is_err());
        assert!(s.set_dev_pair_refinement_tolerance_kev(-1.0).is_err());
        assert!(s.set_channel_for_energy_tolerance_kev(0.0).is_err());
        assert!(s.set_dev_pair_max_iterations(0).is_err());
        assert!(s.set_min_records_per_worker(0).is_err());
    }
}
