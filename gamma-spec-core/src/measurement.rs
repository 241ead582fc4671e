//! One detector's reading at one time interval (C4): counts, times,
//! geometry, metadata, and a shared handle to its energy calibration.
//!
//! A [`Measurement`] holds no back-reference to its owning
//! [`crate::specfile::SpecFile`] — mutators that need to revalidate
//! file-level invariants live on the aggregate instead, which holds the
//! lock and addresses records by index. `Measurement` itself is cheap to
//! `Clone` (its heavy payloads are `Arc`-backed), so query methods on the
//! aggregate can return owned copies instead of borrows tied to a lock
//! guard's lifetime.
use std::sync::Arc;

use crate::calibration::{self, EnergyCalibration};
use crate::enums::{Occupancy, QualityStatus, SourceType};
use crate::errors::*;

/// Sentinel latitude/longitude value meaning "no GPS fix".
pub const NO_GPS: f64 = -999.9;

#[derive(Debug, Clone, Default)]
pub struct Measurement {
    pub(crate) sample_number: i32,
    pub(crate) detector_name: String,
    pub(crate) detector_number: i32,

    pub(crate) live_time_s: f64,
    pub(crate) real_time_s: f64,

    pub(crate) gamma_counts: Option<Arc<Vec<f32>>>,
    pub(crate) energy_calibration: Arc<EnergyCalibration>,
    pub(crate) gamma_count_sum: f64,

    pub(crate) contained_neutron: bool,
    pub(crate) neutron_counts: Vec<f32>,
    pub(crate) neutron_counts_sum: f64,

    pub(crate) source_type: SourceType,
    pub(crate) quality_status: QualityStatus,
    pub(crate) occupancy: Occupancy,

    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    pub(crate) position_time: Option<chrono::NaiveDateTime>,
    pub(crate) speed_mps: f64,

    pub(crate) start_time: Option<chrono::NaiveDateTime>,

    pub(crate) title: String,
    pub(crate) remarks: Vec<String>,
    pub(crate) parse_warnings: Vec<String>,
    pub(crate) detector_description: String,
}

impl Measurement {
    /// An empty record for `detector_name` with no counts and no calibration.
    pub fn new(detector_name: impl Into<String>) -> Self {
        Measurement {
            detector_name: detector_name.into(),
            energy_calibration: Arc::new(EnergyCalibration::invalid()),
            latitude: NO_GPS,
            longitude: NO_GPS,
            ..Default::default()
        }
    }

    pub fn sample_number(&self) -> i32 {
        self.sample_number
    }

    pub(crate) fn set_sample_number(&mut self, n: i32) {
        self.sample_number = n;
    }

    pub fn detector_name(&self) -> &str {
        &self.detector_name
    }

    pub fn detector_number(&self) -> i32 {
        self.detector_number
    }

    pub(crate) fn set_detector_number(&mut self, n: i32) {
        self.detector_number = n;
    }

    pub fn live_time_s(&self) -> f64 {
        self.live_time_s
    }

    pub fn real_time_s(&self) -> f64 {
        self.real_time_s
    }

    pub fn set_times(&mut self, live_time_s: f64, real_time_s: f64) {
        self.live_time_s = live_time_s;
        self.real_time_s = real_time_s;
    }

    pub fn gamma_counts(&self) -> Option<&[f32]> {
        self.gamma_counts.as_deref().map(|v| v.as_slice())
    }

    pub fn gamma_count_sum(&self) -> f64 {
        self.gamma_count_sum
    }

    pub fn energy_calibration(&self) -> &Arc<EnergyCalibration> {
        &self.energy_calibration
    }

    /// Installs a new gamma-counts buffer and recomputes its sum. If the new
    /// length disagrees with the current calibration's channel count (and
    /// the calibration is not `LowerChannelEdge`, which tolerates a
    /// preserved-but-inconsistent channel count during later reconciliation),
    /// the calibration is reset to invalid.
    pub fn set_gamma_counts(&mut self, counts: Vec<f32>, live_time_s: f64, real_time_s: f64) {
        self.gamma_count_sum = counts.iter().map(|c| *c as f64).sum();
        let new_len = counts.len();
        self.gamma_counts = Some(Arc::new(counts));
        self.live_time_s = live_time_s;
        self.real_time_s = real_time_s;

        if self.energy_calibration.valid() && self.energy_calibration.channel_count() != new_len {
            self.energy_calibration = Arc::new(EnergyCalibration::invalid());
        }
    }

    pub fn contained_neutron(&self) -> bool {
        self.contained_neutron
    }

    pub fn neutron_counts(&self) -> &[f32] {
        &self.neutron_counts
    }

    pub fn neutron_counts_sum(&self) -> f64 {
        self.neutron_counts_sum
    }

    /// Installs neutron counts. An empty `counts` clears `contained_neutron`;
    /// any other input (including all-zero counts) sets it, matching the
    /// source's "a detector that reports zero neutrons still reports
    /// neutrons" convention.
    pub fn set_neutron_counts(&mut self, counts: Vec<f32>, live_time_s: f64) {
        self.contained_neutron = !counts.is_empty();
        self.neutron_counts_sum = counts.iter().map(|c| *c as f64).sum();
        self.neutron_counts = counts;
        self.live_time_s = live_time_s;
    }

    /// Rewrites the counts vector onto `new_cal`'s binning via
    /// `rebin_by_lower_edge`, then swaps in `new_cal`. Both the current and
    /// new calibrations must be valid with at least 4 channels.
    pub fn rebin(&mut self, new_cal: Arc<EnergyCalibration>) -> Result<(), SpecError> {
        if !self.energy_calibration.valid() || !new_cal.valid() {
            return Err(SpecError::InvalidCalibration {
                msg: "rebin requires both source and destination calibrations to be valid".to_string(),
            });
        }
        if self.energy_calibration.channel_count() < 4 || new_cal.channel_count() < 4 {
            return Err(SpecError::InvalidCalibration {
                msg: "rebin requires at least 4 channels on both sides".to_string(),
            });
        }
        let Some(counts) = self.gamma_counts.as_ref() else {
            self.energy_calibration = new_cal;
            return Ok(());
        };

        let src_edges = self
            .energy_calibration
            .channel_energies()
            .ok_or_else(|| SpecError::InvalidCalibration {
                msg: "source calibration has no lower-edge energies".to_string(),
            })?;
        let dst_edges = new_cal
            .channel_energies()
            .ok_or_else(|| SpecError::InvalidCalibration {
                msg: "destination calibration has no lower-edge energies".to_string(),
            })?;

        let new_counts = calibration::rebin_by_lower_edge(src_edges, counts, dst_edges);
        self.gamma_count_sum = new_counts.iter().map(|c| *c as f64).sum();
        self.gamma_counts = Some(Arc::new(new_counts));
        self.energy_calibration = new_cal;
        Ok(())
    }

    /// Sums channels in groups of `k`. Requires `N mod k == 0`. Updates the
    /// calibration via [`calibration::combine_channels`]; the count sum is
    /// unchanged.
    pub fn combine_gamma_channels(&mut self, k: usize) -> Result<(), SpecError> {
        if k == 0 {
            return Err(SpecError::DomainViolation {
                msg: "cannot combine zero channels".to_string(),
            });
        }
        let Some(counts) = self.gamma_counts.as_ref() else {
            return Ok(());
        };
        if counts.len() % k != 0 {
            return Err(SpecError::IncompatibleShape {
                expected: counts.len() / k * k,
                got: counts.len(),
            });
        }
        let combined: Vec<f32> = counts.chunks(k).map(|chunk| chunk.iter().sum()).collect();
        let new_cal = calibration::combine_channels(&self.energy_calibration, k)?;
        self.gamma_counts = Some(Arc::new(combined));
        self.energy_calibration = Arc::new(new_cal);
        Ok(())
    }

    /// Rebuilds the counts vector to `[keep_first, keep_last]` inclusive via
    /// [`calibration::truncate_channels`], optionally folding the clipped-off
    /// sums into the new first/last channel, and updates the calibration to
    /// match (shifted polynomial/FRF origin, or a sliced lower-edge vector).
    pub fn truncate_gamma_channels(
        &mut self,
        keep_first: usize,
        keep_last: usize,
        keep_under_over_flow: bool,
    ) -> Result<(), SpecError> {
        let counts = self.gamma_counts.as_ref().ok_or_else(|| SpecError::IncompatibleShape {
            expected: keep_last + 1,
            got: 0,
        })?;
        let (new_cal, new_counts) = calibration::truncate_channels(
            &self.energy_calibration,
            counts,
            keep_first,
            keep_last,
            keep_under_over_flow,
        )?;
        self.gamma_count_sum = new_counts.iter().map(|c| *c as f64).sum();
        self.gamma_counts = Some(Arc::new(new_counts));
        self.energy_calibration = Arc::new(new_cal);
        Ok(())
    }

    /// Relabels the record with `cal` without touching the counts vector.
    /// Requires `cal.channel_count()` to match the counts length (a
    /// `LowerChannelEdge` calibration with `len == N+1` is also accepted).
    pub fn set_energy_calibration(&mut self, cal: Arc<EnergyCalibration>) -> Result<(), SpecError> {
        if let Some(counts) = self.gamma_counts.as_ref() {
            if cal.valid() && cal.channel_count() != counts.len() {
                return Err(SpecError::IncompatibleShape {
                    expected: counts.len(),
                    got: cal.channel_count(),
                });
            }
        }
        self.energy_calibration = cal;
        Ok(())
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn set_source_type(&mut self, t: SourceType) {
        self.source_type = t;
    }

    pub fn quality_status(&self) -> QualityStatus {
        self.quality_status
    }

    pub fn set_quality_status(&mut self, q: QualityStatus) {
        self.quality_status = q;
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn set_occupancy(&mut self, o: Occupancy) {
        self.occupancy = o;
    }

    /// `None` if either coordinate is the `-999.9` sentinel or both are `0.0`.
    pub fn gps(&self) -> Option<(f64, f64)> {
        if (self.latitude == 0.0 && self.longitude == 0.0)
            || self.latitude == NO_GPS
            || self.longitude == NO_GPS
        {
            None
        } else {
            Some((self.latitude, self.longitude))
        }
    }

    pub fn set_gps(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
    }

    pub fn position_time(&self) -> Option<chrono::NaiveDateTime> {
        self.position_time
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    pub fn start_time(&self) -> Option<chrono::NaiveDateTime> {
        self.start_time
    }

    pub fn set_start_time(&mut self, t: Option<chrono::NaiveDateTime>) {
        self.start_time = t;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn remarks(&self) -> &[String] {
        &self.remarks
    }

    pub fn add_remark(&mut self, remark: impl Into<String>) {
        self.remarks.push(remark.into());
    }

    pub fn parse_warnings(&self) -> &[String] {
        &self.parse_warnings
    }

    pub fn add_parse_warning(&mut self, warning: impl Into<String>) {
        let w = warning.into();
        log::warn!("{}: {}", self.detector_name, w);
        self.parse_warnings.push(w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated(n: usize) -> Measurement {
        let mut m = Measurement::new("Aa1");
        let cal = Arc::new(EnergyCalibration::polynomial(n, vec![0.0, 3.0], vec![]).unwrap());
        m.gamma_counts = Some(Arc::new(vec![1.0; n]));
        m.energy_calibration = cal;
        m
    }

    #[test]
    fn set_gamma_counts_invalidates_mismatched_calibration() {
        let mut m = calibrated(16);
        m.set_gamma_counts(vec![1.0; 8], 10.0, 10.0);
        assert!(!m.energy_calibration().valid());
        assert_eq!(m.gamma_count_sum(), 8.0);
    }

    #[test]
    fn set_neutron_counts_tracks_presence_even_for_all_zero() {
        let mut m = Measurement::new("Aa1N");
        m.set_neutron_counts(vec![0.0], 10.0);
        assert!(m.contained_neutron());
        m.set_neutron_counts(vec![], 10.0);
        assert!(!m.contained_neutron());
    }

    #[test]
    fn combine_gamma_channels_requires_divisibility() {
        let mut m = calibrated(10);
        assert!(m.combine_gamma_channels(3).is_err());
        m.combine_gamma_channels(2).unwrap();
        assert_eq!(m.gamma_counts().unwrap().len(), 5);
        assert_eq!(m.energy_calibration().channel_count(), 5);
    }

    #[test]
    fn truncate_gamma_channels_folds_overflow_and_shifts_calibration() {
        let mut m = calibrated(10);
        let sum_before = m.gamma_count_sum();
        m.truncate_gamma_channels(2, 7, true).unwrap();
        assert_eq!(m.gamma_counts().unwrap().len(), 6);
        assert_eq!(m.gamma_count_sum(), sum_before);
        assert_eq!(m.energy_calibration().channel_count(), 6);
        assert!((m.energy_calibration().energy_for_channel(0.0) - 6.0).abs() < 1e-4);
    }

    #[test]
    fn rebin_requires_valid_calibrations_with_enough_channels() {
        let mut m = calibrated(16);
        let tiny = Arc::new(EnergyCalibration::polynomial(2, vec![0.0, 1.0], vec![]).unwrap());
        assert!(m.rebin(tiny).is_err());
    }

    #[test]
    fn gps_sentinel_and_zero_both_mean_unknown() {
        let mut m = Measurement::new("Aa1");
        assert_eq!(m.gps(), None);
        m.set_gps(40.0, -100.0);
        assert_eq!(m.gps(), Some((40.0, -100.0)));
        m.set_gps(0.0, 0.0);
        assert_eq!(m.gps(), None);
    }
}
