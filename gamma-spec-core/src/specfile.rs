//! The [`SpecFile`] aggregate (C5): a collection of [`Measurement`] records
//! keyed by `(sample, detector)`, per-file metadata, a `DetectorAnalysis`
//! block, and the consolidation pass that reconciles everything a decoder
//! produced into queryable, invariant-respecting state.
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rayon::prelude::*;

use crate::calibration::EnergyCalibration;
use crate::enums::DetectorType;
use crate::errors::*;
use crate::measurement::Measurement;
use crate::settings::SpecFileSettings;

/// Bits of `SpecFile::properties_flags`.
pub mod flags {
    pub const PASSTHROUGH_OR_SEARCH: u16 = 1 << 0;
    pub const HAS_COMMON_BINNING: u16 = 1 << 1;
    pub const REBINNED_TO_COMMON_BINNING: u16 = 1 << 2;
    pub const ALL_SPECTRA_SAME_NUMBER_CHANNELS: u16 = 1 << 3;
    pub const NOT_TIME_SORTED_ORDER: u16 = 1 << 4;
    pub const NOT_SAMPLE_DETECTOR_TIME_SORTED: u16 = 1 << 5;
    pub const NOT_UNIQUE_SAMPLE_DETECTOR_NUMBERS: u16 = 1 << 6;
}

/// One result line of a `DetectorAnalysis` block (isotope ID, dose rate, ...).
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub nuclide: String,
    pub activity: Option<f64>,
    pub dose_rate: Option<f64>,
    pub distance: Option<f64>,
    pub confidence: Option<f64>,
    pub detector_name: String,
    pub real_time_s: Option<f64>,
}

/// Algorithm metadata plus result list, round-tripped opaquely: this crate
/// reads and writes these records but never computes them.
#[derive(Debug, Clone, Default)]
pub struct DetectorAnalysis {
    pub algorithm_name: String,
    pub algorithm_version: String,
    pub results: Vec<AnalysisResult>,
}

#[derive(Default)]
struct SpecFileData {
    measurements: Vec<Measurement>,
    sample_numbers: Vec<i32>,
    sample_to_measurement_indices: HashMap<i32, Vec<usize>>,
    detector_names: Vec<String>,
    detector_numbers: Vec<i32>,
    neutron_detector_names: Vec<String>,

    sum_gamma_live_time_s: f64,
    sum_gamma_real_time_s: f64,
    sum_gamma_counts: f64,
    sum_neutron_counts: f64,

    manufacturer: String,
    model: String,
    instrument_id: String,
    detector_type: DetectorType,
    instrument_type: String,
    uuid: String,
    measurement_location_name: String,
    inspection: String,
    operator: String,
    lane_number: Option<i32>,

    mean_latitude: Option<f64>,
    mean_longitude: Option<f64>,

    properties_flags: u16,
    detector_analysis: Option<DetectorAnalysis>,

    modified: bool,
    modified_since_decode: bool,

    settings: SpecFileSettings,
}

/// A gamma/neutron spectrum file normalized into canonical in-memory form.
///
/// Every public operation takes the re-entrant mutex for its full duration;
/// mutator methods are free to call other mutator methods (the mutex is
/// reentrant for exactly this reason, mirroring the source library's own
/// re-entrant-locking `SpecFile`).
pub struct SpecFile {
    inner: ReentrantMutex<RefCell<SpecFileData>>,
}

impl Default for SpecFile {
    fn default() -> Self {
        Self::new(SpecFileSettings::default())
    }
}

impl SpecFile {
    pub fn new(settings: SpecFileSettings) -> Self {
        SpecFile {
            inner: ReentrantMutex::new(RefCell::new(SpecFileData {
                detector_type: DetectorType::Unknown,
                ..Default::default()
            })),
        }
        .with_settings(settings)
    }

    fn with_settings(self, settings: SpecFileSettings) -> Self {
        self.inner.lock().borrow_mut().settings = settings;
        self
    }

    /// Appends a decoded record. Used by decoders while populating a fresh
    /// `SpecFile`; callers should run [`Self::cleanup_after_load`] once
    /// decoding is finished.
    pub fn add_measurement(&self, measurement: Measurement) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        if measurement.contained_neutron() && !data.neutron_detector_names.contains(&measurement.detector_name().to_string()) {
            data.neutron_detector_names.push(measurement.detector_name().to_string());
        }
        data.measurements.push(measurement);
        data.modified = true;
        data.modified_since_decode = true;
    }

    pub fn measurement_count(&self) -> usize {
        self.inner.lock().borrow().measurements.len()
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.inner.lock().borrow().detector_names.clone()
    }

    pub fn detector_numbers(&self) -> Vec<i32> {
        self.inner.lock().borrow().detector_numbers.clone()
    }

    pub fn neutron_detector_names(&self) -> Vec<String> {
        self.inner.lock().borrow().neutron_detector_names.clone()
    }

    pub fn sample_numbers(&self) -> Vec<i32> {
        self.inner.lock().borrow().sample_numbers.clone()
    }

    /// Every record, in canonical `(sample, detector_number)` order, as
    /// encoders need to walk them.
    pub fn all_measurements(&self) -> Vec<Measurement> {
        let data = self.inner.lock();
        let mut data_ref = data.borrow().measurements.clone();
        data_ref.sort_by_key(|m| (m.sample_number(), m.detector_number()));
        data_ref
    }

    pub fn properties_flags(&self) -> u16 {
        self.inner.lock().borrow().properties_flags
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.properties_flags() & flag != 0
    }

    pub fn sum_gamma_counts(&self) -> f64 {
        self.inner.lock().borrow().sum_gamma_counts
    }

    pub fn sum_neutron_counts(&self) -> f64 {
        self.inner.lock().borrow().sum_neutron_counts
    }

    pub fn uuid(&self) -> String {
        self.inner.lock().borrow().uuid.clone()
    }

    pub fn detector_type(&self) -> DetectorType {
        self.inner.lock().borrow().detector_type
    }

    pub fn set_detector_type(&self, t: DetectorType) {
        self.inner.lock().borrow_mut().detector_type = t;
    }

    pub fn manufacturer(&self) -> String {
        self.inner.lock().borrow().manufacturer.clone()
    }

    pub fn model(&self) -> String {
        self.inner.lock().borrow().model.clone()
    }

    pub fn instrument_id(&self) -> String {
        self.inner.lock().borrow().instrument_id.clone()
    }

    pub fn set_instrument_metadata(&self, manufacturer: impl Into<String>, model: impl Into<String>, instrument_id: impl Into<String>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.manufacturer = manufacturer.into();
        data.model = model.into();
        data.instrument_id = instrument_id.into();
        data.modified = true;
    }

    pub fn instrument_type(&self) -> String {
        self.inner.lock().borrow().instrument_type.clone()
    }

    pub fn set_instrument_type(&self, t: impl Into<String>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.instrument_type = t.into();
        data.modified = true;
    }

    pub fn measurement_location_name(&self) -> String {
        self.inner.lock().borrow().measurement_location_name.clone()
    }

    pub fn set_measurement_location_name(&self, name: impl Into<String>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.measurement_location_name = name.into();
        data.modified = true;
    }

    pub fn inspection(&self) -> String {
        self.inner.lock().borrow().inspection.clone()
    }

    pub fn set_inspection(&self, inspection: impl Into<String>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.inspection = inspection.into();
        data.modified = true;
    }

    pub fn operator(&self) -> String {
        self.inner.lock().borrow().operator.clone()
    }

    pub fn set_operator(&self, operator: impl Into<String>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.operator = operator.into();
        data.modified = true;
    }

    pub fn lane_number(&self) -> Option<i32> {
        self.inner.lock().borrow().lane_number
    }

    pub fn set_lane_number(&self, lane: Option<i32>) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        data.lane_number = lane;
        data.modified = true;
    }

    pub fn uuid_set(&self, uuid: impl Into<String>) {
        self.inner.lock().borrow_mut().uuid = uuid.into();
    }

    pub fn sum_gamma_live_time_s(&self) -> f64 {
        self.inner.lock().borrow().sum_gamma_live_time_s
    }

    pub fn sum_gamma_real_time_s(&self) -> f64 {
        self.inner.lock().borrow().sum_gamma_real_time_s
    }

    pub fn detector_analysis(&self) -> Option<DetectorAnalysis> {
        self.inner.lock().borrow().detector_analysis.clone()
    }

    pub fn set_detector_analysis(&self, analysis: Option<DetectorAnalysis>) {
        self.inner.lock().borrow_mut().detector_analysis = analysis;
    }

    /// Replaces the record at `(sample, detector_name)` with `updated` in
    /// place (used by callers editing one record's metadata/counts without
    /// re-running the whole consolidation pass). Returns `NotFound` if no
    /// such record exists.
    pub fn replace_measurement(&self, sample: i32, detector_name: &str, updated: Measurement) -> Result<(), SpecError> {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        let indices = data
            .sample_to_measurement_indices
            .get(&sample)
            .cloned()
            .ok_or_else(|| SpecError::NotFound {
                msg: format!("no such sample number {}", sample),
            })?;
        let idx = indices
            .into_iter()
            .find(|&i| data.measurements[i].detector_name() == detector_name)
            .ok_or_else(|| SpecError::NotFound {
                msg: format!("no measurement for sample {} detector {}", sample, detector_name),
            })?;
        data.measurements[idx] = updated;
        data.modified = true;
        Ok(())
    }

    pub fn mean_gps(&self) -> Option<(f64, f64)> {
        let data = self.inner.lock();
        let data = data.borrow();
        match (data.mean_latitude, data.mean_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Returns a clone of the measurement at `(sample, detector_name)`.
    pub fn measurement(&self, sample: i32, detector_name: &str) -> Result<Measurement, SpecError> {
        let data = self.inner.lock();
        let data = data.borrow();
        let indices = data.sample_to_measurement_indices.get(&sample).ok_or_else(|| SpecError::NotFound {
            msg: format!("no such sample number {}", sample),
        })?;
        for &idx in indices {
            if data.measurements[idx].detector_name() == detector_name {
                return Ok(data.measurements[idx].clone());
            }
        }
        Err(SpecError::NotFound {
            msg: format!("no measurement for sample {} detector {}", sample, detector_name),
        })
    }

    /// All records for one sample number, in canonical order.
    pub fn sample_measurements(&self, sample: i32) -> Vec<Measurement> {
        let data = self.inner.lock();
        let data = data.borrow();
        data.sample_to_measurement_indices
            .get(&sample)
            .map(|indices| indices.iter().map(|&i| data.measurements[i].clone()).collect())
            .unwrap_or_default()
    }

    /// The calibration belonging to whichever requested record has the most
    /// channels — the conventional choice for a sum's target binning. An
    /// empty `samples` or `detectors` slice means "every sample"/"every
    /// detector", matching the selection convention used throughout the
    /// encoders.
    pub fn suggested_sum_energy_calibration(&self, samples: &[i32], detectors: &[String]) -> Option<Arc<EnergyCalibration>> {
        let data = self.inner.lock();
        let data = data.borrow();
        let det_set: HashSet<&str> = detectors.iter().map(|s| s.as_str()).collect();
        data.measurements
            .iter()
            .filter(|m| matches_selection(m, samples, &det_set))
            .filter(|m| m.energy_calibration().valid())
            .max_by_key(|m| m.energy_calibration().channel_count())
            .map(|m| m.energy_calibration().clone())
    }

    /// Sums the gamma/neutron payloads of the selected records, rebinning
    /// records that disagree with the target calibration. Work is sharded
    /// across a `rayon` pool, `min_records_per_worker`-sized per task.
    pub fn sum_measurements(
        &self,
        samples: &[i32],
        detectors: &[String],
        target_cal: Option<Arc<EnergyCalibration>>,
    ) -> Result<Measurement, SpecError> {
        let target = match target_cal {
            Some(c) => c,
            None => self.suggested_sum_energy_calibration(samples, detectors).ok_or_else(|| {
                SpecError::InvalidCalibration {
                    msg: "no valid calibration available among the requested records".to_string(),
                }
            })?,
        };

        let selected: Vec<Measurement> = {
            let data = self.inner.lock();
            let data = data.borrow();
            let det_set: HashSet<&str> = detectors.iter().map(|s| s.as_str()).collect();
            data.measurements
                .iter()
                .filter(|m| matches_selection(m, samples, &det_set))
                .cloned()
                .collect()
        };
        if selected.is_empty() {
            return Err(SpecError::NotFound {
                msg: "no measurements matched the requested samples/detectors".to_string(),
            });
        }

        let n = target.channel_count();
        let dst_edges = target.channel_energies().cloned();

        let partial = selected
            .par_iter()
            .map(|m| -> Result<PartialSum, SpecError> {
                let mut gamma = vec![0.0f64; n];
                if let Some(counts) = m.gamma_counts() {
                    if m.energy_calibration().as_ref() == target.as_ref() {
                        for (g, c) in gamma.iter_mut().zip(counts.iter()) {
                            *g += *c as f64;
                        }
                    } else if m.energy_calibration().valid() {
                        let src_edges = m.energy_calibration().channel_energies().ok_or_else(|| {
                            SpecError::InvalidCalibration {
                                msg: "record calibration has no lower-edge energies".to_string(),
                            }
                        })?;
                        let dst = dst_edges.as_ref().ok_or_else(|| SpecError::InvalidCalibration {
                            msg: "target calibration has no lower-edge energies".to_string(),
                        })?;
                        let rebinned = crate::calibration::rebin_by_lower_edge(src_edges, counts, dst);
                        for (g, c) in gamma.iter_mut().zip(rebinned.iter()) {
                            *g += *c as f64;
                        }
                    }
                }
                Ok(PartialSum {
                    gamma,
                    neutron_sum: m.neutron_counts_sum(),
                    live_time_s: m.live_time_s(),
                    real_time_s: m.real_time_s(),
                    start_time: m.start_time(),
                    remarks: m.remarks().to_vec(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = PartialSum {
            gamma: vec![0.0; n],
            neutron_sum: 0.0,
            live_time_s: 0.0,
            real_time_s: 0.0,
            start_time: None,
            remarks: vec![],
        };
        for p in partial {
            for (a, b) in total.gamma.iter_mut().zip(p.gamma.iter()) {
                *a += b;
            }
            total.neutron_sum += p.neutron_sum;
            total.live_time_s += p.live_time_s;
            total.real_time_s += p.real_time_s;
            if total.start_time.is_none() || p.start_time < total.start_time {
                if p.start_time.is_some() {
                    total.start_time = p.start_time;
                }
            }
            total.remarks.extend(p.remarks);
        }
        total.remarks.sort();
        total.remarks.dedup();

        let det_names: HashSet<&str> = selected.iter().map(|m| m.detector_name()).collect();
        let name = if det_names.len() > 1 {
            "Summed".to_string()
        } else {
            det_names.into_iter().next().unwrap_or("Summed").to_string()
        };

        let mut out = Measurement::new(name);
        let counts: Vec<f32> = total.gamma.into_iter().map(|c| c as f32).collect();
        out.set_gamma_counts(counts, total.live_time_s, total.real_time_s);
        out.set_energy_calibration(target)?;
        out.set_neutron_counts(vec![total.neutron_sum as f32], total.live_time_s);
        out.set_start_time(total.start_time);
        for r in total.remarks {
            out.add_remark(r);
        }
        Ok(out)
    }

    /// Discards every record whose gamma channel count is not `n_channels`,
    /// sharding the channel-count check across a `rayon` pool the same way
    /// `sum_measurements` shards its rebin/sum work. Returns the number of
    /// records removed.
    pub fn keep_n_bin_spectra_only(&self, n_channels: usize) -> usize {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        let keep: Vec<bool> = data.measurements.par_iter().map(|m| m.energy_calibration().channel_count() == n_channels).collect();
        let before = data.measurements.len();
        let mut kept_iter = keep.into_iter();
        data.measurements.retain(|_| kept_iter.next().unwrap_or(true));
        let removed = before - data.measurements.len();
        if removed > 0 {
            data.modified = true;
            data.properties_flags &= !(flags::HAS_COMMON_BINNING | flags::ALL_SPECTRA_SAME_NUMBER_CHANNELS);
            rebuild_sample_index(&mut data);
            log::debug!("keep_n_bin_spectra_only({}): removed {} of {} records", n_channels, removed, before);
        }
        removed
    }

    /// Runs the full consolidation pass described in the component design:
    /// detector numbering, calibration reconciliation, GPS normalization,
    /// sample-number assignment, neutron/gamma merging, binning-flag
    /// detection, optional rebin-to-common-binning, aggregate sums,
    /// detector-type deduction and UUID generation.
    pub fn cleanup_after_load(&self, rebin_to_common_binning: bool) {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();

        assign_detector_numbers(&mut data);
        reconcile_calibrations(&mut data);
        normalize_gps(&mut data);
        assign_sample_numbers(&mut data);
        merge_orphan_neutrons(&mut data, data.settings.get_neutron_pairing_distance_threshold());
        detect_passthrough_or_search(&mut data);
        detect_common_binning(&mut data);
        if rebin_to_common_binning {
            rebin_all_to_common_binning(&mut data);
        }
        recompute_sums(&mut data);
        deduce_detector_type(&mut data);
        if data.uuid.is_empty() {
            data.uuid = generate_uuid(&data);
        }

        data.modified = false;
        data.modified_since_decode = false;
    }
}

struct PartialSum {
    gamma: Vec<f64>,
    neutron_sum: f64,
    live_time_s: f64,
    real_time_s: f64,
    start_time: Option<chrono::NaiveDateTime>,
    remarks: Vec<String>,
}

/// An empty `samples`/`det_set` means "every sample"/"every detector" — the
/// selection convention shared by `sum_measurements` and the writer crate's
/// own record filter.
fn matches_selection(m: &Measurement, samples: &[i32], det_set: &HashSet<&str>) -> bool {
    (samples.is_empty() || samples.contains(&m.sample_number()))
        && (det_set.is_empty() || det_set.contains(m.detector_name()))
}

fn assign_detector_numbers(data: &mut SpecFileData) {
    let mut names = data.detector_names.clone();
    let mut numbers_by_name: HashMap<String, i32> = names
        .iter()
        .zip(data.detector_numbers.iter())
        .map(|(n, num)| (n.clone(), *num))
        .collect();

    for m in &data.measurements {
        if !numbers_by_name.contains_key(m.detector_name()) {
            let next = numbers_by_name.len() as i32;
            numbers_by_name.insert(m.detector_name().to_string(), next);
            names.push(m.detector_name().to_string());
        }
    }

    for m in data.measurements.iter_mut() {
        let num = numbers_by_name[m.detector_name()];
        m.set_detector_number(num);
    }

    let mut pairs: Vec<(String, i32)> = numbers_by_name.into_iter().collect();
    pairs.sort_by_key(|(_, num)| *num);
    data.detector_names = pairs.iter().map(|(n, _)| n.clone()).collect();
    data.detector_numbers = pairs.iter().map(|(_, num)| *num).collect();
}

fn reconcile_calibrations(data: &mut SpecFileData) {
    let mut by_detector: HashMap<String, Arc<EnergyCalibration>> = HashMap::new();
    for m in &data.measurements {
        if m.gamma_counts().is_some() && m.energy_calibration().valid() {
            by_detector
                .entry(m.detector_name().to_string())
                .or_insert_with(|| m.energy_calibration().clone());
        }
    }

    for m in data.measurements.iter_mut() {
        if m.gamma_counts().is_none() || m.energy_calibration().valid() {
            continue;
        }
        let n = m.gamma_counts().map(|c| c.len()).unwrap_or(0);
        let cal = by_detector
            .get(m.detector_name())
            .cloned()
            .unwrap_or_else(|| Arc::new(EnergyCalibration::consolidation_default(n)));
        let _ = m.set_energy_calibration(cal);
    }
}

fn normalize_gps(data: &mut SpecFileData) {
    let mut lat_sum = 0.0;
    let mut lon_sum = 0.0;
    let mut n = 0usize;
    for m in &data.measurements {
        if let Some((lat, lon)) = m.gps() {
            lat_sum += lat;
            lon_sum += lon;
            n += 1;
        }
    }
    if n > 0 {
        data.mean_latitude = Some(lat_sum / n as f64);
        data.mean_longitude = Some(lon_sum / n as f64);
    }
}

fn assign_sample_numbers(data: &mut SpecFileData) {
    use crate::enums::SourceType;

    let detector_order: HashMap<String, i32> = data
        .detector_names
        .iter()
        .cloned()
        .zip(data.detector_numbers.iter().copied())
        .collect();

    let mut indices: Vec<usize> = (0..data.measurements.len()).collect();
    indices.sort_by(|&a, &b| {
        let ma = &data.measurements[a];
        let mb = &data.measurements[b];
        let key = |m: &Measurement| -> (i8, i64) {
            if m.source_type() == SourceType::IntrinsicActivity {
                (0, 0)
            } else if let Some(t) = m.start_time() {
                (1, t.and_utc().timestamp())
            } else {
                (2, 0)
            }
        };
        key(ma).cmp(&key(mb)).then_with(|| {
            let da = detector_order.get(ma.detector_name()).copied().unwrap_or(0);
            let db = detector_order.get(mb.detector_name()).copied().unwrap_or(0);
            da.cmp(&db)
        })
    });

    let mut sample = -1i32;
    let mut last_bucket_key: Option<(i8, i64)> = None;
    let mut sample_to_indices: HashMap<i32, Vec<usize>> = HashMap::new();

    for &idx in &indices {
        let m = &data.measurements[idx];
        let bucket_key = if m.source_type() == SourceType::IntrinsicActivity {
            (0i8, 0i64)
        } else if let Some(t) = m.start_time() {
            (1, t.and_utc().timestamp())
        } else {
            (2, 0)
        };
        if last_bucket_key != Some(bucket_key) {
            sample += 1;
            last_bucket_key = Some(bucket_key);
        }
        sample_to_indices.entry(sample).or_default().push(idx);
    }

    for (&sample_num, idxs) in &sample_to_indices {
        for &idx in idxs {
            data.measurements[idx].set_sample_number(sample_num);
        }
    }

    data.sample_numbers = {
        let mut v: Vec<i32> = sample_to_indices.keys().copied().collect();
        v.sort_unstable();
        v
    };
    data.sample_to_measurement_indices = sample_to_indices;
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn normalize_neutron_name(name: &str) -> String {
    let mut n = name.to_string();
    for suffix in ["Ntr", "N"] {
        if let Some(stripped) = n.strip_suffix(suffix) {
            n = stripped.to_string();
            break;
        }
    }
    n.replace("Neutron", "Gamma")
}

/// Folds orphan neutron-only records into matching gamma records, trying
/// (in order) identical-count positional pairing, integer-multiple fan-out
/// pairing, and Levenshtein-distance name matching. Aborts (logging a
/// warning, leaving the orphan records untouched) if the Levenshtein
/// assignment is ambiguous.
fn merge_orphan_neutrons(data: &mut SpecFileData, distance_threshold: usize) {
    let gamma_names: Vec<String> = {
        let mut names: Vec<String> = data
            .measurements
            .iter()
            .filter(|m| m.gamma_counts().is_some())
            .map(|m| m.detector_name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    };

    let neutron_only_indices: Vec<usize> = (0..data.measurements.len())
        .filter(|&i| {
            let m = &data.measurements[i];
            m.contained_neutron() && m.gamma_counts().is_none()
        })
        .collect();
    if neutron_only_indices.is_empty() || gamma_names.is_empty() {
        return;
    }

    let neutron_names: Vec<String> = {
        let mut names: Vec<String> = neutron_only_indices
            .iter()
            .map(|&i| data.measurements[i].detector_name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    };

    let mut pairing: HashMap<String, String> = HashMap::new();

    if neutron_names.len() == gamma_names.len() {
        for (n, g) in neutron_names.iter().zip(gamma_names.iter()) {
            pairing.insert(n.clone(), g.clone());
        }
    } else if !gamma_names.is_empty() && neutron_names.len() % gamma_names.len() == 0 {
        let fanout = neutron_names.len() / gamma_names.len();
        for (i, n) in neutron_names.iter().enumerate() {
            pairing.insert(n.clone(), gamma_names[i / fanout].clone());
        }
    } else {
        let mut ok = true;
        for n in &neutron_names {
            let normalized = normalize_neutron_name(n);
            let mut best: Option<(usize, &String)> = None;
            let mut ambiguous = false;
            for g in &gamma_names {
                let d = levenshtein(&normalized, g).min(levenshtein(n, g));
                match best {
                    None => best = Some((d, g)),
                    Some((bd, _)) if d < bd => best = Some((d, g)),
                    Some((bd, _)) if d == bd => ambiguous = true,
                    _ => {}
                }
            }
            match best {
                Some((d, g)) if d <= distance_threshold && !ambiguous => {
                    pairing.insert(n.clone(), g.clone());
                }
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            log::warn!(
                "neutron/gamma detector name pairing is ambiguous; leaving {} orphan neutron record(s) unmerged",
                neutron_only_indices.len()
            );
            return;
        }
    }

    let mut to_remove: Vec<usize> = vec![];
    let mut removed_names: Vec<String> = vec![];
    let mut merged_targets: Vec<String> = vec![];
    for &idx in &neutron_only_indices {
        let sample = data.measurements[idx].sample_number();
        let neutron_counts = data.measurements[idx].neutron_counts().to_vec();
        let live_time = data.measurements[idx].live_time_s();
        let source_name = data.measurements[idx].detector_name().to_string();
        let Some(target_name) = pairing.get(&source_name).cloned() else {
            continue;
        };
        if let Some(target) = data
            .measurements
            .iter_mut()
            .find(|m| m.sample_number() == sample && m.detector_name() == target_name)
        {
            target.set_neutron_counts(neutron_counts, live_time);
            to_remove.push(idx);
            removed_names.push(source_name);
            merged_targets.push(target_name);
        }
    }
    let any_removed = !to_remove.is_empty();
    to_remove.sort_unstable_by(|a, b| b.cmp(a));
    for idx in to_remove {
        data.measurements.remove(idx);
    }
    if any_removed {
        // Indices shifted by removal; rebuild the sample index.
        rebuild_sample_index(data);

        // The merged-away neutron-only names no longer name any record;
        // drop them from detector_names/detector_numbers unless a surviving
        // record still uses the name, and reflect the fold in
        // neutron_detector_names (source dropped, target gained).
        removed_names.sort();
        removed_names.dedup();
        let remaining_names: HashSet<&str> = data.measurements.iter().map(|m| m.detector_name()).collect();
        let drop_names: HashSet<&str> =
            removed_names.iter().map(String::as_str).filter(|n| !remaining_names.contains(n)).collect();

        let pairs: Vec<(String, i32)> = data
            .detector_names
            .iter()
            .cloned()
            .zip(data.detector_numbers.iter().cloned())
            .filter(|(n, _)| !drop_names.contains(n.as_str()))
            .collect();
        data.detector_names = pairs.iter().map(|(n, _)| n.clone()).collect();
        data.detector_numbers = pairs.iter().map(|(_, num)| *num).collect();

        data.neutron_detector_names.retain(|n| !removed_names.contains(n));
        merged_targets.sort();
        merged_targets.dedup();
        for target in merged_targets {
            if !data.neutron_detector_names.contains(&target) {
                data.neutron_detector_names.push(target);
            }
        }
    }
}

fn rebuild_sample_index(data: &mut SpecFileData) {
    let mut index: HashMap<i32, Vec<usize>> = HashMap::new();
    for (i, m) in data.measurements.iter().enumerate() {
        index.entry(m.sample_number()).or_default().push(i);
    }
    data.sample_to_measurement_indices = index;
}

fn detect_passthrough_or_search(data: &mut SpecFileData) {
    if data.sample_numbers.len() < 5 {
        return;
    }
    let gamma: Vec<&Measurement> = data.measurements.iter().filter(|m| m.gamma_counts().is_some()).collect();
    if gamma.is_empty() {
        return;
    }
    let short_real_time = gamma
        .iter()
        .filter(|m| m.real_time_s() > 0.0 && m.real_time_s() <= 15.0)
        .count();
    if short_real_time as f64 / gamma.len() as f64 >= 0.75 {
        data.properties_flags |= flags::PASSTHROUGH_OR_SEARCH;
    }
}

fn detect_common_binning(data: &mut SpecFileData) {
    let gamma: Vec<&Measurement> = data.measurements.iter().filter(|m| m.gamma_counts().is_some()).collect();
    if gamma.is_empty() {
        return;
    }
    let first_cal = gamma[0].energy_calibration();
    if gamma.iter().all(|m| m.energy_calibration().as_ref() == first_cal.as_ref()) {
        data.properties_flags |= flags::HAS_COMMON_BINNING;
    }
    let first_n = gamma[0].gamma_counts().map(|c| c.len()).unwrap_or(0);
    if gamma.iter().all(|m| m.gamma_counts().map(|c| c.len()).unwrap_or(0) == first_n) {
        data.properties_flags |= flags::ALL_SPECTRA_SAME_NUMBER_CHANNELS;
    }
}

fn rebin_all_to_common_binning(data: &mut SpecFileData) {
    if data.properties_flags & flags::HAS_COMMON_BINNING != 0 {
        return;
    }
    let mut lo = f32::MAX;
    let mut hi = f32::MIN;
    let mut max_n = 0usize;
    for m in data.measurements.iter().filter(|m| m.energy_calibration().valid()) {
        if let Some(edges) = m.energy_calibration().channel_energies() {
            if let (Some(&first), Some(&last)) = (edges.first(), edges.last()) {
                lo = lo.min(first);
                hi = hi.max(last);
            }
        }
        max_n = max_n.max(m.energy_calibration().channel_count());
    }
    if max_n == 0 || hi <= lo {
        return;
    }
    let gain = (hi - lo) / max_n as f32;
    let Ok(target) = EnergyCalibration::polynomial(max_n, vec![lo, gain], vec![]) else {
        return;
    };
    let target = Arc::new(target);

    data.measurements
        .par_iter_mut()
        .filter(|m| m.gamma_counts().is_some() && m.energy_calibration().valid())
        .for_each(|m| {
            let _ = m.rebin(target.clone());
        });

    data.properties_flags |= flags::REBINNED_TO_COMMON_BINNING;
    data.properties_flags |= flags::HAS_COMMON_BINNING;
}

fn recompute_sums(data: &mut SpecFileData) {
    data.sum_gamma_live_time_s = 0.0;
    data.sum_gamma_real_time_s = 0.0;
    data.sum_gamma_counts = 0.0;
    data.sum_neutron_counts = 0.0;
    for m in &data.measurements {
        if m.gamma_counts().is_some() {
            data.sum_gamma_live_time_s += m.live_time_s();
            data.sum_gamma_real_time_s += m.real_time_s();
            data.sum_gamma_counts += m.gamma_count_sum();
        }
        data.sum_neutron_counts += m.neutron_counts_sum();
    }
}

fn deduce_detector_type(data: &mut SpecFileData) {
    if data.detector_type != DetectorType::Unknown {
        return;
    }
    let haystack = format!("{} {}", data.manufacturer, data.model).to_lowercase();
    let guesses = [
        ("hpge", DetectorType::HPGe),
        ("labr", DetectorType::LaBr3),
        ("csi", DetectorType::CsI),
        ("czt", DetectorType::CZT),
        ("pvt", DetectorType::PVT),
        ("he-3", DetectorType::HeliumNeutron),
        ("3he", DetectorType::HeliumNeutron),
        ("nai", DetectorType::NaI),
    ];
    for (needle, ty) in guesses {
        if haystack.contains(needle) {
            data.detector_type = ty;
            break;
        }
    }
}

fn generate_uuid(data: &SpecFileData) -> String {
    let mut hasher_a = DefaultHasher::new();
    data.manufacturer.hash(&mut hasher_a);
    data.model.hash(&mut hasher_a);
    data.instrument_id.hash(&mut hasher_a);
    data.detector_names.hash(&mut hasher_a);
    data.measurements.len().hash(&mut hasher_a);
    (data.sum_gamma_counts as u64).hash(&mut hasher_a);
    (data.sum_neutron_counts as u64).hash(&mut hasher_a);
    if let Some(lat) = data.mean_latitude {
        (lat.to_bits()).hash(&mut hasher_a);
    }
    let earliest_start = data
        .measurements
        .iter()
        .filter_map(|m| m.start_time())
        .min();
    earliest_start.map(|t| t.and_utc().timestamp()).hash(&mut hasher_a);
    let high = hasher_a.finish();

    let mut hasher_b = DefaultHasher::new();
    high.hash(&mut hasher_b);
    data.instrument_type.hash(&mut hasher_b);
    let low = hasher_b.finish();

    format_as_uuid_v4(high, low)
}

fn format_as_uuid_v4(high: u64, low: u64) -> String {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&high.to_be_bytes());
    bytes[8..16].copy_from_slice(&low.to_be_bytes());
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::SourceType;

    fn gamma_measurement(name: &str, n: usize) -> Measurement {
        let mut m = Measurement::new(name);
        let cal = Arc::new(EnergyCalibration::polynomial(n, vec![0.0, 3.0], vec![]).unwrap());
        m.set_gamma_counts(vec![1.0; n], 10.0, 10.0);
        let _ = m.set_energy_calibration(cal);
        m
    }

    #[test]
    fn detector_numbers_are_assigned_in_stable_order() {
        let file = SpecFile::default();
        file.add_measurement(gamma_measurement("Ba2", 16));
        file.add_measurement(gamma_measurement("Aa1", 16));
        file.cleanup_after_load(false);
        assert_eq!(file.detector_names(), vec!["Ba2".to_string(), "Aa1".to_string()]);
    }

    #[test]
    fn missing_calibration_falls_back_to_shared_default() {
        let file = SpecFile::default();
        let mut no_cal = Measurement::new("Aa1");
        no_cal.set_gamma_counts(vec![1.0; 16], 10.0, 10.0);
        file.add_measurement(no_cal);
        file.cleanup_after_load(false);
        let m = file.measurement(0, "Aa1").unwrap();
        assert!(m.energy_calibration().valid());
    }

    #[test]
    fn neutron_only_record_merges_by_positional_pairing() {
        let file = SpecFile::default();
        file.add_measurement(gamma_measurement("Aa1", 16));
        let mut neutron = Measurement::new("Aa1N");
        neutron.set_neutron_counts(vec![5.0], 10.0);
        file.add_measurement(neutron);
        file.cleanup_after_load(false);

        assert_eq!(file.measurement_count(), 1);
        let m = file.measurement(0, "Aa1").unwrap();
        assert!(m.contained_neutron());
        assert_eq!(m.neutron_counts_sum(), 5.0);
        assert_eq!(file.neutron_detector_names(), vec!["Aa1".to_string()]);
        assert!(!file.detector_names().contains(&"Aa1N".to_string()));
    }

    #[test]
    fn sum_measurements_conserves_total_counts() {
        let file = SpecFile::default();
        file.add_measurement(gamma_measurement("Aa1", 16));
        let mut second = gamma_measurement("Aa1", 16);
        second.set_source_type(SourceType::Foreground);
        file.add_measurement(second);
        file.cleanup_after_load(false);

        let samples = file.sample_numbers();
        let summed = file
            .sum_measurements(&samples, &["Aa1".to_string()], None)
            .unwrap();
        assert_eq!(summed.gamma_count_sum(), 32.0);
    }

    #[test]
    fn uuid_is_generated_when_absent() {
        let file = SpecFile::default();
        file.add_measurement(gamma_measurement("Aa1", 16));
        file.cleanup_after_load(false);
        assert_eq!(file.uuid().len(), 36);
    }

    #[test]
    fn keep_n_bin_spectra_only_drops_mismatched_records() {
        let file = SpecFile::default();
        file.add_measurement(gamma_measurement("Aa1", 16));
        file.add_measurement(gamma_measurement("Na1", 8));
        file.cleanup_after_load(false);

        let removed = file.keep_n_bin_spectra_only(16);
        assert_eq!(removed, 1);
        assert_eq!(file.measurement_count(), 1);
        assert!(file.measurement(0, "Aa1").is_ok());
    }
}
