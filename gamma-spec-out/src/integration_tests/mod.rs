//! Cross-crate round-trip checks: write a `SpecFile` with every encoder in
//! this crate and read it back with the matching `gamma-spec-in` decoder,
//! verifying the invariants each format dialect actually preserves.
use std::sync::Arc;

use gamma_spec_core::enums::SourceType;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecFile};

fn sample_file(n_channels: usize) -> SpecFile {
    let file = SpecFile::default();
    let mut m = Measurement::new("Aa1");
    let counts: Vec<f32> = (1..=n_channels).map(|i| i as f32).collect();
    m.set_gamma_counts(counts, 120.0, 125.0);
    m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(n_channels, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
    m.set_neutron_counts(vec![42.0], 120.0);
    m.set_source_type(SourceType::Foreground);
    file.add_measurement(m);
    file.cleanup_after_load(false);
    file
}

#[test]
fn pcf_round_trip_preserves_counts_and_neutrons() {
    let file = sample_file(10);
    let bytes = crate::pcf::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::pcf::decode(&bytes).unwrap();
    let m = decoded.all_measurements().into_iter().next().unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert!(m.contained_neutron());
}

#[test]
fn pcf_round_trip_preserves_lower_channel_edge_calibration() {
    let file = SpecFile::default();
    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0], 10.0, 10.0);
    let edges = vec![0.0f32, 100.0, 200.0, 300.0, 400.0];
    m.set_energy_calibration(Arc::new(EnergyCalibration::lower_channel_edge(4, edges.clone()).unwrap())).unwrap();
    file.add_measurement(m);
    file.cleanup_after_load(false);

    let bytes = crate::pcf::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::pcf::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert_eq!(
        m.energy_calibration().cal_type(),
        gamma_spec_core::enums::EnergyCalType::LowerChannelEdge
    );
    assert_eq!(m.energy_calibration().channel_energies().unwrap().as_slice()[..edges.len()], edges[..]);
}

#[test]
fn chn_round_trip_preserves_counts_and_times() {
    let file = sample_file(8);
    let bytes = crate::chn::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::chn::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert!((m.live_time_s() - 120.0).abs() < 0.02);
}

#[test]
fn cnf_round_trip_preserves_counts() {
    let file = sample_file(6);
    let bytes = crate::cnf::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::cnf::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
}

#[test]
fn spc_binary_round_trip_preserves_gps_and_neutrons() {
    let file = SpecFile::default();
    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0], 10.0, 10.0);
    m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
    m.set_gps(51.5, -0.1);
    m.set_neutron_counts(vec![3.0], 10.0);
    file.add_measurement(m);
    file.cleanup_after_load(false);

    let bytes = crate::spc_binary::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::spc_binary::decode(&bytes).unwrap();
    let dm = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(dm.gps(), Some((51.5, -0.1)));
    assert_eq!(dm.neutron_counts_sum(), 3.0);
}

#[test]
fn spc_ascii_round_trip_preserves_counts() {
    let file = sample_file(5);
    let bytes = crate::spc_ascii::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::spc_ascii::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
}

#[test]
fn iaea_spe_round_trip_preserves_counts_and_neutrons() {
    let file = sample_file(6);
    let bytes = crate::iaea_spe::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::iaea_spe::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert!(m.contained_neutron());
}

#[test]
fn tka_round_trip_preserves_counts() {
    let file = sample_file(7);
    let bytes = crate::tka::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::tka::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
}

#[test]
fn csv_txt_round_trip_preserves_counts() {
    let file = sample_file(5);
    let bytes = crate::csv_txt::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::csv_txt::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
}

#[test]
fn exploranium_gr135_round_trip_preserves_neutrons() {
    let file = SpecFile::default();
    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(vec![2.0; 1024], 10.0, 10.0);
    m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(1024, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
    m.set_neutron_counts(vec![9.0], 10.0);
    file.add_measurement(m);
    file.cleanup_after_load(false);

    let bytes = crate::exploranium::encode_gr135(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::exploranium::decode_gr135(&bytes).unwrap();
    let dm = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(dm.gamma_count_sum(), 2048.0);
    assert_eq!(dm.neutron_counts_sum(), 9.0);
}

#[test]
fn n42_2006_round_trip_preserves_calibration_and_neutrons() {
    let file = sample_file(8);
    let bytes = crate::n42_2006::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::n42_2006::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert!((m.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    assert!(m.contained_neutron());
}

/// N42-2012 is the canonical exchange format; a failure here indicates the
/// writer and reader have drifted out of sync on field names or the
/// `energyCalibrationIDRef` convention.
#[test]
fn n42_2012_round_trip_is_lossless_on_counts_and_calibration() {
    let file = sample_file(12);
    let bytes = crate::n42_2012::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::n42_2012::decode(&bytes).unwrap();
    let m = decoded.measurement(0, "Aa1").unwrap();
    assert_eq!(m.gamma_count_sum(), file.sum_gamma_counts());
    assert_eq!(m.gamma_counts(), file.measurement(0, "Aa1").unwrap().gamma_counts());
    assert!((m.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    assert!(m.contained_neutron());
}

#[cfg(feature = "developer-checks")]
#[test]
fn n42_2012_self_check_across_multiple_detectors_and_calibrations() {
    let file = SpecFile::default();
    for (name, slope) in [("Aa1", 3.0f32), ("Na1", 1.5)] {
        let mut m = Measurement::new(name);
        m.set_gamma_counts(vec![1.0; 16], 60.0, 62.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(16, vec![0.0, slope], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
    }
    file.cleanup_after_load(false);

    let bytes = crate::n42_2012::encode(&file, &[], &[]).unwrap();
    let decoded = gamma_spec_in::n42_2012::decode(&bytes).unwrap();
    for name in ["Aa1", "Na1"] {
        let original = file.measurement(0, name).unwrap();
        let round_tripped = decoded.measurement(0, name).unwrap();
        assert_eq!(original.gamma_counts(), round_tripped.gamma_counts());
        assert_eq!(original.energy_calibration().coefficients(), round_tripped.energy_calibration().coefficients());
    }
}

#[test]
fn html_export_produces_one_record_per_selected_measurement() {
    let file = sample_file(4);
    let json = crate::html::export_json(&file, &[], &[]).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);
}

#[test]
fn encode_by_format_dispatches_to_the_right_encoder() {
    let file = sample_file(8);
    let format = gamma_spec_core::DecoderFormat::Pcf;
    let out = crate::encode_by_format(&file, format, &[], &[]).unwrap();
    assert_eq!(&out[0..4], b"PCF1");
}
