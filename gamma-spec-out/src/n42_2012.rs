//! N42-2012: writes one `<RadMeasurement>`/`<Spectrum>` pair per selected
//! record, sharing `<EnergyCalibration id="...">` blocks across records that
//! carry the same `Arc`-identical calibration (the `_intercal_<id>`
//! convention `gamma-spec-in::n42_2012` reads back). `<AnalysisResults>` is
//! emitted from [`gamma_spec_core::SpecFile::detector_analysis`] when set.
use std::collections::HashMap;

use gamma_spec_core::enums::EnergyCalType;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let selected = crate::select(file, samples, detectors);
    if selected.is_empty() {
        return Err(SpecError::OutputError {
            msg: "N42-2012: no measurements matched the requested selection".to_string(),
        });
    }

    let mut cal_ids: HashMap<usize, String> = HashMap::new();
    let mut cal_order: Vec<(String, std::sync::Arc<EnergyCalibration>)> = Vec::new();
    for m in &selected {
        let cal = m.energy_calibration().clone();
        let key = std::sync::Arc::as_ptr(&cal) as usize;
        cal_ids.entry(key).or_insert_with(|| {
            let id = format!("escal_intercal_{}", cal_order.len());
            cal_order.push((id.clone(), cal.clone()));
            id
        });
    }

    let mut out = String::from("<?xml version=\"1.0\"?>\n<RadInstrumentData>\n");
    for (id, cal) in &cal_order {
        write_calibration(&mut out, id, cal);
    }
    for m in &selected {
        let key = std::sync::Arc::as_ptr(m.energy_calibration()) as usize;
        let cal_id = cal_ids.get(&key).expect("every selected measurement registered a calibration id");
        write_measurement(&mut out, m, cal_id);
    }
    if let Some(analysis) = file.detector_analysis() {
        write_analysis(&mut out, &analysis);
    }
    out.push_str("</RadInstrumentData>\n");
    Ok(out.into_bytes())
}

fn write_calibration(out: &mut String, id: &str, cal: &EnergyCalibration) {
    let cal_type_name = if cal.cal_type() == EnergyCalType::FullRangeFraction { "FullRangeFraction" } else { "Polynomial" };
    out.push_str(&format!("  <EnergyCalibration id=\"{}\" type=\"{}\">\n", id, cal_type_name));
    out.push_str("    <CoefficientValues>");
    let coeffs: Vec<String> = cal.coefficients().iter().map(|c| c.to_string()).collect();
    out.push_str(&coeffs.join(" "));
    out.push_str("</CoefficientValues>\n  </EnergyCalibration>\n");
}

fn write_measurement(out: &mut String, m: &Measurement, cal_id: &str) {
    out.push_str(&format!("  <RadMeasurement id=\"RM{}\">\n", m.sample_number()));
    if let Some(t) = m.start_time() {
        out.push_str(&format!("    <StartDateTime>{}</StartDateTime>\n", t.format("%Y-%m-%dT%H:%M:%S")));
    }
    out.push_str(&format!("    <LiveTimeDuration>PT{}S</LiveTimeDuration>\n", m.live_time_s()));
    out.push_str(&format!("    <RealTimeDuration>PT{}S</RealTimeDuration>\n", m.real_time_s()));
    out.push_str(&format!("    <Spectrum id=\"{}\" energyCalibrationIDRef=\"{}\">\n", escape(m.detector_name()), cal_id));
    if m.contained_neutron() {
        out.push_str(&format!("      <NeutronCounts>{}</NeutronCounts>\n", m.neutron_counts_sum()));
    }
    out.push_str("      <ChannelData>");
    let counts: Vec<String> = m.gamma_counts().unwrap_or(&[]).iter().map(|c| c.to_string()).collect();
    out.push_str(&counts.join(" "));
    out.push_str("</ChannelData>\n    </Spectrum>\n  </RadMeasurement>\n");
}

fn write_analysis(out: &mut String, analysis: &gamma_spec_core::specfile::DetectorAnalysis) {
    out.push_str("  <AnalysisResults>\n    <NuclideAnalysisResults>\n");
    for r in &analysis.results {
        out.push_str("      <Nuclide>\n");
        out.push_str(&format!("        <NuclideName>{}</NuclideName>\n", escape(&r.nuclide)));
        if let Some(a) = r.activity {
            out.push_str(&format!("        <NuclideActivityValue>{}</NuclideActivityValue>\n", a));
        }
        if let Some(d) = r.dose_rate {
            out.push_str(&format!("        <NuclideDoseRateValue>{}</NuclideDoseRateValue>\n", d));
        }
        out.push_str("      </Nuclide>\n");
    }
    out.push_str("    </NuclideAnalysisResults>\n  </AnalysisResults>\n");
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn encodes_and_round_trips() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(8, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::n42_2012::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), 36.0);
        assert!((dm.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn shares_calibration_block_across_same_calibration() {
        let file = SpecFile::default();
        let cal = Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap());
        let mut m1 = Measurement::new("Aa1");
        m1.set_gamma_counts(vec![1.0; 4], 10.0, 10.0);
        m1.set_energy_calibration(cal.clone()).unwrap();
        let mut m2 = Measurement::new("Na1");
        m2.set_gamma_counts(vec![1.0; 4], 10.0, 10.0);
        m2.set_energy_calibration(cal).unwrap();
        file.add_measurement(m1);
        file.add_measurement(m2);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches("<EnergyCalibration").count(), 1);
    }

    #[test]
    fn rejects_empty_selection() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }
}
