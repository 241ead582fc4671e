//! N42-2006: writes one `<Measurement>`/`<Spectrum>` pair per selected
//! record, mirroring the field names `gamma-spec-in::n42_2006` reads back.
//! Built as formatted strings rather than through `quick-xml`'s writer,
//! since the schema here is a handful of fixed elements rather than
//! anything requiring escaping beyond `&`/`<`/`>`.
use gamma_spec_core::enums::EnergyCalType;
use gamma_spec_core::{Measurement, SpecError, SpecFile};

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let selected = crate::select(file, samples, detectors);
    if selected.is_empty() {
        return Err(SpecError::OutputError {
            msg: "N42-2006: no measurements matched the requested selection".to_string(),
        });
    }

    let mut out = String::from("<?xml version=\"1.0\"?>\n<N42InstrumentData>\n");
    for m in &selected {
        out.push_str("  <Measurement>\n");
        write_spectrum(&mut out, m);
        out.push_str("  </Measurement>\n");
    }
    out.push_str("</N42InstrumentData>\n");
    Ok(out.into_bytes())
}

fn write_spectrum(out: &mut String, m: &Measurement) {
    let cal = m.energy_calibration();
    let cal_type_name = if cal.cal_type() == EnergyCalType::FullRangeFraction { "FullRangeFraction" } else { "Polynomial" };

    out.push_str(&format!("    <Spectrum id=\"{}\">\n", escape(m.detector_name())));
    if let Some(t) = m.start_time() {
        out.push_str(&format!("      <StartTime>{}</StartTime>\n", t.format("%Y-%m-%dT%H:%M:%S")));
    }
    out.push_str(&format!("      <LiveTime>PT{}S</LiveTime>\n", m.live_time_s()));
    out.push_str(&format!("      <RealTime>PT{}S</RealTime>\n", m.real_time_s()));
    out.push_str(&format!("      <Calibration type=\"{}\"><Equation><Coefficients>", cal_type_name));
    let coeffs: Vec<String> = cal.coefficients().iter().map(|c| c.to_string()).collect();
    out.push_str(&coeffs.join(" "));
    out.push_str("</Coefficients></Equation></Calibration>\n");
    if m.contained_neutron() {
        out.push_str(&format!("      <Neutrons>{}</Neutrons>\n", m.neutron_counts_sum()));
    }
    out.push_str("      <ChannelData>");
    let counts: Vec<String> = m.gamma_counts().unwrap_or(&[]).iter().map(|c| c.to_string()).collect();
    out.push_str(&counts.join(" "));
    out.push_str("</ChannelData>\n");
    out.push_str("    </Spectrum>\n");
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamma_spec_core::EnergyCalibration;
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
        let decoded = gamma_spec_in::n42_2006::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), 36.0);
        assert!((dm.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_empty_selection() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }
}
