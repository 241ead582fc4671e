//! IAEA SPE: mirrors `gamma-spec-in::iaea_spe`'s `$SECTION:` layout.
use chrono::NaiveDateTime;
use gamma_spec_core::{Measurement, SpecError, SpecFile};

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    Ok(write_measurement(&m).into_bytes())
}

fn write_measurement(m: &Measurement) -> String {
    let mut out = String::new();
    out.push_str("$SPEC_ID:\n");
    out.push_str(m.detector_name());
    out.push('\n');

    out.push_str("$DATE_MEA:\n");
    out.push_str(&format_date(m.start_time()));
    out.push('\n');

    out.push_str("$MEAS_TIM:\n");
    out.push_str(&format!("{} {}\n", m.live_time_s().round() as i64, m.real_time_s().round() as i64));

    let coeffs = m.energy_calibration().coefficients();
    if !coeffs.is_empty() {
        out.push_str("$MCA_CAL:\n");
        out.push_str(&format!("{}\n", coeffs.len()));
        let joined: Vec<String> = coeffs.iter().map(|c| format!("{:e}", c)).collect();
        out.push_str(&joined.join(" "));
        out.push('\n');
    }

    let counts = m.gamma_counts().unwrap_or(&[]);
    out.push_str("$DATA:\n");
    out.push_str(&format!("0 {}\n", counts.len().saturating_sub(1)));
    for c in counts {
        out.push_str(&format!("{}\n", c.round() as i64));
    }

    if m.contained_neutron() {
        out.push_str("$NEUTRONS:\n");
        out.push_str(&format!("{}\n", m.neutron_counts_sum().round() as i64));
    }

    out
}

fn format_date(t: Option<NaiveDateTime>) -> String {
    match t {
        Some(t) => t.format("%m/%d/%Y %H:%M:%S").to_string(),
        None => "01/01/2000 00:00:00".to_string(),
    }
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
        m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::iaea_spe::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), 10.0);
    }
}
