//! CSV/TXT: writes the two-column `energy,counts` dialect that
//! `gamma-spec-in::csv_txt` recognises, one measurement per selected record
//! separated by a blank line.
use gamma_spec_core::{Measurement, SpecError, SpecFile};

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let selected = crate::select(file, samples, detectors);
    if selected.is_empty() {
        return Err(SpecError::OutputError {
            msg: "CSV/TXT: no measurements matched the requested selection".to_string(),
        });
    }

    let mut out = String::new();
    for (i, m) in selected.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("# {}\n", m.detector_name()));
        write_measurement(&mut out, m);
    }
    Ok(out.into_bytes())
}

fn write_measurement(out: &mut String, m: &Measurement) {
    let counts = m.gamma_counts().unwrap_or(&[]);
    let cal = m.energy_calibration();
    for (i, c) in counts.iter().enumerate() {
        let energy = cal.energy_for_channel(i as f64);
        out.push_str(&format!("{},{}\n", energy, c));
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
        m.set_gamma_counts(vec![10.0, 20.0, 30.0, 40.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::csv_txt::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), 100.0);
    }

    #[test]
    fn rejects_empty_selection() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }
}
