//! ASCII SPC: mirrors `gamma-spec-in::spc_ascii`'s line-oriented layout.
use gamma_spec_core::{Measurement, SpecError, SpecFile};

const MAGIC_LINE: &str = "SPCA";

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    Ok(write_measurement(&m).into_bytes())
}

fn write_measurement(m: &Measurement) -> String {
    let mut out = String::new();
    out.push_str(MAGIC_LINE);
    out.push('\n');
    out.push_str(&format!("{} {}\n", m.live_time_s(), m.real_time_s()));

    let coeffs: Vec<String> = m.energy_calibration().coefficients().iter().map(|c| c.to_string()).collect();
    out.push_str(&coeffs.join(" "));
    out.push('\n');

    for c in m.gamma_counts().unwrap_or(&[]) {
        out.push_str(&format!("{}\n", c));
    }
    out
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
        let decoded = gamma_spec_in::spc_ascii::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), 10.0);
    }

    #[test]
    fn rejects_empty_file() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }
}
