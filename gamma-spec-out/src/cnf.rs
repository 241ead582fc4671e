//! Canberra CNF: a binary format carrying one spectrum, a start time, and a
//! polynomial calibration. Mirrors `gamma-spec-in::cnf`'s layout.
use chrono::{Datelike, Timelike};
use gamma_spec_core::{Measurement, SpecError, SpecFile};

use crate::bytes::{write_f32_le, write_f64_le, write_fixed_ascii, write_u32_le};

const MAGIC: &[u8; 4] = b"CNF1";

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_fixed_ascii(&mut out, m.detector_name(), 16);
    write_f64_le(&mut out, m.live_time_s());
    write_f64_le(&mut out, m.real_time_s());

    match m.start_time() {
        Some(t) => {
            out.extend_from_slice(&(t.year() as u16).to_le_bytes());
            out.push(t.month() as u8);
            out.push(t.day() as u8);
            out.push(t.hour() as u8);
            out.push(t.minute() as u8);
            out.push(t.second() as u8);
        }
        None => out.extend_from_slice(&[0u8; 7]),
    }

    let coeffs = m.energy_calibration().coefficients();
    out.push(coeffs.len().min(255) as u8);
    for c in coeffs.iter().take(255) {
        write_f32_le(&mut out, *c);
    }

    let counts = m.gamma_counts().unwrap_or(&[]);
    write_u32_le(&mut out, counts.len() as u32);
    for c in counts {
        write_u32_le(&mut out, c.round().max(0.0) as u32);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamma_spec_core::EnergyCalibration;
    use std::sync::Arc;

    #[test]
    fn encodes_minimal_measurement() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0, 2.0, 3.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(3, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
    }
}
