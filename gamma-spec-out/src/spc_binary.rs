//! Binary ORTEC SPC: mirrors `gamma-spec-in::spc_binary`'s header layout
//! field-for-field, including the trailing neutron block.
use chrono::{Datelike, Timelike};
use gamma_spec_core::{Measurement, SpecError, SpecFile};

use crate::bytes::{write_f32_le, write_f64_le, write_fixed_ascii, write_u16_le, write_u32_le};

const MAGIC: &[u8; 4] = b"SPCB";

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    Ok(write_measurement(&m))
}

fn write_measurement(m: &Measurement) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    let serial = m.remarks().iter().find_map(|r| r.strip_prefix("instrument serial ")).unwrap_or("");
    write_fixed_ascii(&mut out, serial, 16);

    let (lat, lon) = m.gps().unwrap_or((0.0, 0.0));
    write_f64_le(&mut out, lat);
    write_f64_le(&mut out, lon);

    match m.start_time() {
        Some(t) => {
            write_u16_le(&mut out, t.year() as u16);
            out.push(t.month() as u8);
            out.push(t.day() as u8);
            out.push(t.hour() as u8);
            out.push(t.minute() as u8);
            out.push(t.second() as u8);
        }
        None => out.extend_from_slice(&[0u8; 6]),
    }

    write_f32_le(&mut out, m.live_time_s() as f32);
    write_f32_le(&mut out, m.real_time_s() as f32);

    let coeffs = m.energy_calibration().coefficients();
    out.push(coeffs.len().min(255) as u8);
    for c in coeffs.iter().take(255) {
        write_f32_le(&mut out, *c);
    }

    let counts = m.gamma_counts().unwrap_or(&[]);
    write_u32_le(&mut out, counts.len() as u32);
    for c in counts {
        write_f32_le(&mut out, *c);
    }

    if m.contained_neutron() {
        out.push(1);
        write_f32_le(&mut out, m.neutron_counts_sum() as f32);
        write_f32_le(&mut out, m.live_time_s() as f32);
    } else {
        out.push(0);
    }

    out
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

    #[test]
    fn round_trips_neutron_flag_through_decoder() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        m.set_neutron_counts(vec![7.0], 10.0);
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::spc_binary::decode(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert!(dm.contained_neutron());
        assert_eq!(dm.neutron_counts_sum(), 7.0);
    }
}
