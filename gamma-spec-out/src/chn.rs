//! ORTEC CHN: a fixed binary header, one spectrum's 32-bit channel counts,
//! and a calibration trailer marked by the `-101` sentinel. Mirrors
//! `gamma-spec-in::chn`'s layout field-for-field.
use chrono::{Datelike, NaiveDateTime, Timelike};
use gamma_spec_core::enums::EnergyCalType;
use gamma_spec_core::{Measurement, SpecError, SpecFile};

use crate::bytes::{write_f32_le, write_fixed_ascii, write_i16_le, write_u16_le, write_u32_le};

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    Ok(write_measurement(&m))
}

fn write_measurement(m: &Measurement) -> Vec<u8> {
    let mut out = Vec::new();
    write_i16_le(&mut out, -1);
    write_i16_le(&mut out, 1);
    write_i16_le(&mut out, 1);
    write_fixed_ascii(&mut out, "00", 2);

    let real_ticks = (m.real_time_s() / 0.02).round().max(0.0) as u32;
    let live_ticks = (m.live_time_s() / 0.02).round().max(0.0) as u32;
    write_u32_le(&mut out, real_ticks);
    write_u32_le(&mut out, live_ticks);

    let (date_ascii, time_ascii) = format_start_time(m.start_time());
    write_fixed_ascii(&mut out, &date_ascii, 8);
    write_fixed_ascii(&mut out, &time_ascii, 4);

    out.extend_from_slice(&0i32.to_le_bytes()); // channel offset, unused

    let counts = m.gamma_counts().unwrap_or(&[]);
    write_u16_le(&mut out, counts.len() as u16);
    for c in counts {
        write_u32_le(&mut out, c.round().max(0.0) as u32);
    }

    write_i16_le(&mut out, -101);
    write_i16_le(&mut out, 1);

    let coeffs = m.energy_calibration().coefficients();
    let c = |i: usize| -> f32 {
        if m.energy_calibration().cal_type() == EnergyCalType::Polynomial {
            coeffs.get(i).copied().unwrap_or(0.0)
        } else {
            0.0
        }
    };
    write_f32_le(&mut out, c(0));
    write_f32_le(&mut out, c(1));
    write_f32_le(&mut out, c(2));
    for _ in 0..3 {
        write_f32_le(&mut out, 0.0);
    }
    write_f32_le(&mut out, 0.0);

    let title = m.title();
    out.push(title.len().min(255) as u8);
    write_fixed_ascii(&mut out, title, title.len().min(255));

    out
}

fn format_start_time(t: Option<NaiveDateTime>) -> (String, String) {
    match t {
        Some(t) => {
            let year = t.year();
            let year_2d = (year % 100).unsigned_abs();
            let date = format!("{:02}{}{:02}", t.day(), MONTHS[t.month0() as usize], year_2d);
            let time = format!("{:02}{:02}", t.hour(), t.minute());
            (date, time)
        }
        None => ("01JAN00*".to_string(), "0000".to_string()),
    }
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
        m.set_gamma_counts(vec![1.0, 2.0, 3.0, 4.0], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -1);
    }

    #[test]
    fn rejects_empty_file() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }
}
