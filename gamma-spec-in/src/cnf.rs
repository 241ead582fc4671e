//! Canberra CNF: a binary format carrying one spectrum, a start time, and a
//! polynomial calibration.
use std::sync::Arc;

use chrono::NaiveDate;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::*;

const MAGIC: &[u8; 4] = b"CNF1";

pub fn decode(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;
    if take(buf, &mut pos, 4)? != MAGIC {
        return Err(SpecError::ParseError {
            msg: "CNF: missing magic header".to_string(),
        });
    }

    let det_name = fixed_ascii(buf, &mut pos, 16)?;
    let live_time_s = f64_le(buf, &mut pos)?;
    let real_time_s = f64_le(buf, &mut pos)?;

    let year = u16_le(buf, &mut pos)? as i32;
    let month = take(buf, &mut pos, 1)?[0] as u32;
    let day = take(buf, &mut pos, 1)?[0] as u32;
    let hour = take(buf, &mut pos, 1)?[0] as u32;
    let minute = take(buf, &mut pos, 1)?[0] as u32;
    let second = take(buf, &mut pos, 1)?[0] as u32;
    let start_time = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second));

    let n_coeffs = take(buf, &mut pos, 1)?[0] as usize;
    let mut coeffs = Vec::with_capacity(n_coeffs);
    for _ in 0..n_coeffs {
        coeffs.push(f32_le(buf, &mut pos)?);
    }

    let n_channels = u32_le(buf, &mut pos)? as usize;
    if n_channels == 0 || n_channels > gamma_spec_core::calibration::MAX_CHANNELS {
        return Err(SpecError::ParseError {
            msg: format!("CNF: implausible channel count {}", n_channels),
        });
    }
    let mut counts = Vec::with_capacity(n_channels);
    for _ in 0..n_channels {
        counts.push(u32_le(buf, &mut pos)? as f32);
    }

    let cal = EnergyCalibration::polynomial(n_channels, coeffs, vec![])
        .ok()
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(n_channels));

    let mut m = Measurement::new(if det_name.is_empty() { "Aa1".to_string() } else { det_name });
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        assert!(decode(b"XXXX").is_err());
    }
}
