//! Binary ORTEC SPC: a fixed header (serial number, GPS, start time,
//! polynomial calibration) followed by one block of `f32` channel counts.
use std::sync::Arc;

use chrono::NaiveDate;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::*;

const MAGIC: &[u8; 4] = b"SPCB";

pub fn decode(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;
    if take(buf, &mut pos, 4)? != MAGIC {
        return Err(SpecError::ParseError {
            msg: "binary SPC: missing magic header".to_string(),
        });
    }

    let serial = fixed_ascii(buf, &mut pos, 16)?;
    let latitude = f64_le(buf, &mut pos)?;
    let longitude = f64_le(buf, &mut pos)?;

    let year = u16_le(buf, &mut pos)? as i32;
    let month = take(buf, &mut pos, 1)?[0] as u32;
    let day = take(buf, &mut pos, 1)?[0] as u32;
    let hour = take(buf, &mut pos, 1)?[0] as u32;
    let minute = take(buf, &mut pos, 1)?[0] as u32;
    let second = take(buf, &mut pos, 1)?[0] as u32;
    let start_time = NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(hour, minute, second));

    let live_time_s = f32_le(buf, &mut pos)? as f64;
    let real_time_s = f32_le(buf, &mut pos)? as f64;

    let n_coeffs = take(buf, &mut pos, 1)?[0] as usize;
    let mut coeffs = Vec::with_capacity(n_coeffs);
    for _ in 0..n_coeffs {
        coeffs.push(f32_le(buf, &mut pos)?);
    }

    let n_channels = u32_le(buf, &mut pos)? as usize;
    if n_channels == 0 || n_channels > gamma_spec_core::calibration::MAX_CHANNELS {
        return Err(SpecError::ParseError {
            msg: format!("binary SPC: implausible channel count {}", n_channels),
        });
    }
    let mut counts = Vec::with_capacity(n_channels);
    for _ in 0..n_channels {
        counts.push(f32_le(buf, &mut pos)?);
    }

    let cal = EnergyCalibration::polynomial(n_channels, coeffs, vec![])
        .ok()
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(n_channels));

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);
    m.set_gps(latitude, longitude);
    if !serial.is_empty() {
        m.add_remark(format!("instrument serial {}", serial));
    }

    // Trailing neutron block, introduced alongside the PCF encoder's
    // convention: a flag byte, then (if set) a total count and its own
    // live time. Absent in files written before neutrons were tracked.
    if let Ok(flag) = take(buf, &mut pos, 1) {
        if flag[0] != 0 {
            let neutron_total = f32_le(buf, &mut pos)?;
            let neutron_live_time_s = f32_le(buf, &mut pos)? as f64;
            m.set_neutron_counts(vec![neutron_total], neutron_live_time_s);
        }
    }

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
