//! ORTEC CHN: a fixed binary header, one spectrum's 32-bit channel counts,
//! and an optional calibration trailer marked by the `-101` sentinel.
use std::sync::Arc;

use chrono::NaiveDate;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::*;

const MUST_BE_MINUS_ONE: i16 = -1;
const TRAILER_MARKER: i16 = -101;

pub fn decode(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;

    let format_id = i16_le(buf, &mut pos).map_err(wrap)?;
    if format_id != MUST_BE_MINUS_ONE {
        return Err(SpecError::ParseError {
            msg: "CHN: missing -1 format marker".to_string(),
        });
    }

    let _detector_number = i16_le(buf, &mut pos).map_err(wrap)?;
    let _segment_number = i16_le(buf, &mut pos).map_err(wrap)?;
    let seconds_ascii = fixed_ascii(buf, &mut pos, 2)?;
    let real_ticks = u32_le(buf, &mut pos).map_err(wrap)?;
    let live_ticks = u32_le(buf, &mut pos).map_err(wrap)?;
    let date_ascii = fixed_ascii(buf, &mut pos, 8)?;
    let time_ascii = fixed_ascii(buf, &mut pos, 4)?;
    let _channel_offset = i32_le(buf, &mut pos).map_err(wrap)?;
    let n_channels = u16_le(buf, &mut pos).map_err(wrap)? as usize;

    if n_channels == 0 || n_channels > gamma_spec_core::calibration::MAX_CHANNELS {
        return Err(SpecError::ParseError {
            msg: format!("CHN: implausible channel count {}", n_channels),
        });
    }

    let mut counts = Vec::with_capacity(n_channels);
    for _ in 0..n_channels {
        counts.push(u32_le(buf, &mut pos).map_err(wrap)? as f32);
    }

    let start_time = parse_start_time(&date_ascii, &time_ascii, &seconds_ascii);

    let mut cal = EnergyCalibration::consolidation_default(n_channels);
    let mut title = String::new();

    if let Ok(marker) = i16_le(buf, &mut pos) {
        if marker == TRAILER_MARKER {
            let _reserved = i16_le(buf, &mut pos).map_err(wrap)?;
            let c0 = f32_le(buf, &mut pos).map_err(wrap)?;
            let c1 = f32_le(buf, &mut pos).map_err(wrap)?;
            let c2 = f32_le(buf, &mut pos).map_err(wrap)?;
            if let Ok(parsed) = EnergyCalibration::polynomial(n_channels, vec![c0, c1, c2], vec![]) {
                if parsed.valid() {
                    cal = parsed;
                }
            }
            // Shape calibration (3 floats) and a peak-area field are present
            // in real CHN trailers but carry no information this model keeps.
            let _ = (f32_le(buf, &mut pos), f32_le(buf, &mut pos), f32_le(buf, &mut pos));
            let _ = f32_le(buf, &mut pos);
            if let Ok(len) = take(buf, &mut pos, 1).map(|b| b[0] as usize) {
                title = fixed_ascii(buf, &mut pos, len).unwrap_or_default();
            }
        }
    }

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_ticks as f64 * 0.02, real_ticks as f64 * 0.02);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);
    if !title.is_empty() {
        m.set_title(title);
    }

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

fn wrap(e: std::array::TryFromSliceError) -> SpecError {
    e.into()
}

fn parse_start_time(date: &str, time: &str, seconds: &str) -> Option<chrono::NaiveDateTime> {
    if date.len() < 7 || time.len() < 4 {
        return None;
    }
    let day: u32 = date.get(0..2)?.parse().ok()?;
    let month = month_number(date.get(2..5)?)?;
    let year_2d: i32 = date.get(5..7)?.parse().ok()?;
    let century = if year_2d < 70 { 2000 } else { 1900 };
    let hour: u32 = time.get(0..2)?.parse().ok()?;
    let minute: u32 = time.get(2..4)?.parse().ok()?;
    let second: u32 = seconds.trim().parse().unwrap_or(0);
    NaiveDate::from_ymd_opt(century + year_2d, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(n_channels: u16, counts: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(-1i16).to_le_bytes());
        out.extend_from_slice(&1i16.to_le_bytes());
        out.extend_from_slice(&1i16.to_le_bytes());
        out.extend_from_slice(b"00");
        out.extend_from_slice(&500u32.to_le_bytes());
        out.extend_from_slice(&480u32.to_le_bytes());
        out.extend_from_slice(b"01JAN22*");
        out.extend_from_slice(b"1200");
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&n_channels.to_le_bytes());
        for c in counts {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&(-101i16).to_le_bytes());
        out.extend_from_slice(&1i16.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        out.extend_from_slice(&3.0f32.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        out.extend_from_slice(&0.0f32.to_le_bytes());
        let title = b"Aa1 spectrum";
        out.push(title.len() as u8);
        out.extend_from_slice(title);
        out
    }

    #[test]
    fn decodes_header_counts_and_calibration_trailer() {
        let counts = [1u32, 2, 3, 4, 5, 6, 7, 8];
        let bytes = sample_bytes(8, &counts);
        let file = decode(&bytes).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 36.0);
        assert!((m.live_time_s() - 9.6).abs() < 1e-6);
        assert!((m.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
        assert_eq!(m.title(), "Aa1 spectrum");
    }

    #[test]
    fn rejects_wrong_format_marker() {
        let mut bytes = sample_bytes(4, &[1, 2, 3, 4]);
        bytes[0] = 2;
        assert!(decode(&bytes).is_err());
    }
}
