//! PCF: GADRAS's binary format. Detector names follow the `Aa1, Ab1, …`
//! grid; deviation pairs are shared via a header table instead of being
//! repeated per record; channel counts are rounded up to a multiple of 64.
//! When the source calibration is `LowerChannelEdge`, a synthetic `"Energy"`
//! record precedes the real detector record and carries the edges in its
//! counts slot (mirrored exactly by `gamma-spec-out::pcf`).
use std::sync::Arc;

use gamma_spec_core::enums::SourceType;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::*;

const MAGIC: &[u8; 4] = b"PCF1";
const CAL_POLYNOMIAL: u8 = 0;
const CAL_FRF: u8 = 1;
const CAL_LOWER_EDGE: u8 = 2;

pub fn decode(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;
    if take(buf, &mut pos, 4)? != MAGIC {
        return Err(SpecError::ParseError {
            msg: "PCF: missing magic header".to_string(),
        });
    }

    let n_records = u16_le(buf, &mut pos)? as usize;
    let n_dev_groups = u16_le(buf, &mut pos)? as usize;
    let mut dev_groups: Vec<Vec<(f32, f32)>> = Vec::with_capacity(n_dev_groups);
    for _ in 0..n_dev_groups {
        let count = u16_le(buf, &mut pos)? as usize;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            pairs.push((f32_le(buf, &mut pos)?, f32_le(buf, &mut pos)?));
        }
        dev_groups.push(pairs);
    }

    let file = SpecFile::default();
    let mut pending_edges: Option<Vec<f32>> = None;

    for _ in 0..n_records {
        let name_len = u16_le(buf, &mut pos)? as usize;
        let name = fixed_ascii(buf, &mut pos, name_len)?;
        let source_type = SourceType::new(take(buf, &mut pos, 1)?[0]).unwrap_or(SourceType::Unknown);
        let live_time_s = f32_le(buf, &mut pos)? as f64;
        let real_time_s = f32_le(buf, &mut pos)? as f64;
        let cal_type = take(buf, &mut pos, 1)?[0];
        let num_coeffs = take(buf, &mut pos, 1)?[0] as usize;
        let mut coeffs = Vec::with_capacity(num_coeffs);
        for _ in 0..num_coeffs {
            coeffs.push(f32_le(buf, &mut pos)?);
        }
        let dev_group_index = {
            let raw = i16_le(buf, &mut pos)?;
            if raw < 0 {
                None
            } else {
                dev_groups.get(raw as usize).cloned()
            }
        };
        let n_channels = u16_le(buf, &mut pos)? as usize;
        let mut values = Vec::with_capacity(n_channels);
        for _ in 0..n_channels {
            values.push(f32_le(buf, &mut pos)?);
        }

        if cal_type == CAL_LOWER_EDGE && name == "Energy" {
            pending_edges = Some(values);
            let _ = take(buf, &mut pos, 1)?; // synthetic Energy record's neutron-flag byte, always 0
            continue;
        }

        let cal = match cal_type {
            CAL_POLYNOMIAL => EnergyCalibration::polynomial(n_channels, coeffs, dev_group_index.unwrap_or_default()),
            CAL_FRF => EnergyCalibration::full_range_fraction(n_channels, coeffs, dev_group_index.unwrap_or_default()),
            CAL_LOWER_EDGE => {
                let edges = pending_edges.take().ok_or_else(|| SpecError::ParseError {
                    msg: "PCF: LowerChannelEdge record without a preceding Energy record".to_string(),
                })?;
                EnergyCalibration::lower_channel_edge(n_channels, edges)
            }
            other => {
                return Err(SpecError::ParseError {
                    msg: format!("PCF: unknown calibration type tag {}", other),
                })
            }
        }?;

        let has_neutron = take(buf, &mut pos, 1)?[0] != 0;

        let mut m = Measurement::new(name);
        m.set_gamma_counts(values, live_time_s, real_time_s);
        m.set_energy_calibration(Arc::new(cal))?;
        m.set_source_type(source_type);
        if has_neutron {
            let count = f32_le(buf, &mut pos)?;
            let neutron_live = f32_le(buf, &mut pos)? as f64;
            m.set_neutron_counts(vec![count], neutron_live);
        }
        file.add_measurement(m);
    }

    file.cleanup_after_load(false);
    if file.measurement_count() == 0 {
        return Err(SpecError::ParseError {
            msg: "PCF: file contained no spectrum records".to_string(),
        });
    }
    Ok(file)
}

/// Rounds a channel count up to the next multiple of 64, PCF's fixed grid.
pub fn round_up_to_64(n: usize) -> usize {
    (n + 63) / 64 * 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        assert!(decode(b"XXXX").is_err());
    }

    #[test]
    fn round_up_to_64_rounds_correctly() {
        assert_eq!(round_up_to_64(1), 64);
        assert_eq!(round_up_to_64(64), 64);
        assert_eq!(round_up_to_64(65), 128);
    }
}
