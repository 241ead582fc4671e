//! Exploranium GR-130 (v0, 256-channel, no calibration) and GR-135 (v2,
//! 1024-channel, 3rd-order polynomial calibration plus neutrons).
use std::sync::Arc;

use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::*;

const GR130_MAGIC: &[u8; 4] = b"GR30";
const GR130_CHANNELS: usize = 256;

const GR135_MAGIC: &[u8; 4] = b"GR35";
const GR135_CHANNELS: usize = 1024;

pub fn decode_gr130(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;
    if take(buf, &mut pos, 4)? != GR130_MAGIC {
        return Err(SpecError::ParseError {
            msg: "Exploranium GR-130: missing magic header".to_string(),
        });
    }
    let live_time_s = u32_le(buf, &mut pos)? as f64;
    let real_time_s = u32_le(buf, &mut pos)? as f64;

    let mut counts = Vec::with_capacity(GR130_CHANNELS);
    for _ in 0..GR130_CHANNELS {
        counts.push(u16_le(buf, &mut pos)? as f32);
    }

    let cal = EnergyCalibration::consolidation_default(GR130_CHANNELS);
    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.add_remark("energy calibration unavailable in GR-130 records".to_string());

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

pub fn decode_gr135(buf: &[u8]) -> Result<SpecFile, SpecError> {
    let mut pos = 0usize;
    if take(buf, &mut pos, 4)? != GR135_MAGIC {
        return Err(SpecError::ParseError {
            msg: "Exploranium GR-135: missing magic header".to_string(),
        });
    }
    let live_time_s = u32_le(buf, &mut pos)? as f64;
    let real_time_s = u32_le(buf, &mut pos)? as f64;
    let neutron_count = u32_le(buf, &mut pos)? as f32;

    let mut coeffs = Vec::with_capacity(4);
    for _ in 0..4 {
        coeffs.push(f32_le(buf, &mut pos)?);
    }

    let mut counts = Vec::with_capacity(GR135_CHANNELS);
    for _ in 0..GR135_CHANNELS {
        counts.push(u32_le(buf, &mut pos)? as f32);
    }

    let cal = EnergyCalibration::polynomial(GR135_CHANNELS, coeffs, vec![])
        .ok()
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(GR135_CHANNELS));

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_neutron_counts(vec![neutron_count], live_time_s);

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gr130_rejects_bad_magic() {
        assert!(decode_gr130(b"XXXX").is_err());
    }

    #[test]
    fn gr135_rejects_bad_magic() {
        assert!(decode_gr135(b"XXXX").is_err());
    }
}
