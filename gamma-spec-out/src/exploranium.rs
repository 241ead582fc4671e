//! Exploranium GR-130/GR-135: mirrors `gamma-spec-in::exploranium`'s fixed
//! binary layouts.
use gamma_spec_core::{SpecError, SpecFile};

use crate::bytes::{write_f32_le, write_u16_le, write_u32_le};

const GR130_MAGIC: &[u8; 4] = b"GR30";
const GR130_CHANNELS: usize = 256;

const GR135_MAGIC: &[u8; 4] = b"GR35";
const GR135_CHANNELS: usize = 1024;

pub fn encode_gr130(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    let counts = m.gamma_counts().unwrap_or(&[]);
    if counts.len() != GR130_CHANNELS {
        return Err(SpecError::OutputError {
            msg: format!("Exploranium GR-130: requires exactly {} channels, found {}", GR130_CHANNELS, counts.len()),
        });
    }

    let mut out = Vec::new();
    out.extend_from_slice(GR130_MAGIC);
    write_u32_le(&mut out, m.live_time_s().round().max(0.0) as u32);
    write_u32_le(&mut out, m.real_time_s().round().max(0.0) as u32);
    for c in counts {
        write_u16_le(&mut out, c.round().clamp(0.0, u16::MAX as f32) as u16);
    }
    Ok(out)
}

pub fn encode_gr135(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let m = file.sum_measurements(samples, detectors, None)?;
    let counts = m.gamma_counts().unwrap_or(&[]);
    if counts.len() != GR135_CHANNELS {
        return Err(SpecError::OutputError {
            msg: format!("Exploranium GR-135: requires exactly {} channels, found {}", GR135_CHANNELS, counts.len()),
        });
    }

    let mut out = Vec::new();
    out.extend_from_slice(GR135_MAGIC);
    write_u32_le(&mut out, m.live_time_s().round().max(0.0) as u32);
    write_u32_le(&mut out, m.real_time_s().round().max(0.0) as u32);
    write_u32_le(&mut out, m.neutron_counts_sum().round().max(0.0) as u32);

    let coeffs = m.energy_calibration().coefficients();
    for i in 0..4 {
        write_f32_le(&mut out, coeffs.get(i).copied().unwrap_or(0.0));
    }
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
    fn gr130_round_trips() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0; GR130_CHANNELS], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::consolidation_default(GR130_CHANNELS))).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode_gr130(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::exploranium::decode_gr130(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), GR130_CHANNELS as f64);
    }

    #[test]
    fn gr130_rejects_wrong_channel_count() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0; 10], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::consolidation_default(10))).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        assert!(encode_gr130(&file, &[], &[]).is_err());
    }

    #[test]
    fn gr135_round_trips_with_neutrons() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0; GR135_CHANNELS], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(GR135_CHANNELS, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        m.set_neutron_counts(vec![5.0], 10.0);
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode_gr135(&file, &[], &[]).unwrap();
        let decoded = gamma_spec_in::exploranium::decode_gr135(&bytes).unwrap();
        let dm = decoded.measurement(0, "Aa1").unwrap();
        assert_eq!(dm.gamma_count_sum(), GR135_CHANNELS as f64);
        assert_eq!(dm.neutron_counts_sum(), 5.0);
    }
}
