//! PCF: GADRAS's binary format. Mirrors `gamma-spec-in::pcf` exactly —
//! detector names in the `Aa1, Ab1, …` grid, deviation pairs shared via a
//! header table, channel counts rounded up to a multiple of 64. Records
//! whose calibration is `LowerChannelEdge` are preceded by a synthetic
//! `"Energy"` record carrying the edges, read back by the decoder's
//! `pending_edges` convention.
use gamma_spec_core::enums::{EnergyCalType, SourceType};
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::bytes::{write_f32_le, write_fixed_ascii, write_i16_le, write_u16_le};

const MAGIC: &[u8; 4] = b"PCF1";
const CAL_POLYNOMIAL: u8 = 0;
const CAL_FRF: u8 = 1;
const CAL_LOWER_EDGE: u8 = 2;

/// Rounds a channel count up to the next multiple of 64, PCF's fixed grid.
fn round_up_to_64(n: usize) -> usize {
    (n + 63) / 64 * 64
}

fn pad_counts(counts: &[f32]) -> Vec<f32> {
    let mut out = counts.to_vec();
    out.resize(round_up_to_64(counts.len()), 0.0);
    out
}

/// Extends a lower-edge table to match a padded channel count by repeating
/// the width of the final real bin.
fn pad_edges(edges: &[f32], target_channels: usize) -> Vec<f32> {
    let mut out = edges.to_vec();
    if out.len() < 2 {
        out.resize(target_channels + 1, 0.0);
        return out;
    }
    let last_width = out[out.len() - 1] - out[out.len() - 2];
    while out.len() < target_channels + 1 {
        let next = out[out.len() - 1] + last_width;
        out.push(next);
    }
    out
}

pub fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let selected = crate::select(file, samples, detectors);
    if selected.is_empty() {
        return Err(SpecError::OutputError {
            msg: "PCF: no measurements matched the requested selection".to_string(),
        });
    }

    let mut dev_groups: Vec<Vec<(f32, f32)>> = Vec::new();
    let mut dev_index_of = |pairs: &[(f32, f32)]| -> Option<i16> {
        if pairs.is_empty() {
            return None;
        }
        if let Some(pos) = dev_groups.iter().position(|g| g.as_slice() == pairs) {
            return Some(pos as i16);
        }
        dev_groups.push(pairs.to_vec());
        Some((dev_groups.len() - 1) as i16)
    };

    // Deviation-pair indices have to be assigned before any record bytes are
    // written, since the header table with PCF's groups precedes the records.
    let mut indices: Vec<Option<i16>> = Vec::with_capacity(selected.len());
    for m in &selected {
        indices.push(dev_index_of(m.energy_calibration().deviation_pairs()));
    }

    let n_energy_records = selected
        .iter()
        .filter(|m| m.energy_calibration().cal_type() == EnergyCalType::LowerChannelEdge)
        .count();

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u16_le(&mut out, (selected.len() + n_energy_records) as u16);
    write_u16_le(&mut out, dev_groups.len() as u16);
    for group in &dev_groups {
        write_u16_le(&mut out, group.len() as u16);
        for (e, off) in group {
            write_f32_le(&mut out, *e);
            write_f32_le(&mut out, *off);
        }
    }

    for (m, dev_index) in selected.iter().zip(indices.iter()) {
        write_record(&mut out, m, *dev_index)?;
    }

    Ok(out)
}

fn write_record(out: &mut Vec<u8>, m: &Measurement, dev_index: Option<i16>) -> Result<(), SpecError> {
    let cal = m.energy_calibration();
    let counts = m.gamma_counts().unwrap_or(&[]);

    if cal.cal_type() == EnergyCalType::LowerChannelEdge {
        let edges = cal
            .channel_energies()
            .map(|e| e.as_slice().to_vec())
            .unwrap_or_default();
        let padded_channels = round_up_to_64(counts.len());
        let padded_edges = pad_edges(&edges, padded_channels);
        write_header(out, "Energy", SourceType::Unknown, 0.0, 0.0, CAL_LOWER_EDGE, &[], None);
        write_u16_le(out, padded_edges.len() as u16);
        for v in &padded_edges {
            write_f32_le(out, *v);
        }
        out.push(0); // no neutron data in the synthetic energy record
    }

    let (cal_type, coeffs) = match cal.cal_type() {
        EnergyCalType::FullRangeFraction => (CAL_FRF, cal.coefficients().to_vec()),
        EnergyCalType::LowerChannelEdge => (CAL_LOWER_EDGE, Vec::new()),
        _ => (CAL_POLYNOMIAL, cal.coefficients().to_vec()),
    };

    write_header(
        out,
        m.detector_name(),
        m.source_type(),
        m.live_time_s(),
        m.real_time_s(),
        cal_type,
        &coeffs,
        dev_index,
    );

    let padded = pad_counts(counts);
    write_u16_le(out, padded.len() as u16);
    for v in &padded {
        write_f32_le(out, *v);
    }

    if m.contained_neutron() {
        out.push(1);
        write_f32_le(out, m.neutron_counts_sum() as f32);
        write_f32_le(out, m.live_time_s() as f32);
    } else {
        out.push(0);
    }

    Ok(())
}

fn write_header(
    out: &mut Vec<u8>,
    name: &str,
    source_type: SourceType,
    live_time_s: f64,
    real_time_s: f64,
    cal_type: u8,
    coeffs: &[f32],
    dev_index: Option<i16>,
) {
    write_u16_le(out, name.len() as u16);
    write_fixed_ascii(out, name, name.len());
    out.push(source_type as u8);
    write_f32_le(out, live_time_s as f32);
    write_f32_le(out, real_time_s as f32);
    out.push(cal_type);
    out.push(coeffs.len() as u8);
    for c in coeffs {
        write_f32_le(out, *c);
    }
    write_i16_le(out, dev_index.unwrap_or(-1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn encodes_minimal_selection() {
        let file = SpecFile::default();
        let mut m = Measurement::new("Aa1");
        m.set_gamma_counts(vec![1.0; 10], 10.0, 10.0);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(10, vec![0.0, 3.0], vec![]).unwrap())).unwrap();
        file.add_measurement(m);
        file.cleanup_after_load(false);

        let bytes = encode(&file, &[], &[]).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
    }

    #[test]
    fn rejects_empty_selection() {
        let file = SpecFile::default();
        assert!(encode(&file, &[], &[]).is_err());
    }

    #[test]
    fn round_up_to_64_matches_decoder_convention() {
        assert_eq!(round_up_to_64(1), 64);
        assert_eq!(round_up_to_64(64), 64);
        assert_eq!(round_up_to_64(65), 128);
    }
}
