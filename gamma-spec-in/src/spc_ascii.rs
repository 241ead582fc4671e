//! ASCII SPC: a line-oriented text dialect of the same format carried by
//! `spc_binary`, lossy on instrument identity and GPS (the spec calls out
//! this dialect as "similar to binary SPC but lossy on some metadata").
use std::sync::Arc;

use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

const MAGIC_LINE: &str = "SPCA";

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SpecError::ParseError {
        msg: "ASCII SPC: input is not valid UTF-8".to_string(),
    })?;
    let mut lines = text.lines().map(str::trim);

    if lines.next() != Some(MAGIC_LINE) {
        return Err(SpecError::ParseError {
            msg: "ASCII SPC: missing SPCA marker line".to_string(),
        });
    }

    let times_line = lines.next().ok_or_else(|| SpecError::ParseError {
        msg: "ASCII SPC: missing live/real time line".to_string(),
    })?;
    let mut times = times_line.split_whitespace();
    let live_time_s: f64 = times
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SpecError::ParseError {
            msg: "ASCII SPC: bad live time".to_string(),
        })?;
    let real_time_s: f64 = times
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SpecError::ParseError {
            msg: "ASCII SPC: bad real time".to_string(),
        })?;

    let cal_line = lines.next().ok_or_else(|| SpecError::ParseError {
        msg: "ASCII SPC: missing calibration line".to_string(),
    })?;
    let coeffs: Vec<f32> = cal_line
        .split_whitespace()
        .map(|s| s.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| SpecError::ParseError {
            msg: "ASCII SPC: non-numeric calibration coefficient".to_string(),
        })?;

    let mut counts = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let c: f32 = line.parse().map_err(|_| SpecError::ParseError {
            msg: format!("ASCII SPC: non-numeric channel count '{}'", line),
        })?;
        counts.push(c);
    }
    if counts.len() < 2 {
        return Err(SpecError::ParseError {
            msg: "ASCII SPC: too few channels to be a plausible spectrum".to_string(),
        });
    }

    let cal = EnergyCalibration::polynomial(counts.len(), coeffs, vec![])
        .ok()
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(counts.len()));

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_ascii_spc() {
        let text = "SPCA\n10.0 10.0\n0.0 3.0\n1\n2\n3\n4\n";
        let file = decode(text.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 10.0);
    }

    #[test]
    fn rejects_missing_marker() {
        assert!(decode(b"not spc\n10.0 10.0\n0.0 3.0\n1\n2\n").is_err());
    }
}
