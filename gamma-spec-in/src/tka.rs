//! TKA: the simplest supported format. Two header lines (live time, real
//! time, in seconds) followed by one integer channel count per line.
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SpecError::ParseError {
        msg: "TKA: input is not valid UTF-8".to_string(),
    })?;

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let live_time_s: f64 = lines
        .next()
        .ok_or_else(|| SpecError::ParseError {
            msg: "TKA: missing live-time line".to_string(),
        })?
        .parse()
        .map_err(|_| SpecError::ParseError {
            msg: "TKA: live-time line is not numeric".to_string(),
        })?;
    let real_time_s: f64 = lines
        .next()
        .ok_or_else(|| SpecError::ParseError {
            msg: "TKA: missing real-time line".to_string(),
        })?
        .parse()
        .map_err(|_| SpecError::ParseError {
            msg: "TKA: real-time line is not numeric".to_string(),
        })?;

    let mut counts = Vec::new();
    for line in lines {
        let c: f32 = line.parse().map_err(|_| SpecError::ParseError {
            msg: format!("TKA: non-numeric channel count '{}'", line),
        })?;
        counts.push(c);
    }
    if counts.len() < 2 {
        return Err(SpecError::ParseError {
            msg: "TKA: too few channels to be a plausible spectrum".to_string(),
        });
    }
    if real_time_s < live_time_s - 1e-6 {
        return Err(SpecError::ParseError {
            msg: "TKA: real time is less than live time".to_string(),
        });
    }

    let n = counts.len();
    let cal = EnergyCalibration::consolidation_default(n);

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(std::sync::Arc::new(cal))?;

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_tka() {
        let text = "10.0\n10.0\n1\n2\n3\n4\n5\n";
        let file = decode(text.as_bytes()).unwrap();
        assert_eq!(file.measurement_count(), 1);
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 15.0);
        assert_eq!(m.live_time_s(), 10.0);
    }

    #[test]
    fn rejects_non_numeric_header() {
        let text = "not-a-number\n10.0\n1\n2\n";
        assert!(decode(text.as_bytes()).is_err());
    }
}
