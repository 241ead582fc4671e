//! IAEA SPE: a text format of `$SECTION_NAME:` headers, each followed by a
//! fixed body, terminated by the next `$` line or end of file.
use std::sync::Arc;

use chrono::NaiveDateTime;
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SpecError::ParseError {
        msg: "IAEA SPE: input is not valid UTF-8".to_string(),
    })?;

    let sections = split_sections(text);
    if !sections.contains_key("SPEC_ID") && !sections.contains_key("DATA") {
        return Err(SpecError::ParseError {
            msg: "IAEA SPE: no recognisable $SPEC_ID/$DATA sections".to_string(),
        });
    }

    let data_lines = sections.get("DATA").ok_or_else(|| SpecError::ParseError {
        msg: "IAEA SPE: missing $DATA section".to_string(),
    })?;
    let mut data_lines_iter = data_lines.iter();
    let range_line = data_lines_iter.next().ok_or_else(|| SpecError::ParseError {
        msg: "IAEA SPE: $DATA section is empty".to_string(),
    })?;
    let mut range = range_line.split_whitespace();
    let first: usize = range
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SpecError::ParseError {
            msg: "IAEA SPE: bad $DATA channel range".to_string(),
        })?;
    let last: usize = range
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SpecError::ParseError {
            msg: "IAEA SPE: bad $DATA channel range".to_string(),
        })?;
    if last < first {
        return Err(SpecError::ParseError {
            msg: "IAEA SPE: $DATA channel range is inverted".to_string(),
        });
    }
    let n_channels = last - first + 1;

    let mut counts = Vec::with_capacity(n_channels);
    for line in data_lines_iter {
        for tok in line.split_whitespace() {
            let c: f32 = tok.parse().map_err(|_| SpecError::ParseError {
                msg: format!("IAEA SPE: non-numeric count '{}'", tok),
            })?;
            counts.push(c);
        }
    }
    if counts.len() != n_channels {
        return Err(SpecError::ParseError {
            msg: format!("IAEA SPE: expected {} counts, found {}", n_channels, counts.len()),
        });
    }

    let (live_time_s, real_time_s) = sections
        .get("MEAS_TIM")
        .and_then(|lines| lines.first())
        .and_then(|line| {
            let mut it = line.split_whitespace();
            let live: f64 = it.next()?.parse().ok()?;
            let real: f64 = it.next()?.parse().ok()?;
            Some((live, real))
        })
        .unwrap_or((0.0, 0.0));

    let start_time = sections
        .get("DATE_MEA")
        .and_then(|lines| lines.first())
        .and_then(|line| NaiveDateTime::parse_from_str(line.trim(), "%m/%d/%Y %H:%M:%S").ok());

    let det_name = sections
        .get("SPEC_ID")
        .and_then(|lines| lines.first())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Aa1".to_string());

    let cal = sections
        .get("MCA_CAL")
        .and_then(|lines| lines.get(1))
        .and_then(|line| {
            let coeffs: Vec<f32> = line
                .split_whitespace()
                .filter_map(|t| t.parse().ok())
                .collect();
            if coeffs.is_empty() {
                None
            } else {
                EnergyCalibration::polynomial(n_channels, coeffs, vec![]).ok()
            }
        })
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(n_channels));

    let mut m = Measurement::new(det_name);
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);

    if let Some(neutron_lines) = sections.get("NEUTRONS") {
        let total: f32 = neutron_lines
            .iter()
            .flat_map(|l| l.split_whitespace())
            .filter_map(|t| t.parse::<f32>().ok())
            .sum();
        m.set_neutron_counts(vec![total], live_time_s);
    }

    let file = SpecFile::default();
    file.add_measurement(m);
    file.cleanup_after_load(false);
    Ok(file)
}

fn split_sections(text: &str) -> std::collections::HashMap<String, Vec<String>> {
    let mut sections = std::collections::HashMap::new();
    let mut current: Option<String> = None;
    let mut body: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(name) = line.strip_prefix('$') {
            if let Some(prev) = current.take() {
                sections.insert(prev, std::mem::take(&mut body));
            }
            current = Some(name.trim_end_matches(':').trim().to_string());
        } else if current.is_some() {
            body.push(line.to_string());
        }
    }
    if let Some(prev) = current {
        sections.insert(prev, body);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "$SPEC_ID:\nAa1\n$DATE_MEA:\n01/02/2022 12:00:00\n$MEAS_TIM:\n10 10\n$DATA:\n0 7\n1 2 3 4 5 6 7 8\n";

    #[test]
    fn decodes_minimal_spe() {
        let file = decode(SAMPLE.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 36.0);
        assert_eq!(m.live_time_s(), 10.0);
    }

    #[test]
    fn rejects_missing_data_section() {
        assert!(decode(b"$SPEC_ID:\nfoo\n").is_err());
    }
}
