//! CSV/TXT family: best-effort decoder for tabular spectra. Accepts either
//! a single counts-per-line column or a two-column `energy,counts` dialect
//! (the latter gives a `LowerChannelEdge` calibration from the tabulated
//! energies). Comment lines (`#` prefix) and non-numeric header lines are
//! skipped.
use std::sync::Arc;

use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SpecError::ParseError {
        msg: "CSV/TXT: input is not valid UTF-8".to_string(),
    })?;

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<f64> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default();
        if fields.is_empty() {
            continue;
        }
        rows.push(fields);
    }

    if rows.len() < 4 {
        return Err(SpecError::ParseError {
            msg: "CSV/TXT: too few numeric data rows to be a plausible spectrum".to_string(),
        });
    }
    let width = rows[0].len();
    if width == 0 || width > 2 || !rows.iter().all(|r| r.len() == width) {
        return Err(SpecError::ParseError {
            msg: "CSV/TXT: rows do not agree on a 1- or 2-column layout".to_string(),
        });
    }

    let n = rows.len();
    let cal = if width == 2 {
        let mut edges: Vec<f32> = rows.iter().map(|r| r[0] as f32).collect();
        let last_width = edges[n - 1] - edges[n - 2];
        edges.push(edges[n - 1] + last_width.max(1e-3));
        EnergyCalibration::lower_channel_edge(n, edges)
            .ok()
            .filter(|c| c.valid())
            .unwrap_or_else(|| EnergyCalibration::consolidation_default(n))
    } else {
        EnergyCalibration::consolidation_default(n)
    };

    let counts: Vec<f32> = rows.iter().map(|r| r[width - 1] as f32).collect();

    let mut m = Measurement::new("Aa1");
    m.set_gamma_counts(counts, 0.0, 0.0);
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
    fn decodes_single_column_counts() {
        let text = "# comment\n1\n2\n3\n4\n5\n";
        let file = decode(text.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 15.0);
    }

    #[test]
    fn decodes_energy_counts_pairs() {
        let text = "0.0,10\n3.0,20\n6.0,30\n9.0,40\n";
        let file = decode(text.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 100.0);
        assert_eq!(m.energy_calibration().channel_count(), 4);
    }

    #[test]
    fn rejects_ragged_rows() {
        let text = "1,2\n3\n4,5\n6,7\n";
        assert!(decode(text.as_bytes()).is_err());
    }
}
