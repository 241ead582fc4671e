//! HTML chart export (C8): one JSON record per spectrum, meant to be spliced
//! into a caller-supplied HTML/JS chart template. The template itself is a
//! host concern; this module only produces the JSON array.
use gamma_spec_core::enums::{EnergyCalType, SourceType};
use gamma_spec_core::{Measurement, SpecError, SpecFile};
use serde::Serialize;

#[derive(Serialize)]
struct ChartRecord {
    title: String,
    id: String,
    #[serde(rename = "backgroundID", skip_serializing_if = "Option::is_none")]
    background_id: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    peaks: Vec<f64>,
    #[serde(rename = "liveTime")]
    live_time: f64,
    #[serde(rename = "realTime")]
    real_time: f64,
    neutrons: f64,
    #[serde(rename = "lineColor")]
    line_color: &'static str,
    #[serde(rename = "peakColor")]
    peak_color: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    xeqn: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<Vec<f32>>,
    y: Vec<f32>,
    #[serde(rename = "yScaleFactor")]
    y_scale_factor: f64,
}

fn record_kind(t: SourceType) -> &'static str {
    match t {
        SourceType::Foreground => "FOREGROUND",
        SourceType::Background => "BACKGROUND",
        _ => "SECONDARY",
    }
}

fn colors_for(t: SourceType) -> (&'static str, &'static str) {
    match t {
        SourceType::Foreground => ("#1f78b4", "#33a02c"),
        SourceType::Background => ("#e31a1c", "#fb9a99"),
        _ => ("#6a3d9a", "#b15928"),
    }
}

fn chart_id(m: &Measurement) -> String {
    format!("{}_{}", m.sample_number(), m.detector_name())
}

fn to_record(m: &Measurement) -> ChartRecord {
    let cal = m.energy_calibration();
    let (xeqn, x) = if cal.cal_type() == EnergyCalType::LowerChannelEdge {
        (None, cal.channel_energies().map(|e| e.as_slice().to_vec()))
    } else {
        (Some(cal.coefficients().to_vec()), None)
    };

    ChartRecord {
        title: escape_text(m.title()),
        id: chart_id(m),
        background_id: None,
        kind: record_kind(m.source_type()),
        peaks: Vec::new(),
        live_time: m.live_time_s(),
        real_time: m.real_time_s(),
        neutrons: m.neutron_counts_sum(),
        line_color: colors_for(m.source_type()).0,
        peak_color: colors_for(m.source_type()).1,
        xeqn,
        x,
        y: m.gamma_counts().unwrap_or(&[]).to_vec(),
        y_scale_factor: 1.0,
    }
}

/// Serializes every selected measurement (canonical order) to a JSON array
/// of chart records, pairing each background with the foreground records
/// that preceded it and have not yet been assigned one.
pub fn export_json(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError> {
    let selected = crate::select(file, samples, detectors);

    let mut records: Vec<ChartRecord> = selected.iter().map(to_record).collect();
    let mut pending_foreground: Vec<usize> = Vec::new();
    for i in 0..records.len() {
        match selected[i].source_type() {
            SourceType::Foreground => pending_foreground.push(i),
            SourceType::Background => {
                let bg_id = records[i].id.clone();
                for &fi in &pending_foreground {
                    records[fi].background_id = Some(bg_id.clone());
                }
                pending_foreground.clear();
            }
            _ => {}
        }
    }

    serde_json::to_vec(&records).map_err(|e| SpecError::OutputError {
        msg: format!("HTML chart export: JSON serialization failed: {}", e),
    })
}

/// HTML-encodes `<>&"'`, normalizes Unicode line/paragraph separators
/// (U+2028, U+2029) to a newline followed by a space, and strips any
/// remaining ASCII line-separator characters so the result is safe to embed
/// in a single HTML attribute or JS string literal.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\r' | '\n' => continue,
            '\u{2028}' | '\u{2029}' => out.push_str("\n "),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamma_spec_core::EnergyCalibration;
    use std::sync::Arc;

    #[test]
    fn escapes_html_special_characters() {
        assert_eq!(escape_text("<a>&\"'"), "&lt;a&gt;&amp;&quot;&#39;");
    }

    #[test]
    fn normalizes_unicode_line_separators() {
        let out = escape_text("line1\u{2028}line2");
        assert_eq!(out, "line1\n line2");
    }

    #[test]
    fn pairs_background_with_preceding_foregrounds() {
        let file = SpecFile::default();
        let cal = Arc::new(EnergyCalibration::polynomial(4, vec![0.0, 3.0], vec![]).unwrap());

        let mut fg = Measurement::new("Aa1");
        fg.set_gamma_counts(vec![1.0; 4], 10.0, 10.0);
        fg.set_energy_calibration(cal.clone()).unwrap();
        fg.set_source_type(SourceType::Foreground);
        file.add_measurement(fg);

        let mut bg = Measurement::new("Ba1");
        bg.set_gamma_counts(vec![1.0; 4], 10.0, 10.0);
        bg.set_energy_calibration(cal).unwrap();
        bg.set_source_type(SourceType::Background);
        file.add_measurement(bg);
        file.cleanup_after_load(false);

        let json = export_json(&file, &[], &[]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        let fg_record = arr.iter().find(|r| r["type"] == "FOREGROUND").unwrap();
        let bg_record = arr.iter().find(|r| r["type"] == "BACKGROUND").unwrap();
        assert_eq!(fg_record["backgroundID"], bg_record["id"]);
    }
}
