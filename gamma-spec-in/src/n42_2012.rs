//! N42-2012: `<RadMeasurement>` elements reference shared
//! `<EnergyCalibration id="...">` blocks by id (the `_intercal_<id>`
//! convention lets one detector carry more than one calibration over the
//! file's lifetime), and an optional `<AnalysisResults>` block maps onto
//! [`gamma_spec_core::specfile::DetectorAnalysis`].
use std::collections::HashMap;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use gamma_spec_core::specfile::{AnalysisResult, DetectorAnalysis};
use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::n42_common::{parse_channel_data, parse_duration, parse_timestamp};

struct CalDef {
    cal_type: String,
    coefficients: Vec<f32>,
}

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = String::from_utf8_lossy(bytes).into_owned();

    let calibrations = collect_calibrations(&text)?;
    if !text.contains("RadInstrumentData") {
        return Err(SpecError::ParseError {
            msg: "N42-2012: missing <RadInstrumentData> root".to_string(),
        });
    }

    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let file = SpecFile::default();
    let mut saw_spectrum = false;

    let mut tag_stack: Vec<String> = Vec::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut cal_ref = String::new();
    let mut spectrum_id = String::new();
    let mut analysis_results: Vec<AnalysisResult> = Vec::new();
    let mut in_analysis_result = false;
    let mut current_result = AnalysisResult::default();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "RadMeasurement" {
                    fields.clear();
                }
                if name == "Spectrum" {
                    spectrum_id = attr(&e, "id").unwrap_or_default();
                    cal_ref = attr(&e, "energyCalibrationIDRef").unwrap_or_default();
                }
                if name == "Nuclide" {
                    in_analysis_result = true;
                    current_result = AnalysisResult::default();
                }
                tag_stack.push(name);
            }
            Ok(Event::Text(e)) => {
                if let Some(tag) = tag_stack.last() {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if in_analysis_result {
                        match tag.as_str() {
                            "NuclideName" => current_result.nuclide = text.clone(),
                            "NuclideActivityValue" => current_result.activity = text.parse().ok(),
                            "NuclideDoseRateValue" => current_result.dose_rate = text.parse().ok(),
                            "SourcePosition" | "NuclideIDConfidenceValue" => {
                                current_result.confidence = text.parse().ok()
                            }
                            _ => {}
                        }
                    }
                    fields.entry(tag.clone()).or_insert(text);
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "Spectrum" {
                    saw_spectrum = true;
                    let measurement = build_measurement(&fields, &calibrations, &cal_ref, &spectrum_id)?;
                    file.add_measurement(measurement);
                }
                if name == "NuclideAnalysisResults" || name == "Nuclide" {
                    if in_analysis_result && !current_result.nuclide.is_empty() {
                        analysis_results.push(std::mem::take(&mut current_result));
                    }
                    in_analysis_result = false;
                }
                tag_stack.pop();
            }
            Ok(_) => {}
            Err(e) => {
                return Err(SpecError::ParseError {
                    msg: format!("N42-2012: XML error: {}", e),
                })
            }
        }
        buf.clear();
    }

    if !saw_spectrum {
        return Err(SpecError::ParseError {
            msg: "N42-2012: no <Spectrum> elements found".to_string(),
        });
    }

    if !analysis_results.is_empty() {
        file.set_detector_analysis(Some(DetectorAnalysis {
            algorithm_name: String::new(),
            algorithm_version: String::new(),
            results: analysis_results,
        }));
    }

    file.cleanup_after_load(false);
    Ok(file)
}

fn collect_calibrations(text: &str) -> Result<HashMap<String, CalDef>, SpecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut out = HashMap::new();
    let mut tag_stack: Vec<String> = Vec::new();
    let mut current_id = String::new();
    let mut current_type = String::new();
    let mut coeffs_text = String::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "EnergyCalibration" {
                    current_id = attr(&e, "id").unwrap_or_default();
                    current_type = attr(&e, "type").unwrap_or_default();
                    coeffs_text.clear();
                }
                tag_stack.push(name);
            }
            Ok(Event::Text(e)) => {
                if tag_stack.last().map(String::as_str) == Some("CoefficientValues") {
                    coeffs_text = e.unescape().unwrap_or_default().trim().to_string();
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "EnergyCalibration" && !current_id.is_empty() {
                    out.insert(
                        current_id.clone(),
                        CalDef {
                            cal_type: current_type.clone(),
                            coefficients: coeffs_text.split_whitespace().filter_map(|t| t.parse().ok()).collect(),
                        },
                    );
                    current_id.clear();
                }
                tag_stack.pop();
            }
            Ok(_) => {}
            Err(e) => {
                return Err(SpecError::ParseError {
                    msg: format!("N42-2012: XML error scanning calibrations: {}", e),
                })
            }
        }
        buf.clear();
    }
    Ok(out)
}

fn build_measurement(
    fields: &HashMap<String, String>,
    calibrations: &HashMap<String, CalDef>,
    cal_ref: &str,
    spectrum_id: &str,
) -> Result<Measurement, SpecError> {
    let counts = fields
        .get("ChannelData")
        .map(|s| parse_channel_data(s))
        .ok_or_else(|| SpecError::ParseError {
            msg: "N42-2012: <Spectrum> missing <ChannelData>".to_string(),
        })?;
    let n = counts.len();

    let live_time_s = fields.get("LiveTimeDuration").map(|s| parse_duration(s)).unwrap_or(0.0);
    let real_time_s = fields.get("RealTimeDuration").map(|s| parse_duration(s)).unwrap_or(0.0);
    let start_time = fields.get("StartDateTime").and_then(|s| parse_timestamp(s));

    let cal = calibrations
        .get(cal_ref)
        .and_then(|def| {
            let result = if def.cal_type.eq_ignore_ascii_case("FullRangeFraction") {
                EnergyCalibration::full_range_fraction(n, def.coefficients.clone(), vec![])
            } else {
                EnergyCalibration::polynomial(n, def.coefficients.clone(), vec![])
            };
            result.ok()
        })
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(n));

    let name = if spectrum_id.is_empty() { "Aa1".to_string() } else { spectrum_id.to_string() };
    let mut m = Measurement::new(name);
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);
    if let Some(n) = fields.get("NeutronCounts").and_then(|s| s.split_whitespace().next()).and_then(|s| s.parse::<f32>().ok()) {
        m.set_neutron_counts(vec![n], live_time_s);
    }
    if let Some(remark) = fields.get("Remark") {
        m.add_remark(remark.clone());
    }
    Ok(m)
}

fn local_name(qname: &[u8]) -> String {
    let s = std::str::from_utf8(qname).unwrap_or("");
    s.rsplit(':').next().unwrap_or(s).to_string()
}

fn attr(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if std::str::from_utf8(a.key.as_ref()).ok()? == key {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<RadInstrumentData>
  <EnergyCalibration id="escal_intercal_Aa1" type="Polynomial">
    <CoefficientValues>0 3</CoefficientValues>
  </EnergyCalibration>
  <RadMeasurement id="RM1">
    <StartDateTime>2022-01-01T12:00:00</StartDateTime>
    <LiveTimeDuration>PT10S</LiveTimeDuration>
    <RealTimeDuration>PT10S</RealTimeDuration>
    <Spectrum id="Aa1" energyCalibrationIDRef="escal_intercal_Aa1">
      <ChannelData>1 2 3 4 5 6 7 8</ChannelData>
    </Spectrum>
  </RadMeasurement>
</RadInstrumentData>"#;

    #[test]
    fn decodes_minimal_n42_2012_with_calibration_reference() {
        let file = decode(SAMPLE.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 36.0);
        assert!((m.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_non_n42_2012_xml() {
        assert!(decode(b"<RadInstrumentDataXXX></RadInstrumentDataXXX>").is_err());
    }
}
