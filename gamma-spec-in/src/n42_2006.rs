//! N42-2006: one `<Measurement>` element per sample, each carrying zero or
//! more `<Spectrum>` blocks (gamma) and a `<CountDoseData>` block (neutrons).
//! Built on `quick-xml`'s pull-parser API rather than a hand-rolled reader,
//! since markup grammar has nothing in common with the binary decoders.
use std::collections::HashMap;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use gamma_spec_core::{EnergyCalibration, Measurement, SpecError, SpecFile};

use crate::n42_common::{parse_channel_data, parse_duration, parse_timestamp};

pub fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let text = strip_utf16_nuls(bytes);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let file = SpecFile::default();
    let mut saw_root = false;
    let mut saw_spectrum = false;

    let mut tag_stack: Vec<String> = Vec::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut cal_type_attr = String::new();
    let mut spectrum_id = String::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "N42InstrumentData" {
                    saw_root = true;
                }
                if name == "Measurement" {
                    fields.clear();
                }
                if name == "Spectrum" {
                    spectrum_id = attr(&e, "id").unwrap_or_default();
                }
                if name == "Calibration" {
                    cal_type_attr = attr(&e, "type").unwrap_or_default();
                }
                tag_stack.push(name);
            }
            Ok(Event::Text(e)) => {
                if let Some(tag) = tag_stack.last() {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        fields.entry(tag.clone()).or_insert(text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "Spectrum" {
                    saw_spectrum = true;
                    let measurement = build_measurement(&fields, &cal_type_attr, &spectrum_id)?;
                    file.add_measurement(measurement);
                }
                tag_stack.pop();
            }
            Ok(_) => {}
            Err(e) => {
                return Err(SpecError::ParseError {
                    msg: format!("N42-2006: XML error: {}", e),
                })
            }
        }
        buf.clear();
    }

    if !saw_root || !saw_spectrum {
        return Err(SpecError::ParseError {
            msg: "N42-2006: no <N42InstrumentData>/<Spectrum> elements found".to_string(),
        });
    }

    file.cleanup_after_load(false);
    Ok(file)
}

fn build_measurement(fields: &HashMap<String, String>, cal_type: &str, spectrum_id: &str) -> Result<Measurement, SpecError> {
    let counts = fields
        .get("ChannelData")
        .map(|s| parse_channel_data(s))
        .ok_or_else(|| SpecError::ParseError {
            msg: "N42-2006: <Spectrum> missing <ChannelData>".to_string(),
        })?;
    let n = counts.len();

    let live_time_s = fields.get("LiveTime").map(|s| parse_duration(s)).unwrap_or(0.0);
    let real_time_s = fields.get("RealTime").map(|s| parse_duration(s)).unwrap_or(0.0);
    let start_time = fields.get("StartTime").and_then(|s| parse_timestamp(s));

    let cal = fields
        .get("Coefficients")
        .map(|s| {
            let coeffs: Vec<f32> = s.split_whitespace().filter_map(|t| t.parse().ok()).collect();
            match cal_type {
                "FullRangeFraction" => EnergyCalibration::full_range_fraction(n, coeffs, vec![]),
                _ => EnergyCalibration::polynomial(n, coeffs, vec![]),
            }
        })
        .and_then(|r| r.ok())
        .filter(|c| c.valid())
        .unwrap_or_else(|| EnergyCalibration::consolidation_default(n));

    let name = if spectrum_id.is_empty() { "Aa1".to_string() } else { spectrum_id.to_string() };
    let mut m = Measurement::new(name);
    m.set_gamma_counts(counts, live_time_s, real_time_s);
    m.set_energy_calibration(Arc::new(cal))?;
    m.set_start_time(start_time);
    if let Some(n) = fields.get("Neutrons").and_then(|s| s.parse::<f32>().ok()) {
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

/// N42 files are occasionally UTF-16 with a BOM; a single interleaved `\0`
/// byte is dropped rather than decoding full UTF-16, matching the
/// lowest-effort transformation that still lets `quick-xml` parse UTF-8 text.
fn strip_utf16_nuls(bytes: &[u8]) -> String {
    if bytes.len() > 2 && bytes[1] == 0 {
        let filtered: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
        String::from_utf8_lossy(&filtered).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<N42InstrumentData>
  <Measurement>
    <InstrumentInformation><Manufacturer>Acme</Manufacturer></InstrumentInformation>
    <Spectrum id="Aa1">
      <StartTime>2022-01-01T12:00:00</StartTime>
      <LiveTime>PT10S</LiveTime>
      <RealTime>PT10S</RealTime>
      <Calibration type="Polynomial"><Equation><Coefficients>0 3</Coefficients></Equation></Calibration>
      <ChannelData>1 2 3 4 5 6 7 8</ChannelData>
    </Spectrum>
  </Measurement>
</N42InstrumentData>"#;

    #[test]
    fn decodes_minimal_n42_2006() {
        let file = decode(SAMPLE.as_bytes()).unwrap();
        let m = file.measurement(0, "Aa1").unwrap();
        assert_eq!(m.gamma_count_sum(), 36.0);
        assert!((m.energy_calibration().coefficients()[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_non_n42_xml() {
        assert!(decode(b"<foo><bar/></foo>").is_err());
    }
}
