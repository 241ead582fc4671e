//! Format encoders and HTML chart export for gamma/neutron spectrum files:
//! one module per format, the mirror image of `gamma-spec-in`'s decoders.
//!
//! Every multi-record encoder has the shape
//! `fn encode(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Result<Vec<u8>, SpecError>`
//! and walks the canonical `all_measurements()` order restricted to the
//! requested selection. Formats that carry only one spectrum (CHN, binary
//! and ASCII SPC, IAEA SPE, CNF, TKA) collapse the selection first via
//! `SpecFile::sum_measurements`, matching the single-record shape those
//! instruments actually produce.
extern crate chrono;
extern crate gamma_spec_core;
extern crate log;
extern crate num;
extern crate quick_xml;
extern crate serde;
extern crate serde_json;

use std::collections::HashSet;

pub mod bytes;
pub mod chn;
pub mod cnf;
pub mod csv_txt;
pub mod exploranium;
pub mod html;
pub mod iaea_spe;
pub mod n42_2006;
pub mod n42_2012;
pub mod pcf;
pub mod spc_ascii;
pub mod spc_binary;
pub mod tka;

#[cfg(test)]
mod integration_tests;

use gamma_spec_core::{DecoderFormat, Measurement, SpecError, SpecFile};

/// Dispatches to the encoder named by `format`. Tags in
/// [`DecoderFormat::Unimplemented`]'s reserved range (vendor single-record
/// formats not shipped in this crate) always fail with `OutputError`.
pub fn encode_by_format(
    file: &SpecFile,
    format: DecoderFormat,
    samples: &[i32],
    detectors: &[String],
) -> Result<Vec<u8>, SpecError> {
    use DecoderFormat::*;
    log::debug!("encoding {} sample(s) as {:?}", samples.len(), format);
    match format {
        N42_2012 => n42_2012::encode(file, samples, detectors),
        N42_2006 => n42_2006::encode(file, samples, detectors),
        Pcf => pcf::encode(file, samples, detectors),
        Chn => chn::encode(file, samples, detectors),
        SpcBinary => spc_binary::encode(file, samples, detectors),
        SpcAscii => spc_ascii::encode(file, samples, detectors),
        IaeaSpe => iaea_spe::encode(file, samples, detectors),
        Cnf => cnf::encode(file, samples, detectors),
        ExploraniumGr130 => exploranium::encode_gr130(file, samples, detectors),
        ExploraniumGr135 => exploranium::encode_gr135(file, samples, detectors),
        CsvTxt => csv_txt::encode(file, samples, detectors),
        Tka => tka::encode(file, samples, detectors),
        Unimplemented => Err(SpecError::OutputError {
            msg: "this vendor format is not implemented by this crate".to_string(),
        }),
    }
}

/// Restricts `file`'s canonical record order to the given samples/detectors;
/// an empty slice means "every sample" or "every detector" respectively.
pub(crate) fn select(file: &SpecFile, samples: &[i32], detectors: &[String]) -> Vec<Measurement> {
    let sample_set: Option<HashSet<i32>> = if samples.is_empty() {
        None
    } else {
        Some(samples.iter().copied().collect())
    };
    let det_set: Option<HashSet<&str>> = if detectors.is_empty() {
        None
    } else {
        Some(detectors.iter().map(String::as_str).collect())
    };
    file.all_measurements()
        .into_iter()
        .filter(|m| sample_set.as_ref().map_or(true, |s| s.contains(&m.sample_number())))
        .filter(|m| det_set.as_ref().map_or(true, |s| s.contains(m.detector_name())))
        .collect()
}
