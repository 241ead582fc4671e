//! Format decoders for gamma/neutron spectrum files: one module per format,
//! plus the `Auto` driver that tries them in turn.
//!
//! Every decoder has the shape `fn decode(bytes: &[u8]) -> Result<SpecFile, SpecError>`.
//! None of them mutate `bytes`, so the "decoder must leave the stream
//! rewound on failure" contract is satisfied structurally: a failed decoder
//! has touched nothing but its own local cursor.
extern crate gamma_spec_core;
extern crate log;
extern crate num;
extern crate quick_xml;

pub mod bytes;
pub mod chn;
pub mod cnf;
pub mod csv_txt;
pub mod exploranium;
pub mod iaea_spe;
mod n42_common;
pub mod n42_2006;
pub mod n42_2012;
pub mod pcf;
pub mod spc_ascii;
pub mod spc_binary;
pub mod tka;

use gamma_spec_core::{DecoderFormat, SpecError, SpecFile};

/// Dispatches to the decoder named by `format`. Tags in
/// [`DecoderFormat::Unimplemented`]'s reserved range (vendor single-record
/// formats not shipped in this crate) always fail with `ParseError`.
pub fn decode_by_format(bytes: &[u8], format: DecoderFormat) -> Result<SpecFile, SpecError> {
    use DecoderFormat::*;
    log::debug!("trying decoder {:?} on {} byte(s)", format, bytes.len());
    match format {
        N42_2012 => n42_2012::decode(bytes),
        N42_2006 => n42_2006::decode(bytes),
        Pcf => pcf::decode(bytes),
        Chn => chn::decode(bytes),
        SpcBinary => spc_binary::decode(bytes),
        SpcAscii => spc_ascii::decode(bytes),
        IaeaSpe => iaea_spe::decode(bytes),
        Cnf => cnf::decode(bytes),
        ExploraniumGr130 => exploranium::decode_gr130(bytes),
        ExploraniumGr135 => exploranium::decode_gr135(bytes),
        CsvTxt => csv_txt::decode(bytes),
        Tka => tka::decode(bytes),
        Unimplemented => Err(SpecError::ParseError {
            msg: "this vendor format is not implemented by this crate".to_string(),
        }),
    }
}

/// Tries every format in [`DecoderFormat::all`] in order, returning the
/// first successful decode. Each failed attempt is logged at `debug!` with
/// its error; if every format fails, the error of the last attempt (the
/// most "generic" format tried, CSV/TXT) is returned.
pub fn decode_auto(bytes: &[u8]) -> Result<SpecFile, SpecError> {
    let mut last_err = None;
    for &format in DecoderFormat::all() {
        match decode_by_format(bytes, format) {
            Ok(file) => {
                log::info!("decoded as {:?}", format);
                return Ok(file);
            }
            Err(e) => {
                log::debug!("{:?} did not match: {}", format, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| SpecError::ParseError {
        msg: "no decoder recognised this input".to_string(),
    }))
}

/// Reads `path` fully into memory and decodes it, trying `hint` first (if
/// given) before falling back to [`decode_auto`].
pub fn load_file(
    path: impl AsRef<std::path::Path>,
    hint: Option<DecoderFormat>,
) -> Result<SpecFile, SpecError> {
    let bytes = std::fs::read(path)?;
    match hint {
        Some(format) => decode_by_format(&bytes, format).or_else(|_| decode_auto(&bytes)),
        None => decode_auto(&bytes),
    }
}
