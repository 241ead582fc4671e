//! Fixed-width binary field helpers shared by the binary decoders (PCF,
//! CHN, binary SPC, CNF, Exploranium GR-130/135).
//!
//! Mirrors the teacher's `bitconverter::converter_chooser` pattern: a small
//! set of free functions over byte slices rather than a generic trait, since
//! every format here reads a fixed, known set of field widths.
use std::convert::TryInto;

use gamma_spec_core::SpecError;

pub fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], SpecError> {
    let end = pos.checked_add(len).ok_or_else(|| SpecError::BitConversionError {
        msg: "field offset overflow".to_string(),
    })?;
    let slice = buf.get(*pos..end).ok_or_else(|| SpecError::BitConversionError {
        msg: format!("short read: wanted {} bytes at offset {}, buffer is {} bytes", len, pos, buf.len()),
    })?;
    *pos = end;
    Ok(slice)
}

pub fn u16_le(buf: &[u8], pos: &mut usize) -> Result<u16, SpecError> {
    Ok(u16::from_le_bytes(take(buf, pos, 2)?.try_into()?))
}

pub fn u16_be(buf: &[u8], pos: &mut usize) -> Result<u16, SpecError> {
    Ok(u16::from_be_bytes(take(buf, pos, 2)?.try_into()?))
}

pub fn i16_le(buf: &[u8], pos: &mut usize) -> Result<i16, SpecError> {
    Ok(i16::from_le_bytes(take(buf, pos, 2)?.try_into()?))
}

pub fn u32_le(buf: &[u8], pos: &mut usize) -> Result<u32, SpecError> {
    Ok(u32::from_le_bytes(take(buf, pos, 4)?.try_into()?))
}

pub fn i32_le(buf: &[u8], pos: &mut usize) -> Result<i32, SpecError> {
    Ok(i32::from_le_bytes(take(buf, pos, 4)?.try_into()?))
}

pub fn f32_le(buf: &[u8], pos: &mut usize) -> Result<f32, SpecError> {
    Ok(f32::from_le_bytes(take(buf, pos, 4)?.try_into()?))
}

pub fn f64_le(buf: &[u8], pos: &mut usize) -> Result<f64, SpecError> {
    Ok(f64::from_le_bytes(take(buf, pos, 8)?.try_into()?))
}

/// Reads a fixed-width ASCII field and trims trailing NUL/space padding.
pub fn fixed_ascii(buf: &[u8], pos: &mut usize, len: usize) -> Result<String, SpecError> {
    let slice = take(buf, pos, len)?;
    Ok(String::from_utf8_lossy(slice)
        .trim_end_matches(['\0', ' '])
        .to_string())
}

/// ORTEC's packed-BCD date/time representation used by CHN and SPC headers:
/// ddMMMyy (e.g. "01JAN22") with a separate `HHmm` 2-byte BCD/ASCII tail
/// depending on format variant. Callers pass the textual fields already
/// extracted; this just centralises the month-name lookup.
pub fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    MONTHS.iter().position(|m| m.eq_ignore_ascii_case(abbrev)).map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_reports_short_reads() {
        let buf = [1u8, 2, 3];
        let mut pos = 0;
        assert!(take(&buf, &mut pos, 4).is_err());
    }

    #[test]
    fn fixed_ascii_trims_nul_padding() {
        let buf = b"Aa1\0\0\0\0\0";
        let mut pos = 0;
        assert_eq!(fixed_ascii(buf, &mut pos, 8).unwrap(), "Aa1");
    }

    #[test]
    fn month_number_is_case_insensitive() {
        assert_eq!(month_number("jan"), Some(1));
        assert_eq!(month_number("DEC"), Some(12));
        assert_eq!(month_number("xyz"), None);
    }
}
