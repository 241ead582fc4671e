//! Reader/writer for the CALp text format (C9): a small, human-editable file
//! carrying a single energy calibration plus an optional detector name,
//! compatible with the PeakEasy/InterSpec convention of the same name.
//!
//! ```text
//! #PeakEasy CALp File Ver:  4.00
//! Offset (keV)           :  1.50000e+00
//! Gain (keV / Chan)      :  3.00000e+00
//! 2nd Order Coef         :  0.00000e+00
//! 3rd Order Coef         :  0.00000e+00
//! 4th Order Coef         :  0.00000e+00
//! Deviation Pairs        :  2
//! 7.70000e+01 -1.00000e+00
//! 1.22000e+02 -5.00000e+00
//! #END
//! ```
use std::io::{BufRead, Seek, SeekFrom, Write};

use crate::calibration::EnergyCalibration;
use crate::errors::*;

const HEADER: &str = "#PeakEasy CALp File Ver:  4.00";
const FOOTER: &str = "#END";

/// Reads a CALp file. Returns `Ok(None)` if `input` does not start with a
/// recognisable CALp header or the calibration it describes does not
/// validate (the caller should treat this as "not a CALp file", not an
/// error); in every `Ok(None)` case `input` is seeked back to the position it
/// was at on entry, so a caller that probes with `read_calp` can fall
/// through to another reader without losing the bytes it consumed.
/// `num_channels` is the channel count the resulting calibration is
/// validated against.
pub fn read_calp<R: BufRead + Seek>(
    input: &mut R,
    num_channels: usize,
) -> Result<Option<(EnergyCalibration, String)>, SpecError> {
    let start = input.stream_position()?;
    match read_calp_inner(input, num_channels)? {
        Some(result) => Ok(Some(result)),
        None => {
            input.seek(SeekFrom::Start(start))?;
            Ok(None)
        }
    }
}

fn read_calp_inner<R: BufRead>(
    input: &mut R,
    num_channels: usize,
) -> Result<Option<(EnergyCalibration, String)>, SpecError> {
    if num_channels < 2 {
        return Ok(None);
    }

    let mut lines = Vec::new();
    let mut first = String::new();
    input.read_line(&mut first)?;
    if !first.trim_start().starts_with("#PeakEasy") {
        return Ok(None);
    }
    lines.push(first);
    loop {
        let mut line = String::new();
        let n = input.read_line(&mut line)?;
        if n == 0 || line.trim() == FOOTER {
            break;
        }
        lines.push(line);
    }

    let mut det_name = String::new();
    let mut coeffs = vec![0.0f32; 5];
    let mut dev_pairs = Vec::new();
    let mut exact_energies: Option<Vec<f32>> = None;

    let mut iter = lines.into_iter().peekable();
    while let Some(line) = iter.next() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "detector name" => det_name = value.to_string(),
            "offset (kev)" => coeffs[0] = parse_f32(value)?,
            "gain (kev / chan)" => coeffs[1] = parse_f32(value)?,
            "2nd order coef" => coeffs[2] = parse_f32(value)?,
            "3rd order coef" => coeffs[3] = parse_f32(value)?,
            "4th order coef" => coeffs[4] = parse_f32(value)?,
            "deviation pairs" => {
                let n: usize = value.parse().map_err(|_| SpecError::ParseError {
                    msg: format!("CALp: bad deviation pair count '{}'", value),
                })?;
                for _ in 0..n {
                    if let Some(pair_line) = iter.next() {
                        dev_pairs.push(parse_pair(&pair_line)?);
                    }
                }
            }
            "exact energies" => {
                let n: usize = value.parse().map_err(|_| SpecError::ParseError {
                    msg: format!("CALp: bad exact-energy count '{}'", value),
                })?;
                let mut energies = Vec::with_capacity(n);
                for _ in 0..n {
                    if let Some(e_line) = iter.next() {
                        energies.push(parse_f32(e_line.trim())?);
                    }
                }
                exact_energies = Some(energies);
            }
            _ => {}
        }
    }

    let cal = if let Some(mut energies) = exact_energies {
        if energies.len() < num_channels {
            return Ok(None);
        }
        energies.truncate(num_channels + 1);
        match EnergyCalibration::lower_channel_edge(num_channels, energies) {
            Ok(c) => c,
            Err(_) => return Ok(None),
        }
    } else {
        while coeffs.last() == Some(&0.0) && coeffs.len() > 2 {
            coeffs.pop();
        }
        match EnergyCalibration::polynomial(num_channels, coeffs, dev_pairs) {
            Ok(c) => c,
            Err(_) => return Ok(None),
        }
    };

    if !cal.valid() {
        return Ok(None);
    }

    Ok(Some((cal, det_name)))
}

fn parse_f32(s: &str) -> Result<f32, SpecError> {
    s.parse().map_err(|_| SpecError::ParseError {
        msg: format!("CALp: could not parse float '{}'", s),
    })
}

fn parse_pair(line: &str) -> Result<(f32, f32), SpecError> {
    let mut parts = line.split_whitespace();
    let a = parts.next().ok_or_else(|| SpecError::ParseError {
        msg: "CALp: missing deviation pair energy".to_string(),
    })?;
    let b = parts.next().ok_or_else(|| SpecError::ParseError {
        msg: "CALp: missing deviation pair offset".to_string(),
    })?;
    Ok((parse_f32(a)?, parse_f32(b)?))
}

/// Writes `cal` (and, if non-empty, `detector_name`) as a CALp file.
/// `FullRangeFraction` calibrations are converted to polynomial first, since
/// CALp's core fields are polynomial coefficients; `LowerChannelEdge` is
/// written as an "Exact Energies" segment instead.
pub fn write_calp<W: Write>(
    output: &mut W,
    cal: &EnergyCalibration,
    detector_name: &str,
) -> Result<(), SpecError> {
    use crate::enums::EnergyCalType;

    writeln!(output, "{}", HEADER)?;
    if !detector_name.is_empty() {
        writeln!(output, "Detector Name           :  {}", detector_name)?;
    }

    match cal.cal_type() {
        EnergyCalType::LowerChannelEdge => {
            let edges = cal.channel_energies().map(|e| e.as_slice()).unwrap_or(&[]);
            writeln!(output, "Exact Energies          :  {}", edges.len())?;
            for e in edges {
                writeln!(output, "{:.5e}", e)?;
            }
        }
        EnergyCalType::FullRangeFraction => {
            let poly = crate::calibration::frf_to_polynomial(cal.coefficients(), cal.channel_count());
            write_polynomial_fields(output, &poly)?;
            write_dev_pairs(output, cal.deviation_pairs())?;
        }
        _ => {
            write_polynomial_fields(output, cal.coefficients())?;
            write_dev_pairs(output, cal.deviation_pairs())?;
        }
    }

    writeln!(output, "{}", FOOTER)?;
    Ok(())
}

fn write_polynomial_fields<W: Write>(output: &mut W, coeffs: &[f32]) -> Result<(), SpecError> {
    let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
    writeln!(output, "Offset (keV)           :  {:.5e}", c(0))?;
    writeln!(output, "Gain (keV / Chan)      :  {:.5e}", c(1))?;
    writeln!(output, "2nd Order Coef         :  {:.5e}", c(2))?;
    writeln!(output, "3rd Order Coef         :  {:.5e}", c(3))?;
    writeln!(output, "4th Order Coef         :  {:.5e}", c(4))?;
    Ok(())
}

fn write_dev_pairs<W: Write>(output: &mut W, dev_pairs: &[(f32, f32)]) -> Result<(), SpecError> {
    if dev_pairs.is_empty() {
        return Ok(());
    }
    writeln!(output, "Deviation Pairs        :  {}", dev_pairs.len())?;
    for (e, o) in dev_pairs {
        writeln!(output, "{:.5e} {:.5e}", e, o)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_polynomial_with_deviation_pairs() {
        let cal = EnergyCalibration::polynomial(
            1024,
            vec![1.5, 3.0],
            vec![(77.0, -1.0), (122.0, -5.0)],
        )
        .unwrap();
        let mut buf = Vec::new();
        write_calp(&mut buf, &cal, "Aa1").unwrap();

        let mut reader = Cursor::new(buf);
        let (parsed, det_name) = read_calp(&mut reader, 1024).unwrap().unwrap();
        assert_eq!(det_name, "Aa1");
        assert!((parsed.coefficients()[0] - 1.5).abs() < 1e-4);
        assert!((parsed.coefficients()[1] - 3.0).abs() < 1e-4);
        assert_eq!(parsed.deviation_pairs().len(), 2);
    }

    #[test]
    fn non_calp_input_returns_none_and_rewinds() {
        let mut reader = Cursor::new(b"not a calp file\n".to_vec());
        assert!(read_calp(&mut reader, 1024).unwrap().is_none());
        assert_eq!(reader.position(), 0);

        let mut line = String::new();
        std::io::BufRead::read_line(&mut reader, &mut line).unwrap();
        assert_eq!(line, "not a calp file\n");
    }

    #[test]
    fn lower_channel_edge_round_trips_as_exact_energies() {
        let energies: Vec<f32> = (0..=8).map(|i| i as f32 * 2.5).collect();
        let cal = EnergyCalibration::lower_channel_edge(8, energies).unwrap();
        let mut buf = Vec::new();
        write_calp(&mut buf, &cal, "").unwrap();

        let mut reader = Cursor::new(buf);
        let (parsed, det_name) = read_calp(&mut reader, 8).unwrap().unwrap();
        assert!(det_name.is_empty());
        assert_eq!(parsed.channel_count(), 8);
    }
}
