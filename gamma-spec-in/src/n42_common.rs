//! Helpers shared by the N42-2006 and N42-2012 decoders: ISO-8601 duration
//! parsing, timestamp parsing, and whitespace-separated channel data.
use chrono::NaiveDateTime;

/// Accepts either an ISO-8601 duration (`PT12.5S`, `PT1M30S`) or a bare
/// number of seconds, the two forms seen across real N42 producers.
pub fn parse_duration(s: &str) -> f64 {
    let s = s.trim();
    if !s.starts_with("PT") && !s.starts_with("pt") {
        return s.parse().unwrap_or(0.0);
    }
    let body = &s[2..];
    let mut seconds = 0.0;
    let mut num = String::new();
    for c in body.chars() {
        match c {
            '0'..='9' | '.' => num.push(c),
            'H' | 'h' => {
                seconds += num.parse::<f64>().unwrap_or(0.0) * 3600.0;
                num.clear();
            }
            'M' | 'm' => {
                seconds += num.parse::<f64>().unwrap_or(0.0) * 60.0;
                num.clear();
            }
            'S' | 's' => {
                seconds += num.parse::<f64>().unwrap_or(0.0);
                num.clear();
            }
            _ => {}
        }
    }
    seconds
}

pub fn format_duration(seconds: f64) -> String {
    format!("PT{}S", seconds)
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn parse_channel_data(s: &str) -> Vec<f32> {
    s.split_whitespace().filter_map(|t| t.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso8601_and_bare_durations() {
        assert!((parse_duration("PT10S") - 10.0).abs() < 1e-9);
        assert!((parse_duration("PT1M30S") - 90.0).abs() < 1e-9);
        assert!((parse_duration("12.5") - 12.5).abs() < 1e-9);
    }

    #[test]
    fn parses_timestamp_with_and_without_fraction() {
        assert!(parse_timestamp("2022-01-01T12:00:00").is_some());
        assert!(parse_timestamp("2022-01-01T12:00:00.500").is_some());
    }
}
