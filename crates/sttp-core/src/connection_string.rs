//! `key=value;` connection-string parsing shared by `Subscribe` and the
//! subscriber's reconnect configuration (§4.5).

use std::collections::HashMap;

/// Parses a `key=value;key2=value2;...` list into a case-sensitive map.
///
/// Malformed segments (no `=`) are skipped rather than rejected — the
/// recognized-key set in §4.5 is informative, not exhaustive, and unknown
/// keys must not abort parsing.
#[must_use]
pub fn parse_connection_string(input: &str) -> HashMap<String, String> {
    input
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses the `inputMeasurementKeys={G1;G2}` value into its brace-delimited
/// member tokens.
#[must_use]
pub fn parse_key_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let parsed = parse_connection_string("includeTime=true;lagTime=3");
        assert_eq!(parsed.get("includeTime").map(String::as_str), Some("true"));
        assert_eq!(parsed.get("lagTime").map(String::as_str), Some("3"));
    }

    #[test]
    fn skips_malformed_segments() {
        let parsed = parse_connection_string("includeTime=true;garbage;lagTime=3");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn parses_brace_delimited_key_list() {
        let keys = parse_key_list("{G1;G2}");
        assert_eq!(keys, vec!["G1".to_string(), "G2".to_string()]);
    }
}
