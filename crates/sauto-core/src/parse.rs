use regex::Regex;

/// All capture groups of the first match, in order. Unmatched optional
/// groups come back as empty strings.
pub fn all_captures(re: &Regex, text: &str) -> Option<Vec<String>> {
    let caps = re.captures(text)?;
    Some(
        caps.iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect(),
    )
}

/// Parse a float the way instruments print them (`-1.234E+01`, ` 5.0`).
pub fn instrument_f64(s: &str) -> Option<f64> {
    s.trim().trim_matches('"').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_captures_keeps_positions() {
        let re = Regex::new(r"(\d+)(x)?=(\d+)").unwrap();
        assert_eq!(
            all_captures(&re, "3=40").unwrap(),
            vec!["3".to_string(), String::new(), "40".to_string()]
        );
    }

    #[test]
    fn instrument_numbers() {
        assert_eq!(instrument_f64(" -1.25E+01\r"), Some(-12.5));
        assert_eq!(instrument_f64("\"3\""), Some(3.0));
        assert_eq!(instrument_f64("AUTO"), None);
    }
}
