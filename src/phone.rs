//! Phone number handling for ENUM domains.
//!
//! Numbers are parsed with the `phonenumber` crate, which carries the
//! numbering plan metadata used to split the country code from the national
//! number and to decide whether a number is valid.

use phonenumber::Mode;

use crate::errors::DnsError;

/// A number split into its country code and national number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPhone {
    pub country_code: u16,
    pub national_number: u64,
    pub is_valid_number: bool,
}

/// Parse a phone number in any punctuation as an E.164 number.
///
/// Everything except ASCII digits is stripped and the remaining digits are
/// read as `+<digits>`.
///
/// # Arguments
/// * `raw` - The number, e.g. `+1 201-555-0123` or `12015550123`.
///
/// # Returns
/// The parsed number, or `DnsError::InvalidNumber` when the digits cannot be
/// read as an international number at all.
pub fn parse(raw: &str) -> Result<ParsedPhone, DnsError> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.is_empty() {
        return Err(DnsError::InvalidNumber(format!("{:?} contains no digits", raw)));
    }

    let number = phonenumber::parse(None, format!("+{}", cleaned))
        .map_err(|e| DnsError::InvalidNumber(format!("+{}: {}", cleaned, e)))?;

    Ok(ParsedPhone {
        country_code: number.country().code(),
        national_number: number.national().value(),
        is_valid_number: phonenumber::is_valid(&number),
    })
}

/// Format a national number and country code as E.164.
pub fn format(national_number: u64, country_code: u16) -> Result<String, DnsError> {
    let raw = format!("+{}{}", country_code, national_number);
    let number = phonenumber::parse(None, &raw)
        .map_err(|e| DnsError::InvalidNumber(format!("{}: {}", raw, e)))?;
    Ok(number.format().mode(Mode::E164).to_string())
}

/// Digits of an ENUM domain in dialling order.
///
/// The labels before the first label that is longer than one character and
/// not purely numeric (the start of the ENUM suffix, e.g. `e164enum.net`)
/// are reversed and concatenated. When no such label exists every label is
/// used; the final label is not assumed to be a suffix and dropped.
pub fn enum_domain_to_digits(domain: &str) -> String {
    let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
    let suffix_at = labels
        .iter()
        .position(|label| label.len() > 1 && !label.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(labels.len());

    labels[..suffix_at].iter().rev().copied().collect()
}

/// Decode an ENUM domain into a parsed phone number.
pub fn enum_domain_to_parsed_phone(domain: &str) -> Result<ParsedPhone, DnsError> {
    parse(&enum_domain_to_digits(domain))
}

/// Build the ENUM domain of an E.164 number under `suffix`.
pub fn phone_to_enum_domain(e164: &str, suffix: &str) -> String {
    let mut labels: Vec<String> = e164
        .chars()
        .filter(|c| c.is_ascii_digit())
        .rev()
        .map(String::from)
        .collect();
    labels.push(suffix.trim_matches('.').to_string());
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_labels_before_suffix() {
        assert_eq!(
            enum_domain_to_digits("9.0.3.5.7.6.8.5.5.5.1.e164enum.net"),
            "15558675309"
        );
        assert_eq!(
            enum_domain_to_digits("7.6.5.4.3.2.1.5.5.5.1.e164.enum.net."),
            "15551234567"
        );
    }

    #[test]
    fn numeric_multi_digit_labels_are_not_a_suffix() {
        assert_eq!(enum_domain_to_digits("3.21.1.e164enum.net"), "1213");
    }

    #[test]
    fn domain_without_suffix_uses_every_label() {
        assert_eq!(enum_domain_to_digits("3.2.1"), "123");
        assert_eq!(enum_domain_to_digits("example.com"), "");
    }

    #[test]
    fn decodes_number_built_from_reversed_digits() {
        let domain = phone_to_enum_domain("+15558675309", "e164enum.net");
        assert_eq!(domain, "9.0.3.5.7.6.8.5.5.5.1.e164enum.net");

        let parsed = enum_domain_to_parsed_phone(&domain).unwrap();
        assert_eq!(parsed.country_code, 1);
        assert_eq!(parsed.national_number, 5558675309);
    }

    #[test]
    fn valid_number_is_flagged_valid() {
        let parsed = enum_domain_to_parsed_phone("3.2.1.0.5.5.5.1.0.2.1.e164enum.net").unwrap();
        assert_eq!(parsed.country_code, 1);
        assert_eq!(parsed.national_number, 2015550123);
        assert!(parsed.is_valid_number);
    }

    #[test]
    fn parse_ignores_punctuation() {
        let parsed = parse("1-201-555-0123").unwrap();
        assert_eq!(parsed, parse("+12015550123").unwrap());
        assert_eq!(parsed.country_code, 1);
    }

    #[test]
    fn short_number_is_not_valid() {
        let valid = matches!(
            enum_domain_to_parsed_phone("1.2.3.e164enum.net"),
            Ok(parsed) if parsed.is_valid_number
        );
        assert!(!valid);
    }

    #[test]
    fn domain_without_digits_is_an_error() {
        assert!(matches!(
            enum_domain_to_parsed_phone("e164enum.net"),
            Err(DnsError::InvalidNumber(_))
        ));
    }

    #[test]
    fn formats_as_e164() {
        assert_eq!(format(2015550123, 1).unwrap(), "+12015550123");
    }
}
