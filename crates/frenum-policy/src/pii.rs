//! PII Detectors (C2): a fixed registry of named, deterministic scanners.
//!
//! Every detector is a pure function over a string, returning byte-offset
//! spans. The registry is a closed enum rather than a string-keyed map, so
//! an unknown detector name is caught by [`DetectorName::parse`] and
//! surfaced by the linter as `E002`.

use regex::Regex;
use std::sync::OnceLock;

/// A single detector match within a scanned string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Byte offset of the match start.
    pub start: usize,
    /// Byte offset one past the match end.
    pub end: usize,
    /// Name of the detector that produced this finding.
    pub detector: DetectorName,
}

/// The fixed PII detector registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorName {
    /// RFC-5322-lite email address.
    Email,
    /// International phone number.
    PhoneIntl,
    /// Hong Kong identity card number.
    HkId,
    /// Payment card number, Luhn-validated.
    CreditCard,
    /// U.S. Social Security Number.
    Ssn,
}

impl DetectorName {
    /// Parse a detector name as it appears in policy documents.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "email" => Some(Self::Email),
            "phone_intl" => Some(Self::PhoneIntl),
            "hk_id" => Some(Self::HkId),
            "credit_card" => Some(Self::CreditCard),
            "ssn" => Some(Self::Ssn),
            _ => None,
        }
    }

    /// The canonical name as it appears in policy documents and messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::PhoneIntl => "phone_intl",
            Self::HkId => "hk_id",
            Self::CreditCard => "credit_card",
            Self::Ssn => "ssn",
        }
    }

    /// Scan `text` for matches of this detector, sorted by start offset.
    #[must_use]
    pub fn scan(self, text: &str) -> Vec<Finding> {
        match self {
            Self::Email => scan_email(text),
            Self::PhoneIntl => scan_phone_intl(text),
            Self::HkId => scan_hk_id(text),
            Self::CreditCard => scan_credit_card(text),
            Self::Ssn => scan_ssn(text),
        }
    }
}

impl std::fmt::Display for DetectorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan `text` with every detector in `selected`, returning findings sorted
/// by `(start, detector_name)` for determinism.
#[must_use]
pub fn scan(text: &str, selected: &[DetectorName]) -> Vec<Finding> {
    let mut out: Vec<Finding> = selected.iter().flat_map(|d| d.scan(text)).collect();
    out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.detector.as_str().cmp(b.detector.as_str())));
    out
}

fn regex_once(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("built-in detector pattern is valid"))
}

fn scan_email(text: &str) -> Vec<Finding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_once(&RE, r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}");
    re.find_iter(text)
        .map(|m| Finding { start: m.start(), end: m.end(), detector: DetectorName::Email })
        .collect()
}

fn scan_phone_intl(text: &str) -> Vec<Finding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_once(&RE, r"\+\d{1,3}[\s\-]?\d{4,14}");
    re.find_iter(text)
        .map(|m| Finding { start: m.start(), end: m.end(), detector: DetectorName::PhoneIntl })
        .collect()
}

fn scan_hk_id(text: &str) -> Vec<Finding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_once(&RE, r"[A-Z]{1,2}\d{6}\(?[0-9A]\)?");
    re.find_iter(text)
        .filter(|m| hk_id_checksum_valid(m.as_str()))
        .map(|m| Finding { start: m.start(), end: m.end(), detector: DetectorName::HkId })
        .collect()
}

/// HKID check-digit validation: the letter(s) and six digits are weighted
/// 9 down through 2 (a single-letter prefix is padded with a leading zero
/// weight so the digit weights land the same as the two-letter case), the
/// weighted sum taken modulo 11, and the check character compared against
/// the digit that brings the remainder back to the expected residue.
/// `A` represents check value 10.
fn hk_id_checksum_valid(raw: &str) -> bool {
    let cleaned: String = raw.chars().filter(|c| *c != '(' && *c != ')').collect();
    let chars: Vec<char> = cleaned.chars().collect();
    let (letters, rest): (Vec<char>, Vec<char>) = {
        let letter_count = chars.iter().take_while(|c| c.is_ascii_alphabetic()).count();
        (chars[..letter_count].to_vec(), chars[letter_count..].to_vec())
    };
    if letters.is_empty() || letters.len() > 2 || rest.len() != 7 {
        return false;
    }
    let digits = &rest[..6];
    let check = rest[6];
    let mut weighted = Vec::with_capacity(8);
    if letters.len() == 1 {
        weighted.push(0u32);
    }
    for &c in &letters {
        weighted.push(letter_value(c));
    }
    for &c in digits {
        weighted.push(c.to_digit(10).unwrap_or(0));
    }
    let mut sum = 0u32;
    let mut weight = 9u32;
    for v in weighted {
        sum += v * weight;
        weight -= 1;
    }
    let check_value = if check == 'A' { 10 } else { check.to_digit(10).unwrap_or(99) };
    let remainder = sum % 11;
    let expected = (10 + 11 - remainder) % 11;
    expected == check_value
}

fn letter_value(c: char) -> u32 {
    (c.to_ascii_uppercase() as u32) - ('A' as u32) + 10
}

fn scan_credit_card(text: &str) -> Vec<Finding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_once(&RE, r"\d(?:[ \-]?\d){12,18}");
    re.find_iter(text)
        .filter(|m| luhn_valid(m.as_str()))
        .map(|m| Finding { start: m.start(), end: m.end(), detector: DetectorName::CreditCard })
        .collect()
}

fn luhn_valid(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter(|c| c.is_ascii_digit()).filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for &d in digits.iter().rev() {
        let mut v = d;
        if double {
            v *= 2;
            if v > 9 {
                v -= 9;
            }
        }
        sum += v;
        double = !double;
    }
    sum % 10 == 0
}

fn scan_ssn(text: &str) -> Vec<Finding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_once(&RE, r"\d{3}-\d{2}-\d{4}");
    re.find_iter(text)
        .filter(|m| ssn_valid(m.as_str()))
        .map(|m| Finding { start: m.start(), end: m.end(), detector: DetectorName::Ssn })
        .collect()
}

fn ssn_valid(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    let area: u32 = parts[0].parse().unwrap_or(0);
    let group: u32 = parts[1].parse().unwrap_or(0);
    let serial: u32 = parts[2].parse().unwrap_or(0);
    if area == 0 || area == 666 || (900..=999).contains(&area) {
        return false;
    }
    if group == 0 {
        return false;
    }
    if serial == 0 {
        return false;
    }
    true
}
