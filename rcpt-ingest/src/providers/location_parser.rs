//! Store location parsing for raw receipt text
//!
//! The text/location service returns plain OCR text; this module turns the
//! header section of that text into store name, address, phone, postal code
//! and country, and scores how much location information was found.
//!
//! Location confidence weights: store 0.25, address 0.30, phone 0.20,
//! postal code 0.15, country 0.10 (rounded to 2 decimals).

use crate::types::{Amount, ExtractedFields};
use once_cell::sync::Lazy;
use regex::Regex;

const STORE_NAME_LINES: usize = 10;
const ADDRESS_LINES: usize = 15;
const PHONE_LINES: usize = 20;
/// Characters inspected on either side of a postal code candidate
const POSTAL_CONTEXT_CHARS: usize = 30;

const NOISE_PATTERNS: [&str; 5] = ["|", "===", "---", "___", "***"];

const ADDRESS_KEYWORDS: [&str; 17] = [
    "street", "road", "avenue", "blvd", "drive", "lane", "level", "floor", "unit", "#", "bldg",
    "building", "mall", "plaza", "center", "centre", "jalan",
];

static DATE_TIME_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(date|time|am|pm)\b").expect("valid regex"));

static NUMBERED_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+[-\s]+[A-Za-z]").expect("valid regex"));

static JLN_ABBREVIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bjln\b").expect("valid regex"));

static PHONE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Labelled, optional country code
        r"(?i)(?:Tel|Phone|Ph|Contact)[:\s]*\+?\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9}",
        // +XX international
        r"\+\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9}",
        // Malaysian area code (03-XXXXXXX)
        r"0[1-9][-.\s]?\d{3,4}[-.\s]?\d{4}",
        // (XXX) XXX-XXXX
        r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
        r"\d{4}[-.\s]?\d{4}",
        r"\d{8,}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static PHONE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Tel|Phone|Ph|Contact)[:\s]*").expect("valid regex"));

static LABELLED_POSTAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:postal\s*code|post\s*code|postal|zip)[:\s]+([A-Z0-9\s-]{4,10})",
        r"(?i)\b([5-9]\d{4})\s*(?:kuala|lumpur|kl|malaysia)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static CITY_POSTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[$5-9]?\d{4,5}\s+(?:kuala\s+lumpur|kl|selangor|penang|johor|ipoh|melaka)")
        .expect("valid regex")
});

/// Country-specific postal patterns, most specific first
static COUNTRY_POSTAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bS\s*\d{6}\b",                       // Singapore
        r"\b[5-9]\d{4}\b",                          // Malaysia
        r"\b\d{5}(?:-\d{4})?\b",                    // USA
        r"(?i)\b[A-Z]{1,2}\d{1,2}\s*\d[A-Z]{2}\b",  // UK
        r"(?i)\b[A-Z]\d[A-Z]\s*\d[A-Z]\d\b",        // Canada
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Contexts where a postal-looking number is something else
static POSTAL_EXCLUSIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"invoice|receipt|trans|bill|no[:\s.]*\d",
        r"vat\d+",
        r"\d{2}[/-]\d{2}[/-]\d{2}",
        r"[($]\d+[-)]",
        r"sdn\s+bhd",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const EXPLICIT_COUNTRIES: [(&str, &[&str]); 9] = [
    ("Singapore", &["singapore", "republic of singapore"]),
    ("Malaysia", &["malaysia", "kuala lumpur", "selangor", "penang", "johor"]),
    ("Thailand", &["thailand", "bangkok"]),
    ("Indonesia", &["indonesia", "jakarta"]),
    ("Philippines", &["philippines", "manila"]),
    ("Australia", &["australia", "sydney", "melbourne"]),
    ("Canada", &["canada", "toronto", "vancouver"]),
    ("UK", &["united kingdom", "england", "scotland", "wales", "london"]),
    ("USA", &["united states", "america"]),
];

static PHONE_COUNTRY: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("Singapore", r"\+65|^65[-\s]"),
        ("Malaysia", r"\+60|^60[-\s]|03[-\s]\d{4}"),
        ("Thailand", r"\+66|^66[-\s]"),
        ("Indonesia", r"\+62|^62[-\s]"),
        ("Philippines", r"\+63|^63[-\s]"),
        ("USA", r"\+1[-\s]\d{3}"),
        ("UK", r"\+44"),
        ("Australia", r"\+61"),
    ]
    .iter()
    .map(|(country, p)| (*country, Regex::new(p).expect("valid regex")))
    .collect()
});

static MALAYSIA_POSTAL_CITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[5-9]\d{4}\b.*(?:kuala|lumpur|malaysia)").expect("valid regex")
});
static SINGAPORE_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS\s*\d{6}\b").expect("valid regex"));
static UK_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{1,2}\d{1,2}\s*\d[A-Z]{2}\b").expect("valid regex"));
static CANADA_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]\d[A-Z]\s*\d[A-Z]\d\b").expect("valid regex"));
static US_ZIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").expect("valid regex"));
static US_CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(usa|united states|ca|ny|tx|fl)\b").expect("valid regex"));

/// Decimal amount with optional thousands separators ("1,234.56", "45.90")
static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)\.(\d{2})\b").expect("valid regex"));

/// Location details parsed from receipt text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLocation {
    pub store_name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    /// Weighted share of location details found, in [0.0, 1.0]
    pub confidence: f64,
}

impl ParsedLocation {
    /// Result selection score: confidence plus a bonus for a store name
    pub fn score(&self) -> f64 {
        self.confidence + if self.store_name.is_some() { 0.2 } else { 0.0 }
    }
}

/// Parse store location details from OCR text
pub fn parse_location(text: &str) -> ParsedLocation {
    let lines: Vec<&str> = text.lines().collect();

    let store_name = extract_store_name(&lines);
    let address = extract_address(&lines);
    let phone = extract_phone(&lines);
    let postal_code = extract_postal_code(text);
    let country = detect_country(text);

    let mut score = 0.0;
    if store_name.is_some() {
        score += 0.25;
    }
    if address.is_some() {
        score += 0.30;
    }
    if phone.is_some() {
        score += 0.20;
    }
    if postal_code.is_some() {
        score += 0.15;
    }
    if country.is_some() {
        score += 0.10;
    }

    ParsedLocation {
        store_name,
        address,
        phone,
        postal_code,
        country,
        confidence: (score * 100.0_f64).round() / 100.0,
    }
}

/// Parse location and summary amounts into provider fields
///
/// Returns the fields and the location confidence.
pub fn parse_receipt_text(text: &str) -> (ExtractedFields, f64) {
    let location = parse_location(text);
    let amounts = extract_amounts(text);

    let fields = ExtractedFields {
        store_name: location.store_name,
        address: location.address,
        phone: location.phone,
        postal_code: location.postal_code,
        country: location.country,
        total_amount: amounts.total,
        subtotal_amount: amounts.subtotal,
        tax_amount: amounts.tax,
        ..Default::default()
    };

    (fields, location.confidence)
}

fn extract_store_name(lines: &[&str]) -> Option<String> {
    for line in lines.iter().take(STORE_NAME_LINES) {
        let line = line.trim();

        if line.chars().count() < 3 {
            continue;
        }

        let compact: String = line.chars().filter(|c| !matches!(c, ' ' | '.' | '-')).collect();
        if !compact.is_empty() && compact.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        if NOISE_PATTERNS.iter().any(|p| line.contains(p)) {
            continue;
        }

        if DATE_TIME_WORDS.is_match(line) {
            continue;
        }

        let cleaned = clean_ocr_text(line);
        if cleaned.chars().filter(|c| c.is_alphabetic()).count() >= 3 {
            return Some(cleaned);
        }
    }

    None
}

/// Collapse whitespace; fix digit/letter confusion between capitals ("AC0ME" -> "ACOME")
fn clean_ocr_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.chars().any(char::is_alphabetic) {
        return collapsed;
    }

    let chars: Vec<char> = collapsed.chars().collect();
    let mut out = String::with_capacity(collapsed.len());
    for (i, &c) in chars.iter().enumerate() {
        let between_capitals = i > 0
            && chars[i - 1].is_ascii_uppercase()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_uppercase());
        let replacement = match c {
            '|' | '1' if between_capitals => 'I',
            '0' if between_capitals => 'O',
            other => other,
        };
        out.push(replacement);
    }
    out
}

fn extract_address(lines: &[&str]) -> Option<String> {
    let address_lines: Vec<String> = lines
        .iter()
        .take(ADDRESS_LINES)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(clean_address_ocr)
        .filter(|line| {
            let lower = line.to_lowercase();
            ADDRESS_KEYWORDS.iter().any(|k| lower.contains(k))
                || JLN_ABBREVIATION.is_match(line)
                || NUMBERED_ADDRESS.is_match(line)
        })
        .collect();

    (!address_lines.is_empty()).then(|| address_lines.join(" "))
}

/// `$` -> `5`; `O`/`o` -> `0` between digits or trailing a number
fn clean_address_ocr(text: &str) -> String {
    let chars: Vec<char> = text.replace('$', "5").chars().collect();
    let mut out = String::with_capacity(chars.len());

    for (i, &c) in chars.iter().enumerate() {
        let fixed = if matches!(c, 'O' | 'o') && i > 0 && chars[i - 1].is_ascii_digit() {
            match chars.get(i + 1) {
                None => '0',
                Some(next) if next.is_ascii_digit() || next.is_whitespace() => '0',
                Some(_) => c,
            }
        } else {
            c
        };
        out.push(fixed);
    }
    out
}

fn extract_phone(lines: &[&str]) -> Option<String> {
    for line in lines.iter().take(PHONE_LINES) {
        let line = line.replace(['O', 'o'], "0").replace('?', "7");

        for pattern in PHONE_PATTERNS.iter() {
            let Some(m) = pattern.find(&line) else {
                continue;
            };

            let unlabelled = PHONE_LABEL.replace_all(m.as_str(), "");
            let phone: String = unlabelled
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect();

            if phone.chars().filter(char::is_ascii_digit).count() >= 7 {
                return Some(phone);
            }
        }
    }

    None
}

fn clean_postal(candidate: &str) -> String {
    candidate.trim().replace('$', "5").replace(['O', 'o'], "0")
}

fn extract_postal_code(text: &str) -> Option<String> {
    for pattern in LABELLED_POSTAL.iter() {
        if let Some(group) = pattern.captures(text).and_then(|c| c.get(1)) {
            return Some(clean_postal(group.as_str()));
        }
    }

    if let Some(m) = CITY_POSTAL.find(text) {
        let number = m.as_str().split_whitespace().next().unwrap_or_default();
        let postal = clean_postal(number);
        let in_range = postal
            .parse::<u32>()
            .map(|n| (50_000..=99_999).contains(&n))
            .unwrap_or(false);
        if in_range {
            return Some(postal);
        }
    }

    for pattern in COUNTRY_POSTAL.iter() {
        for m in pattern.find_iter(text) {
            let context = surrounding(text, m.start(), m.end(), POSTAL_CONTEXT_CHARS).to_lowercase();
            if POSTAL_EXCLUSIONS.iter().any(|excl| excl.is_match(&context)) {
                continue;
            }
            return Some(clean_postal(m.as_str()));
        }
    }

    None
}

/// Slice of `text` extending up to `radius` characters around `start..end`
fn surrounding(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[from..to]
}

fn detect_country(text: &str) -> Option<String> {
    let lower = text.to_lowercase();

    for (country, keywords) in EXPLICIT_COUNTRIES.iter() {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Some(country.to_string());
        }
    }

    for (country, pattern) in PHONE_COUNTRY.iter() {
        if pattern.is_match(text) {
            return Some(country.to_string());
        }
    }

    if MALAYSIA_POSTAL_CITY.is_match(text) {
        return Some("Malaysia".to_string());
    }
    if SINGAPORE_POSTAL.is_match(text) {
        return Some("Singapore".to_string());
    }
    if UK_POSTAL.is_match(text) {
        return Some("UK".to_string());
    }
    if CANADA_POSTAL.is_match(text) {
        return Some("Canada".to_string());
    }
    if US_ZIP.is_match(text) && US_CONTEXT.is_match(text) {
        return Some("USA".to_string());
    }

    None
}

/// Summary amounts found on "total"/"subtotal"/"tax" lines
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedAmounts {
    pub total: Option<Amount>,
    pub subtotal: Option<Amount>,
    pub tax: Option<Amount>,
}

/// Scan lines for summary amounts; later lines override earlier ones
pub fn extract_amounts(text: &str) -> ParsedAmounts {
    let mut amounts = ParsedAmounts::default();

    for line in text.lines() {
        let Some(amount) = last_amount(line) else {
            continue;
        };
        let lower = line.to_lowercase();

        if lower.contains("subtotal") || lower.contains("sub total") || lower.contains("sub-total") {
            amounts.subtotal = Some(amount);
        } else if lower.contains("total") {
            amounts.total = Some(amount);
        } else if ["tax", "gst", "sst", "vat"].iter().any(|k| lower.contains(k)) {
            amounts.tax = Some(amount);
        }
    }

    amounts
}

fn last_amount(line: &str) -> Option<Amount> {
    let caps = AMOUNT.captures_iter(line).last()?;
    let whole: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    let whole: i64 = whole.parse().ok()?;
    let cents: i64 = caps[2].parse().ok()?;
    Some(Amount::from_minor(whole.checked_mul(100)?.checked_add(cents)?))
}
