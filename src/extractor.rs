use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::models::{Availability, ListingRecord, ListingSet};

/// Tried in order; the first one that yields substantial rows wins.
const CANDIDATE_SELECTORS: &[&str] = &[
    "tr[data-apartment]",
    ".apartment-row",
    "tbody tr",
    "table tr",
    ".apartment",
    "[class*=\"apartment\"]",
];

/// Rows with less text than this are headers or spacers.
const MIN_ROW_TEXT_LEN: usize = 20;

const LOCATIONS: &[&str] = &["Inner courtyard", "Wilhelmstraße", "Südstraße"];

static SELECTORS: LazyLock<Vec<(&'static str, Selector)>> = LazyLock::new(|| {
    CANDIDATE_SELECTORS
        .iter()
        .map(|s| (*s, Selector::parse(s).expect("valid selector")))
        .collect()
});
static UNIT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*/\s*(\d+)").expect("valid regex"));
/// Grouped amounts like `1,250.00` or `1.250,00` first, then plain decimals
static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+[.,]\d+").expect("valid regex")
});
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"));

/// Turns a rendered listing page into a [`ListingSet`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ListingExtractor;

impl ListingExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parse every listing row in `html`, stamping records with `observed_at`.
    pub fn extract(&self, html: &str, observed_at: DateTime<Utc>) -> Result<ListingSet, ParseError> {
        let document = Html::parse_document(html);

        let Some((selector, rows)) = find_rows(&document) else {
            warn!(bytes = html.len(), "no listing rows matched any selector");
            return Err(ParseError::StructureMissing { bytes: html.len() });
        };
        info!(selector, rows = rows.len(), "found listing rows");

        let mut listings = ListingSet::new();
        for row in &rows {
            let Some(record) = parse_row(row, observed_at) else {
                debug!("skipping row without apartment identifier");
                continue;
            };
            let id = record.id.clone();
            if !listings.insert(record) {
                warn!(id, "duplicate listing id on page, keeping first occurrence");
            }
        }

        if listings.is_empty() {
            return Err(ParseError::NoIdentifiableListings { rows: rows.len() });
        }

        info!(listings = listings.len(), "extracted listings");
        debug!(ids = ?listings.ids().collect::<Vec<_>>(), "listing ids in page order");
        Ok(listings)
    }
}

fn find_rows(document: &Html) -> Option<(&'static str, Vec<ElementRef<'_>>)> {
    SELECTORS.iter().find_map(|(name, selector)| {
        let rows: Vec<_> = document
            .select(selector)
            .filter(|el| row_lines(el).join(" ").len() > MIN_ROW_TEXT_LEN)
            .collect();
        (!rows.is_empty()).then_some((*name, rows))
    })
}

/// Text nodes of an element, trimmed, with blanks dropped
fn row_lines(element: &ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_row(row: &ElementRef<'_>, observed_at: DateTime<Utc>) -> Option<ListingRecord> {
    let lines = row_lines(row);

    // Everything before the status marker describes the unit
    let status_pos = lines.iter().position(|l| status_of(l).is_some());
    let (header_lines, rest) = match status_pos {
        Some(pos) => lines.split_at(pos),
        None => (&lines[..], &[][..]),
    };
    let header = header_lines.join(" ");

    let caps = UNIT_ID_RE.captures(&header)?;
    let floor = caps[1].to_string();
    let apartment_number = caps[2].to_string();

    let mut attributes = BTreeMap::new();
    attributes.insert("floor".to_string(), floor.clone());
    attributes.insert("apartment_number".to_string(), apartment_number.clone());

    let unit_type = ["Single", "Partner"]
        .into_iter()
        .find(|t| header.contains(t));
    if let Some(t) = unit_type {
        attributes.insert("type".to_string(), t.to_string());
    }

    let balcony = if header.contains("no balcony") {
        Some("no")
    } else if header.contains("balcony") {
        Some("yes")
    } else {
        None
    };
    if let Some(b) = balcony {
        attributes.insert("balcony".to_string(), b.to_string());
    }

    let barrier_free = header.contains("barrier-free");
    attributes.insert("barrier_free".to_string(), barrier_free.to_string());

    let location = LOCATIONS
        .iter()
        .find(|l| header.contains(*l))
        .map(|l| l.replace('ß', "ss"));
    if let Some(l) = &location {
        attributes.insert("location".to_string(), l.clone());
    }

    // Keep any data-* attributes the page attaches to the row
    for (name, value) in row.value().attrs() {
        if let Some(key) = name.strip_prefix("data-") {
            attributes.insert(format!("data_{key}"), value.to_string());
        }
    }

    let numbers: Vec<Decimal> = DECIMAL_RE
        .find_iter(&header)
        .filter_map(|m| parse_amount(m.as_str()))
        .collect();
    let (size_sqm, price) = match numbers.as_slice() {
        [.., size, price] => (Some(size.round_dp(2)), Some(price.round_dp(2))),
        _ => (None, None),
    };

    let availability = rest
        .first()
        .and_then(|l| status_of(l))
        .unwrap_or(Availability::Unknown);
    let available_date = if availability == Availability::Soon {
        rest.iter()
            .skip(1)
            .find_map(|l| DATE_RE.find(l))
            .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
    } else {
        None
    };

    Some(ListingRecord {
        id: format!("{floor}-{apartment_number}"),
        price,
        size_sqm,
        description: describe(unit_type, balcony, location.as_deref(), barrier_free),
        availability,
        available_date,
        attributes,
        observed_at,
    })
}

/// Read a page amount in either English or German notation.
///
/// The last separator is the decimal point unless exactly three digits
/// follow it, in which case it groups thousands.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let (whole, fraction) = match raw.rfind(['.', ',']) {
        Some(pos) if raw.len() - pos - 1 != 3 => (&raw[..pos], &raw[pos + 1..]),
        _ => (raw, ""),
    };
    let digits: String = whole.chars().filter(char::is_ascii_digit).collect();
    if fraction.is_empty() {
        Decimal::from_str(&digits).ok()
    } else {
        Decimal::from_str(&format!("{digits}.{fraction}")).ok()
    }
}

fn status_of(line: &str) -> Option<Availability> {
    if line.contains("Already taken") {
        Some(Availability::Taken)
    } else if line.contains("Soon available") {
        Some(Availability::Soon)
    } else if line.contains("Apply now") {
        Some(Availability::Available)
    } else {
        None
    }
}

fn describe(
    unit_type: Option<&str>,
    balcony: Option<&str>,
    location: Option<&str>,
    barrier_free: bool,
) -> String {
    let mut parts = Vec::new();
    parts.push(format!("{} apartment", unit_type.unwrap_or("Unknown")));
    match balcony {
        Some("yes") => parts.push("balcony".to_string()),
        Some(_) => parts.push("no balcony".to_string()),
        None => {}
    }
    if let Some(l) = location {
        parts.push(l.to_string());
    }
    if barrier_free {
        parts.push("barrier-free".to_string());
    }
    parts.join(", ")
}
