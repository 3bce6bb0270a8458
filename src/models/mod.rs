mod stats;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use stats::SnapshotStats;

/// Availability status shown on the listing page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Soon,
    Taken,
    Unknown,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Soon => "soon",
            Availability::Taken => "taken",
            Availability::Unknown => "unknown",
        }
    }

    /// Listings a recipient could still apply for.
    pub fn is_open(self) -> bool {
        matches!(self, Availability::Available | Availability::Soon)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One apartment listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    /// Monthly rent in euros, rounded to cents. `None` when the row shows no amount.
    pub price: Option<Decimal>,
    pub size_sqm: Option<Decimal>,
    pub description: String,
    pub availability: Availability,
    pub available_date: Option<NaiveDate>,
    /// Fields the extractor recognised but that have no dedicated column
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Names of the fields that differ from `other`, ignoring `id` and `observed_at`.
    pub fn differing_fields(&self, other: &ListingRecord) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.price != other.price {
            fields.push("price");
        }
        if self.size_sqm != other.size_sqm {
            fields.push("size_sqm");
        }
        if self.description != other.description {
            fields.push("description");
        }
        if self.availability != other.availability {
            fields.push("availability");
        }
        if self.available_date != other.available_date {
            fields.push("available_date");
        }
        if self.attributes != other.attributes {
            fields.push("attributes");
        }
        fields
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Listings keyed by id, in the order they were first inserted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ListingRecord>", into = "Vec<ListingRecord>")]
pub struct ListingSet {
    records: Vec<ListingRecord>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ListingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns `false` and leaves the set untouched if the id is already present.
    pub fn insert(&mut self, record: ListingRecord) -> bool {
        if self.index.contains_key(&record.id) {
            return false;
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn get(&self, id: &str) -> Option<&ListingRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListingRecord> {
        self.records.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }
}

impl<'a> IntoIterator for &'a ListingSet {
    type Item = &'a ListingRecord;
    type IntoIter = std::slice::Iter<'a, ListingRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl TryFrom<Vec<ListingRecord>> for ListingSet {
    type Error = String;

    fn try_from(records: Vec<ListingRecord>) -> Result<Self, Self::Error> {
        let mut set = ListingSet::new();
        for record in records {
            let id = record.id.clone();
            if !set.insert(record) {
                return Err(format!("duplicate listing id {id:?}"));
            }
        }
        Ok(set)
    }
}

impl From<ListingSet> for Vec<ListingRecord> {
    fn from(set: ListingSet) -> Self {
        set.records
    }
}

/// The persisted last known state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub listings: ListingSet,
}

impl Snapshot {
    pub fn new(listings: ListingSet, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            listings,
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats::from_listings(&self.listings)
    }
}
