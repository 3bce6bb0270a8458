use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::ListingSet;

/// Aggregate view of a snapshot for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotStats {
    pub total: usize,
    pub by_availability: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_location: BTreeMap<String, usize>,
    pub price: Option<PriceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStats {
    pub min: Decimal,
    pub max: Decimal,
    pub avg: Decimal,
    pub count: usize,
}

impl SnapshotStats {
    pub fn from_listings(listings: &ListingSet) -> Self {
        let mut stats = SnapshotStats {
            total: listings.len(),
            ..Default::default()
        };

        let mut prices = Vec::new();
        for record in listings {
            *stats
                .by_availability
                .entry(record.availability.to_string())
                .or_default() += 1;
            let unit_type = record.attribute("type").unwrap_or("unknown");
            *stats.by_type.entry(unit_type.to_string()).or_default() += 1;
            let location = record.attribute("location").unwrap_or("unknown");
            *stats.by_location.entry(location.to_string()).or_default() += 1;

            if let Some(price) = record.price {
                prices.push(price);
            }
        }

        if let (Some(min), Some(max)) = (prices.iter().min(), prices.iter().max()) {
            let sum: Decimal = prices.iter().sum();
            stats.price = Some(PriceStats {
                min: *min,
                max: *max,
                avg: (sum / Decimal::from(prices.len())).round_dp(2),
                count: prices.len(),
            });
        }

        stats
    }
}
