use std::collections::BTreeMap;

use crate::models::{Availability, ListingRecord, Snapshot};

const RULE: &str = "============================================================";

/// Human-readable dump of the stored snapshot, grouped by status.
pub fn render(snapshot: Option<&Snapshot>) -> String {
    let Some(snapshot) = snapshot else {
        return "❌ No snapshot found. Run a check first.\n".to_string();
    };

    let mut lines = vec![
        RULE.to_string(),
        "🏠 SPOTEYE APARTMENT DATA".to_string(),
        RULE.to_string(),
        format!(
            "📅 Last check: {}",
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("📊 Total apartments: {}", snapshot.listings.len()),
        String::new(),
    ];

    if snapshot.listings.is_empty() {
        lines.push("❌ No apartment data available.".to_string());
        return finish(lines);
    }

    let mut by_status: BTreeMap<Availability, Vec<&ListingRecord>> = BTreeMap::new();
    for record in &snapshot.listings {
        by_status.entry(record.availability).or_default().push(record);
    }

    for (status, records) in &by_status {
        lines.push(format!(
            "📋 {} ({} apartments)",
            status.as_str().to_uppercase(),
            records.len()
        ));
        lines.push("-".repeat(40));
        for record in records {
            lines.extend(describe(record));
            lines.push(String::new());
        }
    }

    let stats = snapshot.stats();
    lines.push("📊 SUMMARY".to_string());
    lines.push("-".repeat(20));
    for (status, count) in &stats.by_availability {
        lines.push(format!("   {status}: {count}"));
    }
    if let Some(price) = &stats.price {
        lines.push(format!("   Price range: €{:.2} - €{:.2}", price.min, price.max));
        lines.push(format!("   Average: €{:.2} over {} priced", price.avg, price.count));
    }

    finish(lines)
}

fn describe(record: &ListingRecord) -> Vec<String> {
    let field = |key: &str| record.attribute(key).unwrap_or("N/A").to_string();
    let size = record
        .size_sqm
        .map(|s| format!("{s} m²"))
        .unwrap_or_else(|| "N/A".to_string());
    let price = record
        .price
        .map(|p| format!("€{p:.2}"))
        .unwrap_or_else(|| "N/A".to_string());

    let mut lines = vec![
        format!("🏠 Apartment {}", record.id),
        format!("   Type: {}, Balcony: {}", field("type"), field("balcony")),
        format!("   Location: {}", field("location")),
        format!("   Size: {size}, Price: {price}"),
    ];
    if let Some(date) = record.available_date {
        lines.push(format!("   📅 Available from: {date}"));
    }
    if record.attribute("barrier_free") == Some("true") {
        lines.push("   ♿ Barrier-free accessible".to_string());
    }
    lines
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
