use rust_decimal::Decimal;
use serde::Serialize;

use crate::differ::{DiffResult, ListingChange};
use crate::models::ListingRecord;

/// A finished alert. `body` is plain text, `html` the same content marked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub html: String,
}

/// One listing in the alert, with the field changes spelled out for CHANGED
struct Entry<'a> {
    record: &'a ListingRecord,
    changes: Vec<String>,
}

impl<'a> Entry<'a> {
    fn unchanged(record: &'a ListingRecord) -> Self {
        Self {
            record,
            changes: Vec::new(),
        }
    }
}

struct Section<'a> {
    title: &'static str,
    entries: Vec<Entry<'a>>,
}

/// Build the alert for a non-empty diff. Output depends only on the inputs.
pub fn compose(diff: &DiffResult, recipient: &str, source_url: &str) -> NotificationMessage {
    let summary = diff.summary();
    let total = summary.added + summary.removed + summary.changed;

    let subject = if diff.baseline {
        format!("🏠 SpotEye: now watching {} apartments", summary.added)
    } else {
        format!("🏠 SpotEye Alert: {total} apartment update(s)")
    };
    let counts = format!(
        "{} new, {} removed, {} changed",
        summary.added, summary.removed, summary.changed
    );

    let sections: Vec<Section<'_>> = [
        Section {
            title: "NEW",
            entries: diff.added.iter().map(Entry::unchanged).collect(),
        },
        Section {
            title: "REMOVED",
            entries: diff.removed.iter().map(Entry::unchanged).collect(),
        },
        Section {
            title: "CHANGED",
            entries: diff
                .changed
                .iter()
                .map(|change| Entry {
                    record: &change.after,
                    changes: change_lines(change),
                })
                .collect(),
        },
    ]
    .into_iter()
    .filter(|section| !section.entries.is_empty())
    .collect();

    NotificationMessage {
        recipient: recipient.to_string(),
        subject,
        body: render_text(&sections, &counts, source_url),
        html: render_html(&sections, &counts, source_url),
    }
}

pub fn test_message(recipient: &str, source_url: &str) -> NotificationMessage {
    NotificationMessage {
        recipient: recipient.to_string(),
        subject: "🧪 SpotEye Test Notification".to_string(),
        body: format!(
            "SpotEye apartment monitor\nSource: {source_url}\n\n\
             Email delivery is configured correctly.\n"
        ),
        html: format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"></head><body>\n\
             <h1>🧪 SpotEye test notification</h1>\n\
             <p>Email delivery is configured correctly.</p>\n\
             <p>Watching <a href=\"{url}\">{url}</a></p>\n</body></html>\n",
            url = escape(source_url)
        ),
    }
}

fn render_text(sections: &[Section<'_>], counts: &str, source_url: &str) -> String {
    let mut lines = vec![
        "SpotEye apartment monitor".to_string(),
        format!("Source: {source_url}"),
        counts.to_string(),
    ];
    for section in sections {
        lines.push(String::new());
        lines.push(format!("{} ({})", section.title, section.entries.len()));
        for entry in &section.entries {
            lines.push(format!("  - {}", headline(entry.record)));
            lines.extend(entry.changes.iter().map(|c| format!("      {c}")));
        }
    }
    lines.push(String::new());
    lines.push("Sent automatically by SpotEye.".to_string());

    let mut body = lines.join("\n");
    body.push('\n');
    body
}

fn render_html(sections: &[Section<'_>], counts: &str, source_url: &str) -> String {
    let mut html = vec![
        "<!DOCTYPE html>".to_string(),
        "<html><head><meta charset=\"UTF-8\"></head>".to_string(),
        "<body style=\"font-family: Arial, sans-serif; color: #333;\">".to_string(),
        "<h1>🏠 SpotEye Apartment Monitor</h1>".to_string(),
        format!("<p>{}</p>", escape(counts)),
    ];
    for section in sections {
        html.push(format!("<h2>{} ({})</h2>", section.title, section.entries.len()));
        html.push("<ul>".to_string());
        for entry in &section.entries {
            // Listings one could still apply for stand out
            let style = if entry.record.availability.is_open() {
                " style=\"color: #c62828;\""
            } else {
                ""
            };
            html.push(format!(
                "<li{style}><strong>{}</strong>",
                escape(&headline(entry.record))
            ));
            if !entry.changes.is_empty() {
                html.push("<ul>".to_string());
                html.extend(entry.changes.iter().map(|c| format!("<li>{}</li>", escape(c))));
                html.push("</ul>".to_string());
            }
            html.push("</li>".to_string());
        }
        html.push("</ul>".to_string());
    }
    let url = escape(source_url);
    html.push(format!("<p><a href=\"{url}\">Open the listing page</a></p>"));
    html.push("<p style=\"color: #666;\">Sent automatically by SpotEye.</p>".to_string());
    html.push("</body></html>".to_string());

    let mut out = html.join("\n");
    out.push('\n');
    out
}

fn headline(record: &ListingRecord) -> String {
    let price = match record.price {
        Some(price) => format!("{}/month", euros(price)),
        None => "price not specified".to_string(),
    };
    let mut line = format!(
        "{} | {price} | {} | {}",
        record.id, record.description, record.availability
    );
    if let Some(date) = record.available_date {
        line.push_str(&format!(" from {date}"));
    }
    line
}

fn change_lines(change: &ListingChange) -> Vec<String> {
    let (before, after) = (&change.before, &change.after);
    change
        .fields
        .iter()
        .map(|field| match *field {
            "price" => format!(
                "price: {} -> {}",
                optional(before.price.map(euros)),
                optional(after.price.map(euros))
            ),
            "size_sqm" => format!(
                "size: {} -> {}",
                optional(before.size_sqm.map(|s| format!("{s} m²"))),
                optional(after.size_sqm.map(|s| format!("{s} m²")))
            ),
            "description" => format!("description: {} -> {}", before.description, after.description),
            "availability" => format!("status: {} -> {}", before.availability, after.availability),
            "available_date" => format!(
                "available from: {} -> {}",
                optional(before.available_date.map(|d| d.to_string())),
                optional(after.available_date.map(|d| d.to_string()))
            ),
            other => format!("{other} updated"),
        })
        .collect()
}

fn euros(amount: Decimal) -> String {
    format!("€{amount:.2}")
}

fn optional(value: Option<String>) -> String {
    value.unwrap_or_else(|| "not specified".to_string())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
