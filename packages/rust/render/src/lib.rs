//! Battle-card output rendering.
//!
//! Everything here is a pure function over a [`RunState`] snapshot: the
//! writing prompt the Synthesize phase sends to the model, the final Markdown
//! document, the raw-data JSON companion file, and the filename slug. No IO,
//! no failure modes beyond JSON serialization.

use battlecard_shared::RunState;
use serde::Serialize;

/// Fixed section layout of a battle card.
const SECTIONS: [&str; 5] = [
    "What They Do",
    "Key Competitors",
    "Pricing Structure",
    "Recent News & Updates",
    "Sales Strategy Tips",
];

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Build the battle-card writing prompt from collected state.
///
/// The model is asked to write the full document and is constrained to the
/// data included here; missing fields are spelled out as unknown rather than
/// omitted, so the model states the gap instead of inventing a value.
pub fn synthesis_prompt(state: &RunState) -> String {
    let company = &state.company_name;
    let website = state.official_site.as_deref().unwrap_or("Not found");
    let description = state.description.as_deref().unwrap_or("Not available");

    let competitors = if state.competitors.is_empty() {
        "Unknown".to_string()
    } else {
        state.competitors.join(", ")
    };

    let pricing = match &state.pricing_record {
        Some(record) => {
            let mut lines = Vec::with_capacity(record.len());
            for (plan, details) in record {
                let mut line = format!("- **{plan}:** {}", details.price);
                if let Some(period) = &details.billing_period {
                    line.push_str(&format!(" ({period})"));
                }
                if !details.features.is_empty() {
                    line.push_str(&format!(" — {}", details.features.join(", ")));
                }
                lines.push(line);
            }
            lines.join("\n")
        }
        None => "Unknown".to_string(),
    };

    let news = if state.news_items.is_empty() {
        "No recent news available".to_string()
    } else {
        state
            .news_items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {} ({})", i + 1, item.headline, item.url))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let layout = SECTIONS
        .iter()
        .enumerate()
        .map(|(i, s)| format!("## {}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a Sales Assistant. Write a professional Battle Card for {company}.\n\
         \n\
         INSTRUCTIONS:\n\
         - Use ONLY the data provided below\n\
         - Do NOT invent information not present in the data\n\
         - Keep it concise and sales-focused\n\
         - Use markdown formatting for readability\n\
         - If any information is missing or \"Unknown\", clearly state it as such\n\
         \n\
         DATA PROVIDED:\n\
         ---\n\
         Company: {company}\n\
         Website: {website}\n\
         Description: {description}\n\
         Competitors: {competitors}\n\
         \n\
         Pricing Information:\n\
         {pricing}\n\
         \n\
         Recent News/Blog Headlines:\n\
         {news}\n\
         ---\n\
         \n\
         BATTLE CARD LAYOUT:\n\
         Create a battle card with these sections:\n\
         \n\
         # Battle Card: {company}\n\
         \n\
         {layout}\n\
         \n\
         Write the complete battle card now:"
    )
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// The final Markdown document.
///
/// When a synthesis narrative is present (the normal case, since Deliver runs
/// after Synthesize) it is the document. Without one, fall back to a
/// data-only card so rendering is total over any state.
pub fn render_markdown(state: &RunState) -> String {
    if let Some(synthesis) = &state.synthesis {
        let mut doc = synthesis.trim().to_string();
        doc.push('\n');
        return doc;
    }

    let mut doc = format!("# Battle Card: {}\n", state.company_name);
    for (i, section) in SECTIONS.iter().enumerate() {
        doc.push_str(&format!("\n## {}. {section}\n\n", i + 1));
        let body = match i {
            0 => state
                .description
                .clone()
                .unwrap_or_else(|| "Not available".into()),
            1 => {
                if state.competitors.is_empty() {
                    "Unknown".into()
                } else {
                    state
                        .competitors
                        .iter()
                        .map(|c| format!("- {c}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            2 => match &state.pricing_record {
                Some(record) => record
                    .iter()
                    .map(|(plan, d)| format!("- **{plan}:** {}", d.price))
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => "Unknown".into(),
            },
            3 => {
                if state.news_items.is_empty() {
                    "No recent news available".into()
                } else {
                    state
                        .news_items
                        .iter()
                        .map(|n| format!("- [{}]({})", n.headline, n.url))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            _ => "Not available".into(),
        };
        doc.push_str(&body);
        doc.push('\n');
    }
    doc
}

// ---------------------------------------------------------------------------
// Raw data
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RawData<'a> {
    company_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    website: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    competitors: &'a [String],
    pricing_record: &'a Option<battlecard_shared::PricingRecord>,
    news_items: &'a [battlecard_shared::NewsItem],
}

/// Pretty-printed JSON companion holding the structured data behind the card.
pub fn raw_data_json(state: &RunState) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&RawData {
        company_name: &state.company_name,
        website: state.official_site.as_deref(),
        description: state.description.as_deref(),
        competitors: &state.competitors,
        pricing_record: &state.pricing_record,
        news_items: &state.news_items,
    })
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Filesystem-safe slug for artifact filenames: lowercase, runs of
/// non-alphanumeric characters collapsed to a single underscore.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("company");
    }
    slug
}
