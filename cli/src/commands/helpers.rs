use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use larder_core::db::Database;
use larder_core::models::Unit;
use larder_core::units::{PIECE, canonical_unit_name};

/// Parse a quantity with an optional unit, returning `(quantity, raw_unit)`.
/// Accepts: "3", "200g", "500ml", "500 ml", "2 tbsp", "1.5 kg", etc.
pub(crate) fn parse_quantity_with_unit(s: &str) -> Result<(f64, Option<String>)> {
    let s = s.trim();

    let (qty, unit) = if let Ok(q) = s.parse::<f64>() {
        (q, None)
    } else if let Some((q, unit)) = split_number_unit(s) {
        (q, Some(unit.trim().to_string()))
    } else {
        let parts: Vec<&str> = s.splitn(2, char::is_whitespace).collect();
        if parts.len() != 2 {
            bail!("Invalid quantity: '{s}'. Use '3', '200g', '500 ml', '2 tbsp', etc.");
        }
        let q: f64 = parts[0]
            .parse()
            .with_context(|| format!("Invalid quantity: '{s}'"))?;
        (q, Some(parts[1].trim().to_string()))
    };

    if !qty.is_finite() || qty <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok((qty, unit.filter(|u| !u.is_empty())))
}

/// Split "500ml" or "2.5tbsp" into (500.0, "ml") or (2.5, "tbsp").
fn split_number_unit(s: &str) -> Option<(f64, &str)> {
    let idx = s.find(|c: char| c.is_alphabetic())?;
    if idx == 0 {
        return None;
    }
    let (num_part, unit_part) = s.split_at(idx);
    let qty: f64 = num_part.trim().parse().ok()?;
    if unit_part.is_empty() {
        return None;
    }
    Some((qty, unit_part))
}

/// Map a typed unit onto a unit row. Known spellings resolve to the canonical
/// unit; anything else becomes (or reuses) a custom unit of that name.
/// No unit at all means "piece".
pub(crate) fn resolve_unit(db: &Database, raw: Option<&str>) -> Result<Unit> {
    let name = match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => PIECE.to_string(),
        Some(r) => canonical_unit_name(r).map_or_else(|| r.to_lowercase(), str::to_string),
    };
    db.get_or_create_unit(&name)
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Display a quantity with at most two decimals and no trailing zeros.
pub(crate) fn fmt_quantity(v: f64) -> String {
    let s = format!("{:.2}", no_neg_zero(v));
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
