//! Record merger: joins case metadata with item ranges.
//!
//! Each item range is a closed interval `[start, end]` over a fixed space of
//! [`TOTAL_RANGE`] outcomes; its drop chance is the interval width over that
//! space. When the range is missing or malformed the item's explicit `prob`
//! fraction is used instead, so a case's probabilities need not sum to
//! exactly 100.

use cf_core::types::{CaseRecord, ItemRecord, TOTAL_RANGE};
use serde_json::{Map, Value};
use tracing::debug;

use crate::collector::Collection;
use crate::json_util::{bool_field, parse_f64_field, parse_str_u64, str_field};

/// Number of outcomes in the closed interval `[start, end]`, `None` when
/// inverted or not representable.
#[inline]
fn range_width(start: u64, end: u64) -> Option<u64> {
    end.checked_sub(start)?.checked_add(1)
}

/// Percentage chance of landing in the closed interval `[start, end]`.
///
/// Inverted intervals yield 0.
#[inline]
pub fn range_probability(start: u64, end: u64) -> f64 {
    range_width(start, end).map_or(0.0, |width| width as f64 / TOTAL_RANGE as f64 * 100.0)
}

/// Read a well-formed `[start, end]` pair lying inside the outcome space.
fn parse_range(v: Option<&Value>) -> Option<[u64; 2]> {
    let arr = v?.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let start = parse_str_u64(arr.first())?;
    let end = parse_str_u64(arr.get(1))?;
    if end > TOTAL_RANGE || range_width(start, end)? > TOTAL_RANGE {
        return None;
    }
    Some([start, end])
}

/// Base item name, without the `" (Factory New)"`-style suffix.
fn base_name(name: &str) -> &str {
    name.split(" (").next().unwrap_or(name)
}

/// Build one item from its raw range document.
pub fn parse_item(v: &Value) -> ItemRecord {
    let name = str_field(v, "name").unwrap_or_default().to_string();
    let range = parse_range(v.get("range"));
    let probability = match range {
        Some([start, end]) => range_probability(start, end),
        None => {
            debug!("[merge] item '{name}' has no usable range, using prob");
            parse_f64_field(v, "prob").unwrap_or(0.0) * 100.0
        }
    };

    ItemRecord {
        id: base_name(&name).to_string(),
        name,
        probability,
        price_rub: parse_f64_field(v, "price").unwrap_or(0.0),
        price_usd: parse_f64_field(v, "price_usd"),
        price_eur: parse_f64_field(v, "price_eur"),
        range,
    }
}

fn build_case(id: &str, fields: &Map<String, Value>, items: &[Value]) -> CaseRecord {
    let doc = Value::Object(fields.clone());
    CaseRecord {
        id: id.to_string(),
        name: str_field(&doc, "name").unwrap_or_default().to_string(),
        image: str_field(&doc, "image").unwrap_or_default().to_string(),
        price_rub: parse_f64_field(&doc, "price").unwrap_or(0.0),
        price_usd: parse_f64_field(&doc, "price_usd"),
        price_eur: parse_f64_field(&doc, "price_eur"),
        is_mining_case: bool_field(&doc, "isMiningCase").unwrap_or(false),
        items: items.iter().map(parse_item).collect(),
    }
}

/// One [`CaseRecord`] per case metadata document, ordered by case id.
///
/// Cases without range data merge with an empty item list; range data
/// without a matching case document is dropped.
pub fn merge(collection: &Collection) -> Vec<CaseRecord> {
    let orphans = collection.ranges.keys().filter(|id| !collection.cases.contains_key(*id)).count();
    if orphans > 0 {
        debug!("[merge] dropping {orphans} range sets without case metadata");
    }

    collection
        .cases
        .iter()
        .map(|(id, fields)| {
            let items = collection.ranges.get(id).map(Vec::as_slice).unwrap_or(&[]);
            build_case(id, fields, items)
        })
        .collect()
}
