//! Content fingerprint over an item set.
//!
//! Lines of `id:probability:price_rub` for every item, sorted, joined with
//! `|` and hashed with SHA-256. Decimals are normalised first so `1.50` and
//! `1.5` hash the same, which lets a stored item set (read back from TEXT
//! columns) be compared with a freshly merged one.

use sha2::{Digest, Sha256};

use crate::model::ItemRow;

/// Hex SHA-256 fingerprint of an item set; order of `items` is irrelevant.
pub fn fingerprint(items: &[ItemRow]) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| format!("{}:{}:{}", item.item_id, item.probability.normalize(), item.price_rub.normalize()))
        .collect();
    // Sorting whole lines orders by id first and keeps equal ids deterministic.
    lines.sort_unstable();

    let digest = Sha256::digest(lines.join("|").as_bytes());
    hex::encode(digest)
}
