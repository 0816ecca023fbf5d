use std::collections::BTreeSet;

use serde_json::Value;

/// Distinct `disease.name` values across evidence items, in ascending order.
/// Items without a disease name are ignored.
pub fn disease_names(evidence: &[Value]) -> BTreeSet<&str> {
    evidence
        .iter()
        .filter_map(|item| item.get("disease")?.get("name")?.as_str())
        .collect()
}

/// The persisted `diseases` column: sorted, deduplicated, joined with ", ".
pub fn aggregate(evidence: &[Value]) -> String {
    disease_names(evidence)
        .into_iter()
        .collect::<Vec<_>>()
        .join(", ")
}
