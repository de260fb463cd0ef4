//! Name, type and signature normalization
//!
//! Pure string functions; every result depends only on the input text.

use std::collections::BTreeMap;

/// Role suffixes that do not change what a name refers to
const ROLE_SUFFIXES: [&str; 6] = ["Model", "Service", "Handler", "Controller", "Spec", "Interface"];

/// Suffixes dropped from normalized constraint targets
const TARGET_SUFFIXES: [&str; 2] = [" model", " service"];

/// Canonical, space-separated lowercase form of an interface name
///
/// Drops one trailing role suffix (`UserAuthHandler` → `UserAuth`) when
/// something remains, then splits on case boundaries, `_` and `-`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let stem = ROLE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix).filter(|rest| !rest.is_empty()))
        .unwrap_or(name);

    stem.split(['_', '-', ' '])
        .flat_map(split_case)
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on lower→upper transitions and before the last capital of an acronym
fn split_case(word: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    let mut words = Vec::new();
    let mut start = 0;
    for i in 1..chars.len() {
        let (at, c) = chars[i];
        if !c.is_uppercase() {
            continue;
        }
        let prev_lower = chars[i - 1].1.is_lowercase();
        let next_lower = chars.get(i + 1).is_some_and(|(_, n)| n.is_lowercase());
        if prev_lower || (next_lower && chars[i - 1].1.is_uppercase()) {
            words.push(&word[start..at]);
            start = at;
        }
    }
    if start < word.len() {
        words.push(&word[start..]);
    }
    words
}

/// Whether two names refer to the same concept
///
/// True when the normalized forms are equal or one contains the other.
/// Empty names never overlap.
#[must_use]
pub fn names_overlap(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Canonical form of a type annotation
///
/// Unwraps optionals, maps list-like containers to `list[T]` and folds
/// common aliases across Python and Rust spellings.
#[must_use]
pub fn normalize_type(ty: &str) -> String {
    let mut ty = ty.trim();
    if let Some(inner) = ty.strip_prefix("Optional[").and_then(|t| t.strip_suffix(']')) {
        ty = inner.trim();
    }
    if ty.contains('|') {
        match ty.split('|').map(str::trim).find(|part| *part != "None") {
            Some(part) => ty = part,
            None => return String::new(),
        }
    }
    if let Some(inner) = list_element(ty) {
        return format!("list[{}]", normalize_type(inner));
    }
    match ty {
        "UUID" | "uuid" | "Uuid" => "uuid".into(),
        "str" | "String" | "string" | "&str" => "str".into(),
        "int" | "i32" | "i64" | "i128" | "u32" | "u64" | "usize" => "int".into(),
        "float" | "f32" | "f64" => "float".into(),
        "bool" | "boolean" => "bool".into(),
        other => other.to_lowercase(),
    }
}

fn list_element(ty: &str) -> Option<&str> {
    ["list[", "List["]
        .iter()
        .find_map(|open| ty.strip_prefix(open).and_then(|t| t.strip_suffix(']')))
        .or_else(|| ty.strip_prefix("Vec<").and_then(|t| t.strip_suffix('>')))
        .map(str::trim)
}

/// Parse `field: type, field: type` into a field map
///
/// Parts without a `:` are ignored; a repeated field keeps its last type.
#[must_use]
pub fn parse_signature(signature: &str) -> BTreeMap<String, String> {
    signature
        .split(',')
        .filter_map(|part| part.split_once(':'))
        .map(|(field, ty)| (field.trim().to_string(), ty.trim().to_string()))
        .filter(|(field, _)| !field.is_empty())
        .collect()
}

/// Whether `provided` satisfies `required`
///
/// Every required field must be present in `provided` with the same
/// normalized type. Extra provided fields are fine; an empty requirement is
/// satisfied by anything.
#[must_use]
pub fn signatures_compatible(required: &str, provided: &str) -> bool {
    let required = parse_signature(required);
    if required.is_empty() {
        return true;
    }
    let provided = parse_signature(provided);
    required.iter().all(|(field, ty)| {
        provided
            .get(field)
            .is_some_and(|other| normalize_type(other) == normalize_type(ty))
    })
}

/// Canonical form of a constraint target
#[must_use]
pub fn normalize_constraint_target(target: &str) -> String {
    let spaced = target.to_lowercase().replace(['_', '-'], " ");
    let mut normalized = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    for suffix in TARGET_SUFFIXES {
        if let Some(stem) = normalized.strip_suffix(suffix) {
            normalized = stem.to_string();
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn role_suffix_is_dropped_once() {
        assert_eq!(normalize_name("UserAuthHandler"), "user auth");
        assert_eq!(normalize_name("PaymentService"), "payment");
        assert_eq!(normalize_name("OrderController"), "order");
        assert_eq!(normalize_name("SchemaSpec"), "schema");
        assert_eq!(normalize_name("StorageInterface"), "storage");
        assert_eq!(normalize_name("ServiceModel"), "service");
    }

    #[test]
    fn bare_suffix_is_kept() {
        assert_eq!(normalize_name("Service"), "service");
        assert_eq!(normalize_name("Model"), "model");
    }

    #[test]
    fn case_and_separator_splitting() {
        assert_eq!(normalize_name("UserAuth"), "user auth");
        assert_eq!(normalize_name("user_auth"), "user auth");
        assert_eq!(normalize_name("user-auth"), "user auth");
        assert_eq!(normalize_name("HTTPClient"), "http client");
        assert_eq!(normalize_name("parseJSON"), "parse json");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn overlap_by_equality_prefix_and_containment() {
        assert!(names_overlap("UserAuth", "UserAuthHandler"));
        assert!(names_overlap("Invoice", "InvoiceLine"));
        assert!(names_overlap("LineItem", "InvoiceLineItemModel"));
        assert!(!names_overlap("Invoice", "Shipment"));
        assert!(!names_overlap("", "Invoice"));
        assert!(!names_overlap("Invoice", "   "));
    }

    #[test]
    fn type_aliases_fold() {
        assert_eq!(normalize_type("Uuid"), "uuid");
        assert_eq!(normalize_type("&str"), "str");
        assert_eq!(normalize_type("usize"), "int");
        assert_eq!(normalize_type("f32"), "float");
        assert_eq!(normalize_type("Decimal"), "decimal");
    }

    #[test]
    fn optionals_unwrap() {
        assert_eq!(normalize_type("Optional[int]"), "int");
        assert_eq!(normalize_type("None | String"), "str");
        assert_eq!(normalize_type("None"), "none");
        assert_eq!(normalize_type("None | None"), "");
    }

    #[test]
    fn containers_normalize_recursively() {
        assert_eq!(normalize_type("Vec<i64>"), "list[int]");
        assert_eq!(normalize_type("List[Optional[UUID]]"), "list[uuid]");
        assert_eq!(normalize_type("list[ bool ]"), "list[bool]");
    }

    #[test]
    fn signature_parsing() {
        let fields = parse_signature("id: UUID, total: f64, junk, : int");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["id"], "UUID");
        assert_eq!(fields["total"], "f64");
        assert!(parse_signature("   ").is_empty());
    }

    #[test]
    fn compatibility_is_superset_with_folded_types() {
        assert!(signatures_compatible("id: UUID", "id: uuid, email: String"));
        assert!(signatures_compatible("tags: list[str]", "tags: Vec<String>"));
        assert!(!signatures_compatible("id: UUID, email: str", "id: UUID"));
        assert!(!signatures_compatible("id: UUID", "id: i64"));
        assert!(signatures_compatible("", "anything: int"));
        assert!(signatures_compatible("", ""));
    }

    #[test]
    fn constraint_targets_normalize() {
        assert_eq!(normalize_constraint_target("user-service"), "user");
        assert_eq!(normalize_constraint_target("Order_Model"), "order");
        assert_eq!(normalize_constraint_target("  Billing   Service "), "billing");
        assert_eq!(normalize_constraint_target("Session.token"), "session.token");
        assert_eq!(normalize_constraint_target(""), "");
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in "[A-Za-z_]{0,16}", b in "[A-Za-z_]{0,16}") {
            prop_assert_eq!(names_overlap(&a, &b), names_overlap(&b, &a));
        }

        #[test]
        fn signature_satisfies_itself(
            fields in proptest::collection::btree_map("[a-z]{1,8}", prop_oneof![
                Just("int"), Just("str"), Just("UUID"), Just("Vec<f64>"), Just("Optional[bool]"),
            ], 0..6)
        ) {
            let sig = fields
                .iter()
                .map(|(f, t)| format!("{f}: {t}"))
                .collect::<Vec<_>>()
                .join(", ");
            prop_assert!(signatures_compatible(&sig, &sig));
        }
    }
}
