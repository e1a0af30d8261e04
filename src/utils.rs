use crate::schema::SortOrder;
use serde_json::Value;
use std::cmp::Ordering;

/// Lenient numeric coercion: numbers and numeric strings pass through,
/// anything else (including non-finite values) becomes `0.0`.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    coerce_optional_number(value).unwrap_or(0.0)
}

/// Like [`coerce_number`] but keeps absence distinct from zero: a missing or
/// null field is `None`, a present but malformed one is `Some(0.0)`.
pub fn coerce_optional_number(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    let number = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Some(number.filter(|n| n.is_finite()).unwrap_or(0.0))
}

/// Strings pass through, numbers and booleans are rendered, anything else is `None`.
pub fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A free-text filter counts only when it has non-whitespace content.
pub fn active_filter(filter: &Option<String>) -> Option<&str> {
    filter.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

pub fn eq_ignore_case(value: Option<&str>, expected: &str) -> bool {
    value
        .map(|v| v.trim().to_lowercase() == expected.trim().to_lowercase())
        .unwrap_or(false)
}

pub fn compare_values(a: f64, b: f64, order: SortOrder) -> Ordering {
    let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Stable sort by an extracted numeric key; ties keep their incoming order.
pub fn sort_by_value<T, F>(items: &mut [T], order: SortOrder, key: F)
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| compare_values(key(a), key(b), order));
}

pub fn apply_limit<T>(items: &mut Vec<T>, limit: Option<u32>) {
    if let Some(limit) = limit {
        items.truncate(limit as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(Some(&json!(12))), 12.0);
        assert_eq!(coerce_number(Some(&json!(1.5))), 1.5);
        assert_eq!(coerce_number(Some(&json!(" 42 "))), 42.0);
        assert_eq!(coerce_number(Some(&json!("n/a"))), 0.0);
        assert_eq!(coerce_number(Some(&json!(true))), 0.0);
        assert_eq!(coerce_number(Some(&json!("inf"))), 0.0);
        assert_eq!(coerce_number(None), 0.0);
    }

    #[test]
    fn test_coerce_optional_number_keeps_absence() {
        assert_eq!(coerce_optional_number(None), None);
        assert_eq!(coerce_optional_number(Some(&Value::Null)), None);
        assert_eq!(coerce_optional_number(Some(&json!(0))), Some(0.0));
        assert_eq!(coerce_optional_number(Some(&json!({"x": 1}))), Some(0.0));
    }

    #[test]
    fn test_coerce_string() {
        assert_eq!(coerce_string(Some(&json!("Pune"))), Some("Pune".to_string()));
        assert_eq!(coerce_string(Some(&json!(101))), Some("101".to_string()));
        assert_eq!(coerce_string(Some(&json!(["a"]))), None);
        assert_eq!(coerce_string(Some(&Value::Null)), None);
        assert_eq!(coerce_string(None), None);
    }

    #[test]
    fn test_active_filter() {
        assert_eq!(active_filter(&Some("  pune ".to_string())), Some("pune"));
        assert_eq!(active_filter(&Some("   ".to_string())), None);
        assert_eq!(active_filter(&None), None);
    }

    #[test]
    fn test_case_insensitive_matching() {
        assert!(contains_ignore_case(Some("North Pune"), "pune"));
        assert!(!contains_ignore_case(None, "pune"));
        assert!(eq_ignore_case(Some("School"), "school"));
        assert!(!eq_ignore_case(Some("High School"), "school"));
    }

    #[test]
    fn test_sort_is_stable() {
        let mut items = vec![("a", 1.0), ("b", 2.0), ("c", 1.0), ("d", 2.0)];
        sort_by_value(&mut items, SortOrder::Desc, |item| item.1);
        let names: Vec<&str> = items.iter().map(|item| item.0).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);

        sort_by_value(&mut items, SortOrder::Asc, |item| item.1);
        let names: Vec<&str> = items.iter().map(|item| item.0).collect();
        assert_eq!(names, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_apply_limit() {
        let mut items = vec![1, 2, 3];
        apply_limit(&mut items, Some(5));
        assert_eq!(items.len(), 3);
        apply_limit(&mut items, Some(2));
        assert_eq!(items, vec![1, 2]);
        apply_limit(&mut items, None);
        assert_eq!(items, vec![1, 2]);
    }
}
