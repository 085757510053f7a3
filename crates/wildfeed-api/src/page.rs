use serde_json::Value;

/// One page of raw records as returned by a `/{source}-observations` endpoint
///
/// Records stay as loose JSON here. Each collection has its own shape and the
/// per-source adapters in core know how to read them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub records: Vec<Value>,
    /// Upstream `meta.total`, or `records.len()` when the field is absent
    pub total: u64,
    /// Set when `data` or `meta` had the wrong shape
    pub malformed: bool,
}

impl RawPage {
    /// Empty page flagged as malformed - zero records, zero total
    pub fn malformed() -> Self {
        Self {
            records: Vec::new(),
            total: 0,
            malformed: true,
        }
    }

    /// Interpret a `{ data: [...], meta: { total } }` body
    ///
    /// Never fails. A missing or non-array `data`, a non-object `meta` or a
    /// non-numeric `meta.total` all degrade to an empty malformed page.
    pub fn from_body(body: Value) -> Self {
        let Value::Object(mut body) = body else {
            return Self::malformed();
        };

        let records = match body.remove("data") {
            Some(Value::Array(records)) => records,
            _ => return Self::malformed(),
        };

        let total = match body.get("meta") {
            None | Some(Value::Null) => records.len() as u64,
            Some(Value::Object(meta)) => match meta.get("total") {
                None | Some(Value::Null) => records.len() as u64,
                Some(total) => match total.as_u64() {
                    Some(total) => total,
                    None => return Self::malformed(),
                },
            },
            Some(_) => return Self::malformed(),
        };

        Self {
            records,
            total,
            malformed: false,
        }
    }

    /// Parse a response body from text; invalid JSON is a malformed page
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(body) => Self::from_body(body),
            Err(_) => Self::malformed(),
        }
    }
}

/// Pull the single numeric field out of a stats response like `{"count": 42}`
pub fn first_number(body: &Value) -> Option<u64> {
    match body {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.values().find_map(|v| v.as_u64()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_data_and_total() {
        let page = RawPage::from_body(json!({
            "data": [{"id": 1}, {"id": 2}],
            "meta": {"total": 40}
        }));
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total, 40);
        assert!(!page.malformed);
    }

    #[test]
    fn test_missing_total_means_no_further_pages() {
        let page = RawPage::from_body(json!({ "data": [{"id": 1}, {"id": 2}, {"id": 3}] }));
        assert_eq!(page.total, 3);
        assert!(!page.malformed);

        let page = RawPage::from_body(json!({ "data": [{"id": 1}], "meta": {} }));
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_wrong_shapes_are_malformed() {
        assert!(RawPage::from_body(json!({ "data": "nope" })).malformed);
        assert!(RawPage::from_body(json!({ "meta": {"total": 4} })).malformed);
        assert!(RawPage::from_body(json!({ "data": [], "meta": [] })).malformed);
        assert!(RawPage::from_body(json!({ "data": [], "meta": {"total": "12"} })).malformed);
        assert!(RawPage::from_body(json!([1, 2, 3])).malformed);

        let page = RawPage::from_text("<html>502 Bad Gateway</html>");
        assert!(page.malformed);
        assert_eq!(page.total, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number(&json!({"count": 42})), Some(42));
        assert_eq!(first_number(&json!({"label": "species", "total_species": 7})), Some(7));
        assert_eq!(first_number(&json!(9)), Some(9));
        assert_eq!(first_number(&json!({"count": "many"})), None);
    }
}
