use rusqlite::types::Value;
use rusqlite::Row;
use std::collections::HashMap;

/// One result row keyed by lower-cased column name.
///
/// Lab databases were filled by hand and store the same column as INTEGER in
/// one row and TEXT in the next, so typed access is lenient: numbers parse out
/// of text, and NULL or missing columns read as `None`.
#[derive(Debug, Clone, Default)]
pub struct Record {
    values: HashMap<String, Value>,
}

impl Record {
    pub fn from_row(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Self> {
        let mut values = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let value: Value = row.get(idx)?;
            values.insert(name.to_ascii_lowercase(), value);
        }
        Ok(Self { values })
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        match self.values.get(&column.to_ascii_lowercase()) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    pub fn i64(&self, column: &str) -> Option<i64> {
        match self.value(column)? {
            Value::Integer(i) => Some(*i),
            Value::Real(f) => Some(*f as i64),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        }
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        match self.value(column)? {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text form of the column; numbers are rendered without a trailing `.0`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.value(column)? {
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.trim().to_string()),
            Value::Blob(_) => None,
            Value::Null => None,
        }
    }

    pub fn to_json(&self, names: &[String]) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for name in names {
            let v = match self.values.get(&name.to_ascii_lowercase()) {
                None | Some(Value::Null) => serde_json::Value::Null,
                Some(Value::Integer(i)) => serde_json::Value::from(*i),
                Some(Value::Real(f)) => serde_json::Value::from(*f),
                Some(Value::Text(s)) => serde_json::Value::from(s.clone()),
                Some(Value::Blob(b)) => serde_json::Value::from(format!("<{} bytes>", b.len())),
            };
            out.insert(name.clone(), v);
        }
        out
    }
}
