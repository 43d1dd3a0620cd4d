//! Tabular query results and their body encodings.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// A row whose width does not match the column list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row} has {width} cells, expected {columns}")]
pub struct ShapeError {
    pub row: usize,
    pub width: usize,
    pub columns: usize,
}

/// Output of one query execution: ordered columns, ordered rows of
/// string-rendered cells.
///
/// Every row has exactly as many cells as there are columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a result set, checking that every row matches the columns.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, ShapeError> {
        let mut result = Self::new(columns);
        for row in rows {
            result.push_row(row)?;
        }
        Ok(result)
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), ShapeError> {
        if row.len() != self.columns.len() {
            return Err(ShapeError {
                row: self.rows.len(),
                width: row.len(),
                columns: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Body encoding for dispatched queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// `[{col : val, ...}, ...]` with raw cell text. Not strict JSON: values
    /// are neither quoted nor escaped.
    #[default]
    Legacy,
    /// Strict JSON, every cell a string.
    Json,
}

/// Render a result set as a response body.
///
/// Only the JSON encoder can fail.
pub fn serialize(result: &ResultSet, format: BodyFormat) -> serde_json::Result<Vec<u8>> {
    match format {
        BodyFormat::Legacy => Ok(to_legacy(result).into_bytes()),
        BodyFormat::Json => serde_json::to_vec(result),
    }
}

fn to_legacy(result: &ResultSet) -> String {
    let objects: Vec<String> = result
        .rows
        .iter()
        .map(|row| {
            let fields: Vec<String> = result
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| format!("{} : {}", column, value))
                .collect();
            format!("{{{}}}", fields.join(", "))
        })
        .collect();
    format!("[{}]", objects.join(", "))
}

/// One row as a map, keys in column order.
struct RowObject<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl Serialize for RowObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowObject {
                columns: &self.columns,
                values: row,
            })?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connections() -> ResultSet {
        ResultSet::from_parts(
            vec!["pid".into(), "state".into()],
            vec![
                vec!["1".into(), "active".into()],
                vec!["2".into(), "idle".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_legacy_body() {
        let body = serialize(&connections(), BodyFormat::Legacy).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "[{pid : 1, state : active}, {pid : 2, state : idle}]"
        );
    }

    #[test]
    fn test_empty_result_is_empty_array() {
        let empty = ResultSet::new(vec!["pid".into()]);
        assert_eq!(serialize(&empty, BodyFormat::Legacy).unwrap(), b"[]");
        assert_eq!(serialize(&empty, BodyFormat::Json).unwrap(), b"[]");
        let default = ResultSet::default();
        assert_eq!(serialize(&default, BodyFormat::Legacy).unwrap(), b"[]");
    }

    #[test]
    fn test_legacy_does_not_escape() {
        let result = ResultSet::from_parts(
            vec!["query".into()],
            vec![vec!["select \"x\", 1".into()]],
        )
        .unwrap();
        assert_eq!(
            serialize(&result, BodyFormat::Legacy).unwrap(),
            b"[{query : select \"x\", 1}]"
        );
    }

    #[test]
    fn test_json_preserves_column_order() {
        let result = ResultSet::from_parts(
            vec!["zeta".into(), "alpha".into(), "mid".into()],
            vec![vec!["1".into(), "2".into(), "3".into()]],
        )
        .unwrap();
        let body = String::from_utf8(serialize(&result, BodyFormat::Json).unwrap()).unwrap();
        assert_eq!(body, r#"[{"zeta":"1","alpha":"2","mid":"3"}]"#);
    }

    #[test]
    fn test_json_escapes_values() {
        let result =
            ResultSet::from_parts(vec!["q".into()], vec![vec!["say \"hi\"\n".into()]]).unwrap();
        let body = serialize(&result, BodyFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed[0]["q"], "say \"hi\"\n");
    }

    #[test]
    fn test_json_rows_in_source_order() {
        let body = serialize(&connections(), BodyFormat::Json).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["pid"], "1");
        assert_eq!(parsed[1]["state"], "idle");
    }

    #[test]
    fn test_row_width_checked() {
        let mut result = ResultSet::new(vec!["a".into(), "b".into()]);
        let err = result.push_row(vec!["only".into()]).unwrap_err();
        assert_eq!(
            err,
            ShapeError {
                row: 0,
                width: 1,
                columns: 2
            }
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_body_format_deserialize() {
        let format: BodyFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, BodyFormat::Json);
    }
}
