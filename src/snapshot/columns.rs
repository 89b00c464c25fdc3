//! Arrow typing for pass-through JSON columns.
//!
//! The platform schema is not fixed, so each column's type is inferred from
//! the values it holds in this snapshot. Nulls and missing fields are ignored
//! during inference and written as nulls.

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, ListBuilder, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Arrays whose elements are all strings (Helix `tags`, `tag_ids`)
    Utf8List,
    /// Anything else, stored as JSON text
    Json,
}

impl ColumnKind {
    /// Infers the narrowest kind that holds every non-null value. A column
    /// with no values at all is Utf8.
    pub fn infer<'a>(values: impl IntoIterator<Item = Option<&'a Value>>) -> Self {
        values
            .into_iter()
            .flatten()
            .map(Self::of)
            .reduce(Self::merge)
            .unwrap_or(Self::Utf8)
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() => Self::Int64,
            Value::Number(_) => Self::Float64,
            Value::String(_) => Self::Utf8,
            Value::Array(items) if items.iter().all(|i| i.is_string() || i.is_null()) => {
                Self::Utf8List
            }
            _ => Self::Json,
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int64, Self::Float64) | (Self::Float64, Self::Int64) => Self::Float64,
            _ => Self::Json,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int64 => DataType::Int64,
            Self::Float64 => DataType::Float64,
            Self::Utf8 | Self::Json => DataType::Utf8,
            Self::Utf8List => DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
        }
    }

    /// Builds the Arrow array for one column. Values that do not fit the
    /// kind become nulls, which only happens if the caller passes a kind that
    /// was not inferred from these values.
    pub fn build_array<'a>(self, values: impl Iterator<Item = Option<&'a Value>>) -> ArrayRef {
        match self {
            Self::Boolean => Arc::new(
                values
                    .map(|v| v.and_then(Value::as_bool))
                    .collect::<BooleanArray>(),
            ),
            Self::Int64 => Arc::new(values.map(|v| v.and_then(Value::as_i64)).collect::<Int64Array>()),
            Self::Float64 => Arc::new(
                values
                    .map(|v| v.and_then(Value::as_f64))
                    .collect::<Float64Array>(),
            ),
            Self::Utf8 => Arc::new(
                values
                    .map(|v| v.and_then(Value::as_str))
                    .collect::<StringArray>(),
            ),
            Self::Json => Arc::new(
                values
                    .map(|v| {
                        v.map(|value| match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                    })
                    .collect::<StringArray>(),
            ),
            Self::Utf8List => {
                let mut builder = ListBuilder::new(StringBuilder::new());
                for value in values {
                    match value.and_then(Value::as_array) {
                        Some(items) => {
                            for item in items {
                                builder.values().append_option(item.as_str());
                            }
                            builder.append(true);
                        }
                        None => builder.append(false),
                    }
                }
                Arc::new(builder.finish())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use serde_json::json;

    fn infer(values: &[Value]) -> ColumnKind {
        ColumnKind::infer(values.iter().map(|v| if v.is_null() { None } else { Some(v) }))
    }

    #[test]
    fn test_infer_scalars() {
        assert_eq!(infer(&[json!(true), json!(false)]), ColumnKind::Boolean);
        assert_eq!(infer(&[json!(1000), json!(2000)]), ColumnKind::Int64);
        assert_eq!(infer(&[json!(1), json!(2.5)]), ColumnKind::Float64);
        assert_eq!(infer(&[json!("live"), json!(null)]), ColumnKind::Utf8);
    }

    #[test]
    fn test_infer_lists_and_fallbacks() {
        assert_eq!(infer(&[json!(["English"]), json!([])]), ColumnKind::Utf8List);
        assert_eq!(infer(&[json!({"a": 1})]), ColumnKind::Json);
        assert_eq!(infer(&[json!("1"), json!(1)]), ColumnKind::Json);
        assert_eq!(infer(&[json!([1, 2])]), ColumnKind::Json);
    }

    #[test]
    fn test_infer_empty_column() {
        assert_eq!(infer(&[]), ColumnKind::Utf8);
        assert_eq!(infer(&[json!(null), json!(null)]), ColumnKind::Utf8);
    }

    #[test]
    fn test_build_int_with_nulls() {
        let values = [json!(5), json!(7)];
        let array = ColumnKind::Int64.build_array(vec![Some(&values[0]), None, Some(&values[1])].into_iter());

        let ints = array.as_primitive::<arrow::datatypes::Int64Type>();
        assert_eq!(ints.len(), 3);
        assert_eq!(ints.value(0), 5);
        assert!(ints.is_null(1));
        assert_eq!(ints.value(2), 7);
    }

    #[test]
    fn test_build_string_list() {
        let values = [json!(["English", "Speedrun"]), json!([])];
        let array = ColumnKind::Utf8List.build_array(vec![Some(&values[0]), None, Some(&values[1])].into_iter());

        assert_eq!(array.data_type(), &ColumnKind::Utf8List.data_type());
        let lists = array.as_list::<i32>();
        assert_eq!(lists.len(), 3);
        assert_eq!(lists.value(0).as_string::<i32>().value(1), "Speedrun");
        assert!(lists.is_null(1));
        assert_eq!(lists.value(2).len(), 0);
    }

    #[test]
    fn test_build_json_text() {
        let values = [json!({"a": 1}), json!("plain")];
        let array = ColumnKind::Json.build_array(values.iter().map(Some));

        let strings = array.as_string::<i32>();
        assert_eq!(strings.value(0), r#"{"a":1}"#);
        assert_eq!(strings.value(1), "plain");
    }
}
