//! Typed values stored at VSS leaves: the datatype set from spec.md §3,
//! parsing from JSON/number/string forms, and range/enum validation.
//!
//! Per the design notes in spec.md §9 ("model stored values as a tagged
//! variant over the datatype set, not as raw JSON"), [`ScalarValue`] and
//! [`Value`] are closed enums over the VSS datatype set; conversion from
//! wire-format JSON happens once, at `set` time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Boolean,
    String,
}

impl ScalarType {
    /// The datatype's own native representable range, used when no `min`/
    /// `max` is declared on the node (spec.md §4.2: "outside the
    /// datatype's native range").
    #[must_use]
    pub fn native_range(self) -> Option<(f64, f64)> {
        match self {
            ScalarType::Uint8 => Some((u8::MIN.into(), u8::MAX.into())),
            ScalarType::Uint16 => Some((u16::MIN.into(), u16::MAX.into())),
            ScalarType::Uint32 => Some((u32::MIN.into(), f64::from(u32::MAX))),
            ScalarType::Uint64 => Some((0.0, u64::MAX as f64)),
            ScalarType::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            ScalarType::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            ScalarType::Int32 => Some((i32::MIN.into(), f64::from(i32::MAX))),
            ScalarType::Int64 => Some((i64::MIN as f64, i64::MAX as f64)),
            ScalarType::Float | ScalarType::Double | ScalarType::Boolean | ScalarType::String => {
                None
            }
        }
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        !matches!(self, ScalarType::Boolean | ScalarType::String)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::Uint8 => "uint8",
            ScalarType::Uint16 => "uint16",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Int8 => "int8",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Boolean => "boolean",
            ScalarType::String => "string",
        };
        f.write_str(s)
    }
}

/// A full VSS datatype, e.g. `uint8` or `uint8[]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    pub scalar: ScalarType,
    pub is_array: bool,
}

impl DataType {
    #[must_use]
    pub fn scalar(scalar: ScalarType) -> Self {
        Self {
            scalar,
            is_array: false,
        }
    }

    pub fn parse(s: &str) -> Result<Self, TreeError> {
        let (base, is_array) = match s.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let scalar = match base {
            "uint8" => ScalarType::Uint8,
            "uint16" => ScalarType::Uint16,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "int8" => ScalarType::Int8,
            "int16" => ScalarType::Int16,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            "boolean" => ScalarType::Boolean,
            "string" => ScalarType::String,
            other => {
                return Err(TreeError::InvalidTree(format!(
                    "unknown datatype '{other}'"
                )))
            }
        };
        Ok(Self { scalar, is_array })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scalar)?;
        if self.is_array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// A single scalar value, tagged by its datatype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Uint(u64),
    Int(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Uint(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl ScalarValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Uint(v) => Some(*v as f64),
            ScalarValue::Int(v) => Some(*v as f64),
            ScalarValue::Float(v) => Some(*v),
            ScalarValue::Boolean(_) | ScalarValue::String(_) => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Uint(v) => serde_json::json!(v),
            ScalarValue::Int(v) => serde_json::json!(v),
            ScalarValue::Float(v) => serde_json::json!(v),
            ScalarValue::Boolean(v) => serde_json::json!(v),
            ScalarValue::String(v) => serde_json::json!(v),
        }
    }

    fn to_stringified_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Boolean(_) | ScalarValue::String(_) => self.to_json(),
            _ => serde_json::json!(self.to_string()),
        }
    }

    /// Parse one scalar value from wire JSON against a declared scalar
    /// type, enforcing bounds and enum membership.
    fn parse(
        raw: &serde_json::Value,
        scalar: ScalarType,
        min: Option<f64>,
        max: Option<f64>,
        allowed: Option<&[String]>,
        path: &str,
    ) -> Result<Self, TreeError> {
        match scalar {
            ScalarType::Boolean => {
                let b = match raw {
                    serde_json::Value::Bool(b) => *b,
                    serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        _ => {
                            return Err(TreeError::TypeMismatch {
                                path: path.to_owned(),
                                expected: "boolean".into(),
                                got: s.clone(),
                            })
                        }
                    },
                    other => {
                        return Err(TreeError::TypeMismatch {
                            path: path.to_owned(),
                            expected: "boolean".into(),
                            got: other.to_string(),
                        })
                    }
                };
                Ok(ScalarValue::Boolean(b))
            }
            ScalarType::String => {
                let s = match raw {
                    serde_json::Value::String(s) => s.clone(),
                    other => {
                        return Err(TreeError::TypeMismatch {
                            path: path.to_owned(),
                            expected: "string".into(),
                            got: other.to_string(),
                        })
                    }
                };
                if let Some(allowed) = allowed {
                    if !allowed.iter().any(|a| a == &s) {
                        return Err(TreeError::InvalidValue {
                            path: path.to_owned(),
                            detail: format!("'{s}' is not one of {allowed:?}"),
                        });
                    }
                }
                Ok(ScalarValue::String(s))
            }
            _ => {
                let n = match raw {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.parse::<f64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| TreeError::TypeMismatch {
                    path: path.to_owned(),
                    expected: scalar.to_string(),
                    got: raw.to_string(),
                })?;

                let (native_lo, native_hi) = scalar.native_range().unwrap_or((f64::MIN, f64::MAX));
                let lo = min.unwrap_or(native_lo).max(native_lo);
                let hi = max.unwrap_or(native_hi).min(native_hi);
                if n < lo || n > hi {
                    return Err(TreeError::OutOfBounds {
                        path: path.to_owned(),
                        detail: format!("{n} is outside [{lo}, {hi}]"),
                    });
                }

                Ok(match scalar {
                    ScalarType::Float | ScalarType::Double => ScalarValue::Float(n),
                    ScalarType::Int8
                    | ScalarType::Int16
                    | ScalarType::Int32
                    | ScalarType::Int64 => ScalarValue::Int(n as i64),
                    _ => ScalarValue::Uint(n as u64),
                })
            }
        }
    }
}

/// A value stored at a leaf: either a single scalar or an array of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(ScalarValue),
    Array(Vec<ScalarValue>),
}

impl Value {
    /// Parse and validate a wire value against a leaf's declared datatype,
    /// min/max and enum constraints (spec.md §4.2).
    pub fn parse(
        raw: &serde_json::Value,
        datatype: DataType,
        min: Option<f64>,
        max: Option<f64>,
        allowed: Option<&[String]>,
        path: &str,
    ) -> Result<Self, TreeError> {
        if datatype.is_array {
            let arr = raw.as_array().ok_or_else(|| TreeError::TypeMismatch {
                path: path.to_owned(),
                expected: format!("{datatype}"),
                got: raw.to_string(),
            })?;
            let values = arr
                .iter()
                .map(|v| ScalarValue::parse(v, datatype.scalar, min, max, allowed, path))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        } else {
            Ok(Value::Scalar(ScalarValue::parse(
                raw,
                datatype.scalar,
                min,
                max,
                allowed,
                path,
            )?))
        }
    }

    #[must_use]
    pub fn to_json(&self, as_string: bool) -> serde_json::Value {
        match self {
            Value::Scalar(v) => {
                if as_string {
                    v.to_stringified_json()
                } else {
                    v.to_json()
                }
            }
            Value::Array(vs) => serde_json::Value::Array(
                vs.iter()
                    .map(|v| {
                        if as_string {
                            v.to_stringified_json()
                        } else {
                            v.to_json()
                        }
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_suffix() {
        let dt = DataType::parse("uint8[]").unwrap();
        assert_eq!(dt.scalar, ScalarType::Uint8);
        assert!(dt.is_array);
    }

    #[test]
    fn rejects_unknown_datatype() {
        assert!(DataType::parse("uint7").is_err());
    }

    #[test]
    fn uint8_out_of_native_range() {
        let err = ScalarValue::parse(
            &serde_json::json!(256),
            ScalarType::Uint8,
            None,
            None,
            None,
            "Vehicle.OBD.WarmupsSinceDTCClear",
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::OutOfBounds { .. }));
    }

    #[test]
    fn boolean_accepts_string_case_insensitive() {
        let v = ScalarValue::parse(
            &serde_json::json!("TRUE"),
            ScalarType::Boolean,
            None,
            None,
            None,
            "p",
        )
        .unwrap();
        assert_eq!(v, ScalarValue::Boolean(true));
    }

    #[test]
    fn enum_string_rejects_non_member() {
        let err = ScalarValue::parse(
            &serde_json::json!("PURPLE"),
            ScalarType::String,
            None,
            None,
            Some(&["RED".to_owned(), "GREEN".to_owned()]),
            "p",
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::InvalidValue { .. }));
    }

    #[test]
    fn numeric_string_input_is_accepted() {
        let v = Value::parse(
            &serde_json::json!("2345.0"),
            DataType::scalar(ScalarType::Double),
            None,
            None,
            None,
            "p",
        )
        .unwrap();
        assert_eq!(v, Value::Scalar(ScalarValue::Float(2345.0)));
    }
}
