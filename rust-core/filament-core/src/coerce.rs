//! # Argument Coercion
//!
//! Converts untyped RPC arguments (`serde_json::Value`) into the parameter
//! types a method declares.
//!
//! Rules:
//!
//! - absent or `null` arguments become the type's zero value
//! - strings parse into booleans and numbers of the exact declared width
//!   (base 10, overflow is an error)
//! - numbers convert into the declared numeric type; out of range or
//!   fractional values are rejected for integers
//! - `Value` parameters take the argument as is, `Value::Null` when absent
//! - `Vec` and map parameters take an empty collection when the argument has
//!   another shape; a failing element is still an error
//! - `Option<T>` maps absent/`null` to `None`
//! - [`Json<T>`] deserializes a structured argument with serde

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Why an argument could not be coerced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoerceError {
    /// The argument has a shape the parameter cannot take
    #[error("expected {expected}, found {found}")]
    Mismatch {
        /// Declared parameter type
        expected: &'static str,
        /// JSON kind of the argument
        found: &'static str,
    },

    /// A string argument did not parse
    #[error("cannot parse {input:?} as {expected}")]
    Parse {
        /// Declared parameter type
        expected: &'static str,
        /// The offending text
        input: String,
    },

    /// A numeric argument does not fit the declared type
    #[error("{input} is out of range for {expected}")]
    OutOfRange {
        /// Declared parameter type
        expected: &'static str,
        /// The offending number
        input: String,
    },

    /// More arguments than declared parameters
    #[error("expected at most {expected} arguments, received {given}")]
    TooMany {
        /// Declared arity
        expected: usize,
        /// Supplied argument count
        given: usize,
    },

    /// A structured argument did not deserialize
    #[error("invalid structured argument: {0}")]
    Structure(String),
}

/// Conversion from an optional untyped argument
pub trait Coerce: Sized {
    /// Convert `value`; `None` means the argument was not supplied
    ///
    /// # Errors
    ///
    /// Returns a `CoerceError` when the argument cannot represent `Self`
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError>;
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Go-style boolean spellings
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl Coerce for Value {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        Ok(value.unwrap_or(Self::Null))
    }
}

impl Coerce for bool {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(Value::String(s)) => parse_bool(&s).ok_or(CoerceError::Parse {
                expected: "bool",
                input: s,
            }),
            Some(other) => Err(CoerceError::Mismatch {
                expected: "bool",
                found: kind(&other),
            }),
        }
    }
}

impl Coerce for String {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            None | Some(Value::Null) => Ok(Self::new()),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(CoerceError::Mismatch {
                expected: "string",
                found: kind(&other),
            }),
        }
    }
}

macro_rules! coerce_int {
    ($($ty:ty),*) => {$(
        impl Coerce for $ty {
            fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
                const NAME: &str = stringify!($ty);
                let out_of_range = |input: String| CoerceError::OutOfRange { expected: NAME, input };
                match value {
                    None | Some(Value::Null) => Ok(0),
                    Some(Value::String(s)) => s.parse::<$ty>().map_err(|_| CoerceError::Parse {
                        expected: NAME,
                        input: s,
                    }),
                    Some(Value::Number(n)) => {
                        if let Some(i) = n.as_i64() {
                            <$ty>::try_from(i).map_err(|_| out_of_range(n.to_string()))
                        } else if let Some(u) = n.as_u64() {
                            <$ty>::try_from(u).map_err(|_| out_of_range(n.to_string()))
                        } else {
                            let f = n.as_f64().unwrap_or(f64::NAN);
                            // MAX + 1 is a power of two, exact even where MAX is not
                            #[allow(clippy::cast_precision_loss)]
                            let fits = f.fract() == 0.0
                                && f >= <$ty>::MIN as f64
                                && f < <$ty>::MAX as f64 + 1.0;
                            if fits {
                                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                                let whole = f as $ty;
                                Ok(whole)
                            } else {
                                Err(out_of_range(n.to_string()))
                            }
                        }
                    }
                    Some(other) => Err(CoerceError::Mismatch {
                        expected: NAME,
                        found: kind(&other),
                    }),
                }
            }
        }
    )*};
}

coerce_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! coerce_float {
    ($($ty:ty),*) => {$(
        impl Coerce for $ty {
            fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
                const NAME: &str = stringify!($ty);
                match value {
                    None | Some(Value::Null) => Ok(0.0),
                    Some(Value::String(s)) => s.parse::<$ty>().map_err(|_| CoerceError::Parse {
                        expected: NAME,
                        input: s,
                    }),
                    Some(Value::Number(n)) => {
                        let f = n.as_f64().unwrap_or(f64::NAN);
                        #[allow(clippy::cast_possible_truncation)]
                        let narrowed = f as $ty;
                        if narrowed.is_finite() {
                            Ok(narrowed)
                        } else {
                            Err(CoerceError::OutOfRange { expected: NAME, input: n.to_string() })
                        }
                    }
                    Some(other) => Err(CoerceError::Mismatch {
                        expected: NAME,
                        found: kind(&other),
                    }),
                }
            }
        }
    )*};
}

coerce_float!(f32, f64);

impl<T: Coerce> Coerce for Option<T> {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            some => T::coerce(some).map(Some),
        }
    }
}

impl<T: Coerce> Coerce for Vec<T> {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            Some(Value::Array(items)) => items.into_iter().map(|v| T::coerce(Some(v))).collect(),
            _ => Ok(Self::new()),
        }
    }
}

impl<T: Coerce> Coerce for HashMap<String, T> {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| T::coerce(Some(v)).map(|t| (k, t)))
                .collect(),
            _ => Ok(Self::new()),
        }
    }
}

impl<T: Coerce> Coerce for BTreeMap<String, T> {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        match value {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| T::coerce(Some(v)).map(|t| (k, t)))
                .collect(),
            _ => Ok(Self::new()),
        }
    }
}

/// Structured argument decoded with serde
///
/// An absent argument deserializes from `null`, so `Json<Option<T>>` is the
/// way to make a structured argument optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> Coerce for Json<T> {
    fn coerce(value: Option<Value>) -> Result<Self, CoerceError> {
        serde_json::from_value(value.unwrap_or(Value::Null))
            .map(Json)
            .map_err(|e| CoerceError::Structure(e.to_string()))
    }
}

/// A declared parameter list
///
/// Implemented for tuples of [`Coerce`] types up to eight elements. Missing
/// trailing arguments are coerced from `None`; surplus arguments fail.
pub trait FromParams: Sized {
    /// Number of declared parameters
    const ARITY: usize;

    /// Coerce a positional argument list
    ///
    /// # Errors
    ///
    /// Returns a `CoerceError` for surplus or unconvertible arguments
    fn from_params(params: Vec<Value>) -> Result<Self, CoerceError>;
}

impl FromParams for () {
    const ARITY: usize = 0;

    fn from_params(params: Vec<Value>) -> Result<Self, CoerceError> {
        if params.is_empty() {
            Ok(())
        } else {
            Err(CoerceError::TooMany {
                expected: 0,
                given: params.len(),
            })
        }
    }
}

macro_rules! from_params_tuple {
    ($len:expr; $($ty:ident),+) => {
        impl<$($ty: Coerce),+> FromParams for ($($ty,)+) {
            const ARITY: usize = $len;

            fn from_params(params: Vec<Value>) -> Result<Self, CoerceError> {
                if params.len() > Self::ARITY {
                    return Err(CoerceError::TooMany {
                        expected: Self::ARITY,
                        given: params.len(),
                    });
                }
                let mut args = params.into_iter();
                Ok(($($ty::coerce(args.next())?,)+))
            }
        }
    };
}

from_params_tuple!(1; A);
from_params_tuple!(2; A, B);
from_params_tuple!(3; A, B, C);
from_params_tuple!(4; A, B, C, D);
from_params_tuple!(5; A, B, C, D, E);
from_params_tuple!(6; A, B, C, D, E, F);
from_params_tuple!(7; A, B, C, D, E, F, G);
from_params_tuple!(8; A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strings_parse_into_exact_width() {
        assert_eq!(i8::coerce(Some(json!("-12"))), Ok(-12));
        assert!(matches!(
            i8::coerce(Some(json!("300"))),
            Err(CoerceError::Parse { .. })
        ));
        assert_eq!(u64::coerce(Some(json!("18446744073709551615"))), Ok(u64::MAX));
        assert!(u32::coerce(Some(json!("12abc"))).is_err());
        assert_eq!(f32::coerce(Some(json!("1.5"))), Ok(1.5));
    }

    #[test]
    fn test_numbers_convert_with_range_checks() {
        assert_eq!(u8::coerce(Some(json!(255))), Ok(255));
        assert!(matches!(
            u8::coerce(Some(json!(256))),
            Err(CoerceError::OutOfRange { .. })
        ));
        assert!(u16::coerce(Some(json!(-1))).is_err());
        assert_eq!(i32::coerce(Some(json!(4.0))), Ok(4));
        assert!(i32::coerce(Some(json!(4.5))).is_err());
        assert_eq!(f64::coerce(Some(json!(7))), Ok(7.0));
        assert_eq!(u8::coerce(Some(json!(255.0))), Ok(255));
        assert!(u8::coerce(Some(json!(256.0))).is_err());
        assert_eq!(i64::coerce(Some(json!(-9.223_372_036_854_775_808e18))), Ok(i64::MIN));
        assert_eq!(
            i64::coerce(Some(json!(9.223_372_036_854_774_784e18))),
            Ok(9_223_372_036_854_774_784)
        );
        assert!(matches!(
            i64::coerce(Some(json!(9.223_372_036_854_775_808e18))),
            Err(CoerceError::OutOfRange { .. })
        ));
        assert!(matches!(
            u64::coerce(Some(json!(1.844_674_407_370_955_2e19))),
            Err(CoerceError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_bool_spellings() {
        assert_eq!(bool::coerce(Some(json!("t"))), Ok(true));
        assert_eq!(bool::coerce(Some(json!("FALSE"))), Ok(false));
        assert!(bool::coerce(Some(json!("yes"))).is_err());
        assert!(bool::coerce(Some(json!(1))).is_err());
    }

    #[test]
    fn test_absent_becomes_zero_value() {
        assert_eq!(String::coerce(None), Ok(String::new()));
        assert_eq!(i64::coerce(Some(Value::Null)), Ok(0));
        assert_eq!(bool::coerce(None), Ok(false));
        assert_eq!(Value::coerce(None), Ok(Value::Null));
        assert_eq!(Option::<String>::coerce(Some(Value::Null)), Ok(None));
    }

    #[test]
    fn test_collections() {
        assert_eq!(Vec::<i32>::coerce(Some(json!([1, "2", 3]))), Ok(vec![1, 2, 3]));
        assert_eq!(Vec::<i32>::coerce(Some(json!("nope"))), Ok(vec![]));
        assert!(Vec::<i32>::coerce(Some(json!([1, "x"]))).is_err());

        let map = HashMap::<String, bool>::coerce(Some(json!({"a": true, "b": "0"}))).unwrap();
        assert_eq!(map.get("a"), Some(&true));
        assert_eq!(map.get("b"), Some(&false));
        assert!(HashMap::<String, bool>::coerce(Some(json!([1]))).unwrap().is_empty());
    }

    #[test]
    fn test_structured_argument() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }
        let Json(point) = Json::<Point>::coerce(Some(json!({"x": 1, "y": 2}))).unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
        assert!(Json::<Point>::coerce(Some(json!("bad"))).is_err());
    }

    #[test]
    fn test_tuple_arity() {
        type Args = (String, i32);
        assert_eq!(Args::ARITY, 2);
        assert_eq!(
            Args::from_params(vec![json!("a")]),
            Ok(("a".to_string(), 0))
        );
        assert!(matches!(
            Args::from_params(vec![json!("a"), json!(1), json!(2)]),
            Err(CoerceError::TooMany { expected: 2, given: 3 })
        ));
        assert!(<()>::from_params(vec![json!(1)]).is_err());
    }
}
