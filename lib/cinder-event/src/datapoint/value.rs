use std::fmt;

/// A datapoint value.
///
/// Values keep the representation they were created with so that rendering them back to text is lossless: an integer
/// received as `2` is written back out as `2`, never `2.0`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A signed integer.
    Int(i64),

    /// A floating-point number.
    Float(f64),

    /// A pre-formatted value, written to the wire as-is.
    Str(String),
}

impl Value {
    /// Returns the canonical text representation used on the wire.
    pub fn wire_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn wire_values() {
        assert_eq!(Value::Int(2).wire_value(), "2");
        assert_eq!(Value::Int(-17).wire_value(), "-17");
        assert_eq!(Value::Float(2.5).wire_value(), "2.5");
        assert_eq!(Value::Float(3.0).wire_value(), "3");
        assert_eq!(Value::from("0x1f").wire_value(), "0x1f");
    }

    proptest! {
        #[test]
        fn int_wire_value_parses_back(i in any::<i64>()) {
            let wire = Value::Int(i).wire_value();
            prop_assert_eq!(wire.parse::<i64>().unwrap(), i);
        }

        #[test]
        fn finite_float_wire_value_parses_back(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let wire = Value::Float(f).wire_value();
            prop_assert_eq!(wire.parse::<f64>().unwrap(), f);
        }
    }
}
