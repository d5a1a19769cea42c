//! Deserialization helpers for use with `serde_with`.
use std::fmt;

use serde::{
    de::{Error, Unexpected, Visitor},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Deserializes a boolean leniently.
///
/// Values set through environment variables arrive as whatever type the variable's text looks like, so a flag may show
/// up as a native boolean, as `"true"`/`"false"` in any case, or as `1`/`0`.
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BoolVisitor;

        impl Visitor<'_> for BoolVisitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, a string, or 0/1")
            }

            fn visit_bool<E: Error>(self, value: bool) -> Result<bool, E> {
                Ok(value)
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<bool, E> {
                match value.trim().to_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(Error::invalid_value(
                        Unexpected::Str(value),
                        &"\"true\" or \"false\" (case insensitive)",
                    )),
                }
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<bool, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Signed(value), &"0 or 1")),
                }
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<bool, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &"0 or 1")),
                }
            }
        }

        deserializer.deserialize_any(BoolVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_with::serde_as;

    use super::PermissiveBool;
    use crate::ConfigurationLoader;

    #[serde_as]
    #[derive(Deserialize)]
    struct Flags {
        #[serde_as(as = "PermissiveBool")]
        flag: bool,
    }

    fn parse(yaml: &str) -> Option<bool> {
        ConfigurationLoader::default()
            .from_yaml_str(yaml)
            .ok()?
            .into_typed::<Flags>()
            .ok()
            .map(|flags| flags.flag)
    }

    #[test]
    fn accepts_booleans_strings_and_integers() {
        assert_eq!(parse("flag: true"), Some(true));
        assert_eq!(parse("flag: \"FALSE\""), Some(false));
        assert_eq!(parse("flag: 1"), Some(true));
        assert_eq!(parse("flag: 0"), Some(false));
    }

    #[test]
    fn rejects_anything_else() {
        assert_eq!(parse("flag: yes please"), None);
        assert_eq!(parse("flag: 2"), None);
    }
}
