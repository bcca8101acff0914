//! Panel placement.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Side of the host window a plugin panel is mounted on.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Side {
    #[default]
    Left,
    Right,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_side_strings() {
        assert_eq!(Side::Left.to_string(), "left");
        assert_eq!(Side::Right.as_ref(), "right");
        assert_eq!(Side::from_str("Right").unwrap(), Side::Right);
        assert!(Side::from_str("top").is_err());
    }
}
