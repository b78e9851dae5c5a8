//! Serializes values through their `Display` implementation.
//!
//! Used for addresses and 256-bit quantities, so JSON consumers get checksummed
//! addresses and exact decimal strings instead of hex or lossy numbers.

use std::fmt::Display;

use serde::Serializer;

pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub mod option {
    use super::*;

    pub fn serialize<T: Display, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }
}
