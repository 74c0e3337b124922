//! YAML decoding for config and program files
//!
//! Enum values are written as single-key maps (`fanout: [2, 3, 2]`,
//! `tensor: int32`) instead of YAML tags, at any nesting depth.

use serde::de::DeserializeOwned;

pub fn from_str<T: DeserializeOwned>(content: &str) -> serde_yaml::Result<T> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(content))
}
