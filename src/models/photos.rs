//! 照片字节以 base64 字符串形式存储

use base64::{engine::general_purpose, Engine as _};
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(photos: &Option<Vec<Vec<u8>>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match photos {
        Some(photos) => {
            let encoded: Vec<String> = photos
                .iter()
                .map(|bytes| general_purpose::STANDARD.encode(bytes))
                .collect();
            serializer.collect_seq(encoded)
        }
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<Vec<u8>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<Vec<String>> = Option::deserialize(deserializer)?;
    encoded
        .map(|items| {
            items
                .iter()
                .map(|s| general_purpose::STANDARD.decode(s.trim()).map_err(de::Error::custom))
                .collect()
        })
        .transpose()
}
