//! Serde helpers for byte payloads carried inside JSON frames

/// Serialize `Bytes` as a standard base64 string.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Input {
///     #[serde(with = "tk_protocol::encoding::base64_bytes")]
///     stdin: Bytes,
/// }
/// ```
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
