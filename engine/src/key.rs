//! Record identity.
//!
//! Every registered type maps its values to a [`RecordKey`]. Keys are
//! comparable and hashable, and have two string forms: the display form used
//! as the `id` of server envelopes, and an unambiguous storage form used to
//! address rows in the embedded store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The identity of a record within its type and partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RecordKey {
    Text(String),
    Int(i64),
    Uuid(Uuid),
    /// A key made of several parts, e.g. `(tenant, local_id)`.
    Composite(Vec<RecordKey>),
}

impl RecordKey {
    /// Build a composite key from its parts.
    pub fn composite<I, K>(parts: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RecordKey>,
    {
        RecordKey::Composite(parts.into_iter().map(Into::into).collect())
    }

    /// Check that the key can address a record.
    ///
    /// Empty text, the nil UUID (also when spelled as text) and empty
    /// composites are rejected. Integers are always accepted.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RecordKey::Text(text) if text.trim().is_empty() => Err("key is empty".to_string()),
            RecordKey::Text(text) => match Uuid::parse_str(text) {
                Ok(uuid) if uuid.is_nil() => Err("key is the nil UUID".to_string()),
                _ => Ok(()),
            },
            RecordKey::Int(_) => Ok(()),
            RecordKey::Uuid(uuid) if uuid.is_nil() => Err("key is the nil UUID".to_string()),
            RecordKey::Uuid(_) => Ok(()),
            RecordKey::Composite(parts) if parts.is_empty() => {
                Err("composite key has no parts".to_string())
            }
            RecordKey::Composite(parts) => parts.iter().try_for_each(RecordKey::validate),
        }
    }

    /// Whether [`validate`](Self::validate) accepts this key.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Unambiguous string used to address the key in storage.
    ///
    /// Each variant carries a type prefix, and composite parts are length
    /// prefixed, so distinct keys never share a storage form.
    pub fn storage_key(&self) -> String {
        let mut out = String::new();
        self.write_storage_key(&mut out);
        out
    }

    fn write_storage_key(&self, out: &mut String) {
        match self {
            RecordKey::Text(text) => {
                out.push_str("t:");
                out.push_str(text);
            }
            RecordKey::Int(value) => {
                out.push_str("i:");
                out.push_str(&value.to_string());
            }
            RecordKey::Uuid(uuid) => {
                out.push_str("u:");
                out.push_str(&uuid.hyphenated().to_string());
            }
            RecordKey::Composite(parts) => {
                out.push_str("c:[");
                for part in parts {
                    let encoded = part.storage_key();
                    out.push_str(&encoded.len().to_string());
                    out.push(':');
                    out.push_str(&encoded);
                }
                out.push(']');
            }
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Text(text) => write!(f, "{}", text),
            RecordKey::Int(value) => write!(f, "{}", value),
            RecordKey::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            RecordKey::Composite(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "/")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey::Text(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

impl From<&String> for RecordKey {
    fn from(value: &String) -> Self {
        RecordKey::Text(value.clone())
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Int(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        RecordKey::Int(value.into())
    }
}

impl From<u32> for RecordKey {
    fn from(value: u32) -> Self {
        RecordKey::Int(value.into())
    }
}

impl From<Uuid> for RecordKey {
    fn from(value: Uuid) -> Self {
        RecordKey::Uuid(value)
    }
}

/// A missing key becomes empty text, which never validates.
impl<K: Into<RecordKey>> From<Option<K>> for RecordKey {
    fn from(value: Option<K>) -> Self {
        value
            .map(Into::into)
            .unwrap_or_else(|| RecordKey::Text(String::new()))
    }
}
