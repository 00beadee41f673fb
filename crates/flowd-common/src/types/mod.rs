//! Common types used across flowd

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowdError, Result};

/// Protocol-detection metadata attached to a flow.
///
/// The shape is owned by the DPI engine and is not interpreted here; it is
/// carried as an arbitrary JSON object.
pub type DpiMetadata = Map<String, Value>;

/// One observation of a network flow, as pushed by a flow producer.
///
/// Wire names follow the producers' JSON (`uuid`, `dest_ip`, `ip`). Every
/// field except the identity defaults to its zero value when absent, and
/// unknown fields are ignored.
///
/// Fields split into two groups once persisted:
///
/// - **Descriptive** (addresses, ports, fingerprint, OS, geo, `first_seen`):
///   fixed by the first observation of a flow.
/// - **Accumulating** (`last_seen`, packet and byte counters, `ndpi`):
///   replaced by every observation.
///
/// # Examples
///
/// ```
/// use flowd_common::types::FlowRecord;
///
/// let record = FlowRecord::decode(br#"{"uuid":"f1","src_ip":"1.1.1.1","client_num_pkts":5}"#)
///     .unwrap();
/// assert_eq!(record.id, "f1");
/// assert_eq!(record.client_num_pkts, 5);
/// assert!(record.ndpi.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Globally unique flow identifier
    #[serde(rename = "uuid")]
    pub id: String,

    #[serde(default)]
    pub src_ip: String,

    #[serde(default, rename = "dest_ip")]
    pub dst_ip: String,

    #[serde(default)]
    pub src_port: u16,

    #[serde(default)]
    pub dst_port: u16,

    /// IP version (4 or 6)
    #[serde(default, rename = "ip")]
    pub ipv: u8,

    #[serde(default)]
    pub tcp_fingerprint: String,

    #[serde(default)]
    pub client_os: String,

    #[serde(default)]
    pub server_os: String,

    /// Transport protocol name
    #[serde(default)]
    pub proto: String,

    #[serde(default)]
    pub src_country: String,

    #[serde(default)]
    pub dst_country: String,

    #[serde(default)]
    pub src_as: String,

    #[serde(default)]
    pub dst_as: String,

    #[serde(default)]
    pub first_seen: String,

    #[serde(default)]
    pub last_seen: String,

    #[serde(default)]
    pub client_num_pkts: u64,

    #[serde(default)]
    pub server_num_pkts: u64,

    #[serde(default)]
    pub client_len_pkts: u64,

    #[serde(default)]
    pub server_len_pkts: u64,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub ndpi: DpiMetadata,
}

impl FlowRecord {
    /// A record with only its identity set
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Decode one message body
    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode as a message body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One page of a listing, numbered from 1.
///
/// # Examples
///
/// ```
/// use flowd_common::types::Page;
///
/// let page = Page::new(3, 20).unwrap();
/// assert_eq!(page.limit(), 20);
/// assert_eq!(page.offset(), 40);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub size: u32,
}

impl Page {
    /// Largest accepted page size
    pub const MAX_SIZE: u32 = 100;

    /// Page size used when the caller does not choose one
    pub const DEFAULT_SIZE: u32 = 50;

    pub fn new(page: u32, size: u32) -> Result<Self> {
        if page == 0 {
            return Err(FlowdError::Page("page numbers start at 1".to_string()));
        }
        if size == 0 || size > Self::MAX_SIZE {
            return Err(FlowdError::Page(format!(
                "page size {} is outside 1..={}",
                size,
                Self::MAX_SIZE
            )));
        }
        Ok(Self { page, size })
    }

    /// Rows to return
    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    /// Rows to skip
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            size: Self::DEFAULT_SIZE,
        }
    }
}

// Producers emit `"ndpi": null` for flows the DPI engine has not classified.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<DpiMetadata, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<DpiMetadata>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_wire_names() {
        let body = json!({
            "uuid": "5f0c",
            "src_ip": "10.0.0.1",
            "dest_ip": "10.0.0.2",
            "src_port": 51234,
            "dst_port": 443,
            "ip": 4,
            "tcp_fingerprint": "64:0:*:mss*44",
            "client_os": "Linux",
            "server_os": "FreeBSD",
            "proto": "TCP",
            "src_country": "DE",
            "dst_country": "US",
            "src_as": "AS3320",
            "dst_as": "AS15169",
            "first_seen": "1700000000",
            "last_seen": "1700000042",
            "client_num_pkts": 12,
            "server_num_pkts": 10,
            "client_len_pkts": 1500,
            "server_len_pkts": 90000,
            "ndpi": {"proto": "TLS.Google", "tls": {"sni": "www.google.com"}}
        });

        let record = FlowRecord::decode(body.to_string().as_bytes()).unwrap();

        assert_eq!(record.id, "5f0c");
        assert_eq!(record.dst_ip, "10.0.0.2");
        assert_eq!(record.ipv, 4);
        assert_eq!(record.dst_port, 443);
        assert_eq!(record.server_len_pkts, 90000);
        assert_eq!(record.ndpi["tls"]["sni"], "www.google.com");
    }

    #[test]
    fn test_decode_tolerates_missing_and_unknown_fields() {
        let record =
            FlowRecord::decode(br#"{"uuid":"f1","last_seen":"t1","vlan":12,"ndpi":null}"#).unwrap();

        assert_eq!(record.last_seen, "t1");
        assert_eq!(record.src_port, 0);
        assert!(record.src_ip.is_empty());
        assert!(record.ndpi.is_empty());
    }

    #[test]
    fn test_decode_requires_identity() {
        let err = FlowRecord::decode(br#"{"src_ip":"1.1.1.1"}"#).unwrap_err();
        assert!(matches!(err, FlowdError::Codec(_)));
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        assert!(FlowRecord::decode(b"not json").is_err());
        assert!(FlowRecord::decode(br#"{"uuid":"f1","src_port":70000}"#).is_err());
        assert!(FlowRecord::decode(br#"{"uuid":"f1","ndpi":[1,2]}"#).is_err());
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let mut record = FlowRecord::new("f1");
        record.dst_ip = "9.9.9.9".to_string();

        let value: Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(value["uuid"], "f1");
        assert_eq!(value["dest_ip"], "9.9.9.9");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(Page::default(), Page::new(1, 50).unwrap());
        assert_eq!(Page::new(1, 1).unwrap().offset(), 0);
        assert_eq!(Page::new(u32::MAX, 100).unwrap().offset(), (u32::MAX as i64 - 1) * 100);

        assert!(matches!(Page::new(0, 10), Err(FlowdError::Page(_))));
        assert!(matches!(Page::new(1, 0), Err(FlowdError::Page(_))));
        assert!(matches!(Page::new(1, 101), Err(FlowdError::Page(_))));
    }
}
