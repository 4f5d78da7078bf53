//! Records returned by the content store and the peer network

use crate::Result;
use cid::Cid;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

/// How a CID is retained by the daemon
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinType {
    Recursive,
    Direct,
    Indirect,
}

impl PinType {
    /// Parse the daemon's pin type label
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "recursive" => Some(Self::Recursive),
            "direct" => Some(Self::Direct),
            "indirect" => Some(Self::Indirect),
            _ => None,
        }
    }
}

/// A CID retained by the local content store
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PinRecord {
    #[serde(serialize_with = "cid_as_string")]
    pub cid: Cid,
    #[serde(rename = "type")]
    pub pin_type: PinType,
}

impl PinRecord {
    /// A recursive pin
    pub fn recursive(cid: Cid) -> Self {
        Self {
            cid,
            pin_type: PinType::Recursive,
        }
    }
}

/// A peer the local node is currently connected to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmPeer {
    /// Multiaddress the connection runs over
    pub address: String,
    /// Peer identity
    pub peer_id: String,
    /// Last round trip the daemon observed, if any
    #[serde(serialize_with = "duration_as_millis", rename = "latencyMs")]
    pub latency: Option<Duration>,
}

/// Identity information for a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub id: String,
    pub public_key: String,
    pub addresses: Vec<String>,
    pub agent_version: String,
    pub protocol_version: String,
}

/// One reply of a ping exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingReply {
    pub success: bool,
    /// Round trip time; zero on informational replies
    pub time: Duration,
    pub text: String,
}

impl PingReply {
    /// A successful round trip
    pub fn pong(time: Duration) -> Self {
        Self {
            success: true,
            time,
            text: String::new(),
        }
    }

    /// A progress message carrying no measurement
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            success: true,
            time: Duration::ZERO,
            text: text.into(),
        }
    }

    /// An explicit probe failure
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            time: Duration::ZERO,
            text: text.into(),
        }
    }

    /// Whether this reply carries a round trip measurement
    pub fn is_pong(&self) -> bool {
        self.success && !self.time.is_zero()
    }
}

/// Stream of ping replies as they arrive
pub type PingStream = BoxStream<'static, Result<PingReply>>;

fn cid_as_string<S: Serializer>(cid: &Cid, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&cid.to_string())
}

fn duration_as_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swarm_peer_serialization() {
        let peer = SwarmPeer {
            address: "/ip4/10.0.0.1/tcp/4001".to_string(),
            peer_id: "12D3KooWabc".to_string(),
            latency: Some(Duration::from_micros(42_700)),
        };
        let json = serde_json::to_value(&peer).unwrap();
        assert_eq!(json["peerId"], "12D3KooWabc");
        assert_eq!(json["latencyMs"], 42);

        let unknown = SwarmPeer { latency: None, ..peer };
        let json = serde_json::to_value(&unknown).unwrap();
        assert!(json["latencyMs"].is_null());
    }

    #[test]
    fn test_ping_reply_classification() {
        assert!(PingReply::pong(Duration::from_millis(3)).is_pong());
        assert!(!PingReply::info("Looking up peer").is_pong());
        assert!(!PingReply::failure("no route").is_pong());
    }

    #[test]
    fn test_pin_type_labels() {
        assert_eq!(PinType::from_label("recursive"), Some(PinType::Recursive));
        assert_eq!(PinType::from_label("direct"), Some(PinType::Direct));
        assert_eq!(PinType::from_label("bogus"), None);
    }
}
