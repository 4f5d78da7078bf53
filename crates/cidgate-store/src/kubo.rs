//! Kubo HTTP RPC client
//!
//! Every call is a `POST /api/v0/<command>` with arguments in the query
//! string. Streaming commands (`cat`, `ping`) hand back the live response
//! body instead of buffering it.

use crate::cid_utils::is_sentinel;
use crate::stream::{ndjson_stream, with_expected_length};
use crate::{
    ByteStream, ContentStore, PeerIdentity, PeerNetwork, PinRecord, PinType, PingReply,
    PingStream, Result, StoreError, SwarmPeer,
};
use async_trait::async_trait;
use cid::Cid;
use futures::{StreamExt, TryStreamExt};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const CONTENT_LENGTH_HEADER: &str = "x-content-length";

/// Configuration for the Kubo connection
#[derive(Clone, Debug)]
pub struct KuboConfig {
    /// RPC API URL (e.g., "http://localhost:5001")
    pub api_url: String,
    /// Deadline for short control calls (pin, list, id, swarm peers)
    pub timeout: Duration,
    /// TCP connect timeout towards the daemon
    pub connect_timeout: Duration,
}

impl Default for KuboConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5001".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl KuboConfig {
    /// Create with a custom API URL
    pub fn with_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set the control call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Kubo RPC client
#[derive(Clone)]
pub struct KuboClient {
    client: Client,
    config: KuboConfig,
}

impl KuboClient {
    /// Create a client and verify the daemon answers
    pub async fn new(config: KuboConfig) -> Result<Self> {
        let store = Self::unchecked(config)?;
        store.verify_connection().await?;
        Ok(store)
    }

    /// Create a client without contacting the daemon
    pub fn unchecked(config: KuboConfig) -> Result<Self> {
        // No global timeout: uploads and downloads are unbounded in size.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// The configuration in use
    pub fn config(&self) -> &KuboConfig {
        &self.config
    }

    /// Verify connection to the daemon
    pub async fn verify_connection(&self) -> Result<()> {
        self.rpc("id", &[])
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to IPFS: {}", e)))?;
        Ok(())
    }

    fn rpc(&self, command: &str, query: &[(&str, &str)]) -> RequestBuilder {
        let url = format!("{}/api/v0/{}", self.config.api_url, command);
        self.client.post(url).query(query)
    }

    /// Send a control call bounded by the configured timeout
    async fn call(&self, command: &str, query: &[(&str, &str)]) -> Result<Response> {
        let response = self
            .rpc(command, query)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| classify(e, self.config.timeout))?;
        ensure_success(command, response).await
    }
}

/// Map a transport error, reporting timeouts with the deadline that fired
fn classify(err: reqwest::Error, deadline: Duration) -> StoreError {
    if err.is_timeout() {
        StoreError::timeout(deadline)
    } else {
        StoreError::from(err)
    }
}

/// Size announced by the daemon before a streamed body.
///
/// Kubo answers 200 before it knows whether a read will finish and reports
/// late failures in a trailer, so a short body is only detectable against
/// this header.
fn announced_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Kubo error body (`{"Message": ..., "Code": ..., "Type": "error"}`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    message: String,
}

async fn ensure_success(command: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    if status.as_u16() == 404 || (command == "id" && is_unknown_peer(&message)) {
        return Err(StoreError::NotFound(message));
    }
    Err(StoreError::Api(format!("{} failed ({}): {}", command, status, message)))
}

/// Kubo reports a peer it cannot resolve as a 500
fn is_unknown_peer(message: &str) -> bool {
    message.contains("routing: not found") || message.contains("failed to find any peer")
}

#[async_trait]
impl ContentStore for KuboClient {
    #[instrument(skip(self, data))]
    async fn ingest(&self, data: ByteStream) -> Result<Cid> {
        let body = reqwest::Body::wrap_stream(data);
        let part = multipart::Part::stream(body)
            .file_name("upload")
            .mime_str("application/octet-stream")
            .map_err(|e| StoreError::Api(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        // Ingest is bounded by disk, not time: no per-request deadline.
        let response = self
            .rpc("add", &[("pin", "true"), ("progress", "false")])
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success("add", response).await?;

        // One JSON object per added entry; the root comes last.
        let body = response.text().await?;
        let last = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| StoreError::Api("add returned an empty response".to_string()))?;
        let added: AddResponse = serde_json::from_str(last)?;

        debug!(cid = %added.hash, size = %added.size, "Content added to IPFS");
        Ok(Cid::try_from(added.hash.as_str())?)
    }

    #[instrument(skip(self))]
    async fn cat(&self, cid: &Cid) -> Result<ByteStream> {
        let arg = cid.to_string();
        let response = self.rpc("cat", &[("arg", arg.as_str())]).send().await?;
        let response = ensure_success("cat", response).await?;

        let expected = announced_length(&response);
        if expected.is_none() {
            debug!(cid = %cid, "cat response carries no length, truncation goes undetected");
        }
        let body = response.bytes_stream().map_err(StoreError::from);
        Ok(with_expected_length(body, expected))
    }

    #[instrument(skip(self))]
    async fn pin(&self, cid: &Cid) -> Result<()> {
        let arg = cid.to_string();
        self.call("pin/add", &[("arg", arg.as_str())]).await?;
        debug!(cid = %cid, "CID pinned to local IPFS");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpin(&self, cid: &Cid) -> Result<()> {
        let arg = cid.to_string();
        match self.call("pin/rm", &[("arg", arg.as_str())]).await {
            Ok(_) => Ok(()),
            Err(StoreError::Api(message)) if message.contains("not pinned") => {
                debug!(cid = %cid, "CID was not pinned");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn list_pins(&self) -> Result<Vec<PinRecord>> {
        let response = self.call("pin/ls", &[("type", "recursive")]).await?;
        let listing: PinLsResponse = response.json().await?;

        let mut pins = Vec::with_capacity(listing.keys.len());
        for (key, entry) in listing.keys {
            let cid = match Cid::try_from(key.as_str()) {
                Ok(cid) => cid,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unparseable pin");
                    continue;
                }
            };
            if is_sentinel(&cid) {
                continue;
            }
            let pin_type = PinType::from_label(&entry.pin_type).unwrap_or(PinType::Recursive);
            pins.push(PinRecord { cid, pin_type });
        }
        pins.sort_by_key(|p| p.cid.to_string());
        Ok(pins)
    }
}

#[async_trait]
impl PeerNetwork for KuboClient {
    #[instrument(skip(self))]
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()> {
        let outcome = self
            .rpc("swarm/connect", &[("arg", address)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout));

        let failure = match outcome {
            Ok(response) => match ensure_success("swarm/connect", response).await {
                Ok(_) => return Ok(()),
                Err(e) => e,
            },
            Err(e) => e,
        };

        Err(StoreError::PeerConnect {
            address: address.to_string(),
            reason: failure.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn peers(&self) -> Result<Vec<SwarmPeer>> {
        let response = self.call("swarm/peers", &[("latency", "true")]).await?;
        let listing: SwarmPeersResponse = response.json().await?;

        Ok(listing
            .peers
            .unwrap_or_default()
            .into_iter()
            .map(|p| SwarmPeer {
                latency: p.latency.as_deref().and_then(parse_go_duration),
                address: p.addr,
                peer_id: p.peer,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn identify(&self, peer_id: Option<&str>) -> Result<PeerIdentity> {
        let query: Vec<(&str, &str)> = peer_id.map(|id| ("arg", id)).into_iter().collect();
        let response = self.call("id", &query).await?;
        let info: NodeInfo = response.json().await?;
        Ok(info.into())
    }

    #[instrument(skip(self))]
    async fn ping(&self, peer: &str, count: u32) -> Result<PingStream> {
        let count = count.to_string();
        let response = self
            .rpc("ping", &[("arg", peer), ("count", count.as_str())])
            .send()
            .await?;
        let response = ensure_success("ping", response).await?;

        let body = response.bytes_stream().map_err(StoreError::from).boxed();
        let replies = ndjson_stream::<PingLine, _>(body).map_ok(|line| PingReply {
            success: line.success,
            time: Duration::from_nanos(line.time.max(0) as u64),
            text: line.text,
        });
        Ok(replies.boxed())
    }
}

/// Parse a Go `time.Duration` string such as `"1.5ms"`, `"850µs"` or `"1m2s"`
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() || input == "n/a" {
        return None;
    }
    if input == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    Some(Duration::from_nanos(total_nanos.round() as u64))
}

/// Response line from /api/v0/add
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddResponse {
    pub name: String,
    pub hash: String,
    pub size: String,
}

/// Response from /api/v0/pin/ls
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinLsResponse {
    #[serde(default)]
    keys: HashMap<String, PinLsEntry>,
}

#[derive(Debug, Deserialize)]
struct PinLsEntry {
    #[serde(rename = "Type")]
    pin_type: String,
}

/// Response from /api/v0/swarm/peers
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmPeersResponse {
    peers: Option<Vec<SwarmPeerEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmPeerEntry {
    addr: String,
    peer: String,
    #[serde(default)]
    latency: Option<String>,
}

/// Response line from /api/v0/ping
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PingLine {
    success: bool,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    text: String,
}

/// Node information from /api/v0/id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub protocol_version: String,
}

impl From<NodeInfo> for PeerIdentity {
    fn from(info: NodeInfo) -> Self {
        Self {
            id: info.id,
            public_key: info.public_key,
            addresses: info.addresses.unwrap_or_default(),
            agent_version: info.agent_version,
            protocol_version: info.protocol_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid_utils::{create_cid, EMPTY_DIR_SENTINEL};
    use crate::stream::{collect_bytes, once_stream};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> KuboClient {
        KuboClient::unchecked(KuboConfig::with_url(server.uri()).with_timeout(Duration::from_secs(2)))
            .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = KuboConfig::default();
        assert_eq!(config.api_url, "http://localhost:5001");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_with_url_trims_slash() {
        let config = KuboConfig::with_url("http://custom:5001/");
        assert_eq!(config.api_url, "http://custom:5001");
    }

    #[test]
    fn test_parse_go_duration() {
        assert_eq!(parse_go_duration("1.5ms"), Some(Duration::from_micros(1500)));
        assert_eq!(parse_go_duration("850µs"), Some(Duration::from_micros(850)));
        assert_eq!(parse_go_duration("1m2s"), Some(Duration::from_secs(62)));
        assert_eq!(parse_go_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_go_duration("n/a"), None);
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("12 parsecs"), None);
    }

    #[tokio::test]
    async fn test_ingest_returns_root_hash() {
        let server = MockServer::start().await;
        let root = create_cid(b"root").to_string();
        let body = format!(
            "{{\"Name\":\"upload\",\"Hash\":\"{}\",\"Size\":\"4\"}}\n",
            root
        );
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .and(query_param("pin", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let cid = client.ingest(once_stream("data")).await.unwrap();
        assert_eq!(cid.to_string(), root);
    }

    #[tokio::test]
    async fn test_ingest_surfaces_daemon_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"Message":"repo is full","Code":0,"Type":"error"}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.ingest(once_stream("data")).await.unwrap_err();
        assert!(matches!(err, StoreError::Api(ref m) if m.contains("repo is full")));
    }

    #[tokio::test]
    async fn test_cat_streams_body() {
        let server = MockServer::start().await;
        let cid = create_cid(b"payload");
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .and(query_param("arg", cid.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let stream = client.cat(&cid).await.unwrap();
        assert_eq!(collect_bytes(stream).await.unwrap().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_cat_short_body_is_an_error() {
        let server = MockServer::start().await;
        let cid = create_cid(b"twenty bytes of data");
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Content-Length", "20")
                    .set_body_bytes(b"twent".to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let stream = client.cat(&cid).await.unwrap();
        let err = collect_bytes(stream).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Truncated {
                received: 5,
                expected: 20
            }
        ));
    }

    #[tokio::test]
    async fn test_identify_unknown_peer_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/id"))
            .and(query_param("arg", "12D3KooWgone"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"Message":"routing: not found","Code":0,"Type":"error"}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.identify(Some("12D3KooWgone")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m.contains("routing: not found")));
    }

    #[tokio::test]
    async fn test_list_pins_hides_sentinel() {
        let server = MockServer::start().await;
        let user = create_cid(b"user content").to_string();
        let body = format!(
            r#"{{"Keys":{{"{}":{{"Type":"recursive"}},"{}":{{"Type":"recursive"}}}}}}"#,
            EMPTY_DIR_SENTINEL, user
        );
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/ls"))
            .and(query_param("type", "recursive"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let pins = client.list_pins().await.unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].cid.to_string(), user);
        assert_eq!(pins[0].pin_type, PinType::Recursive);
    }

    #[tokio::test]
    async fn test_unpin_not_pinned_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/rm"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"Message":"not pinned or pinned indirectly","Code":0,"Type":"error"}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.unpin(&create_cid(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_carries_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/swarm/connect"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"Message":"invalid multiaddr","Code":0,"Type":"error"}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .connect("not-a-valid-multiaddr", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            StoreError::PeerConnect { address, reason } => {
                assert_eq!(address, "not-a-valid-multiaddr");
                assert!(reason.contains("invalid multiaddr"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_swarm_peers_with_null_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/swarm/peers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Peers":null}"#))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swarm_peers_parses_latency() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/swarm/peers"))
            .and(query_param("latency", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"Peers":[{"Addr":"/ip4/1.2.3.4/tcp/4001","Peer":"12D3KooWpeer","Latency":"23.5ms"}]}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let peers = client.peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "12D3KooWpeer");
        assert_eq!(peers[0].latency, Some(Duration::from_micros(23_500)));
    }

    #[tokio::test]
    async fn test_ping_decodes_reply_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"Success\":true,\"Time\":0,\"Text\":\"Looking up peer 12D3KooWpeer\"}\n",
            "{\"Success\":true,\"Time\":42000000,\"Text\":\"\"}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/v0/ping"))
            .and(query_param("count", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let replies: Vec<PingReply> = client
            .ping("12D3KooWpeer", 3)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(replies.len(), 2);
        assert!(!replies[0].is_pong());
        assert_eq!(replies[1].time, Duration::from_millis(42));
    }

    #[tokio::test]
    async fn test_identify_local_node() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/id"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ID":"12D3KooWlocal","PublicKey":"CAES","Addresses":null,"AgentVersion":"kubo/0.29.0","ProtocolVersion":"ipfs/0.1.0"}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let identity = client.identify(None).await.unwrap();
        assert_eq!(identity.id, "12D3KooWlocal");
        assert!(identity.addresses.is_empty());
        assert_eq!(identity.agent_version, "kubo/0.29.0");
    }
}
