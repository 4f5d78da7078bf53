//! Main client implementation

use crate::{
    types::{ChunkResponse, PinResponse},
    ClientError, Config, NodeIdentity, PeerRecord, ProgressCallback, Result, RetrievalOutcome,
    UploadProgress, UploadResult, UploadSession,
};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{header, multipart, Client, Method, RequestBuilder, Response};
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument};

const PEER_CONNECT_HEADER: &str = "x-peer-connect";
const PIN_ON_READ_HEADER: &str = "x-pin-on-read";

/// cidgate gateway client
pub struct GatewayClient {
    config: Config,
    http: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeerRequest<'a> {
    peer_id: &'a str,
}

impl GatewayClient {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let agent = config
            .user_agent
            .parse()
            .map_err(|_| ClientError::Config(format!("Invalid user agent: {}", config.user_agent)))?;
        headers.insert(header::USER_AGENT, agent);

        // No client-wide timeout: it would cap the length of every download.
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { config, http })
    }

    /// Create with default configuration
    pub fn default_local() -> Result<Self> {
        Self::new(Config::default())
    }

    /// Create with endpoint URL
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Self::new(Config::new(endpoint))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Uploads ====================

    /// Upload an in-memory buffer in chunks
    #[instrument(skip(self, data, progress), fields(size = data.len()))]
    pub async fn upload_bytes(
        &self,
        file_name: &str,
        data: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        let chunk_size = self.config.chunk_size.max(1);
        let total_bytes = data.len() as u64;
        let total_chunks = chunk_count(total_bytes, chunk_size);

        let mut upload_id: Option<String> = None;
        let mut sent = 0u64;
        for index in 0..total_chunks {
            let start = (index as usize) * chunk_size;
            let end = (start + chunk_size).min(data.len());
            let chunk = data.slice(start..end);
            sent += chunk.len() as u64;

            let reply = self
                .send_chunk(file_name, index, total_chunks, upload_id.as_deref(), chunk)
                .await?;
            report(&progress, sent, total_bytes, index + 1, total_chunks);

            if let Some(result) = finish_or_continue(reply, index, total_chunks, &mut upload_id)? {
                return Ok(result);
            }
        }

        Err(ClientError::UploadFailed(
            "gateway never reported a CID".to_string(),
        ))
    }

    /// Upload a file from disk, reading one chunk at a time
    #[instrument(skip(self, path, progress), fields(path = %path.as_ref().display()))]
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Config(format!("No file name in {}", path.display())))?
            .to_string();

        let mut file = tokio::fs::File::open(path).await?;
        let total_bytes = file.metadata().await?.len();
        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = chunk_count(total_bytes, chunk_size);

        let mut upload_id: Option<String> = None;
        let mut sent = 0u64;
        for index in 0..total_chunks {
            let mut buf = Vec::with_capacity(chunk_size);
            (&mut file)
                .take(chunk_size as u64)
                .read_to_end(&mut buf)
                .await?;
            sent += buf.len() as u64;

            let reply = self
                .send_chunk(&file_name, index, total_chunks, upload_id.as_deref(), Bytes::from(buf))
                .await?;
            report(&progress, sent, total_bytes, index + 1, total_chunks);

            if let Some(result) = finish_or_continue(reply, index, total_chunks, &mut upload_id)? {
                return Ok(result);
            }
        }

        Err(ClientError::UploadFailed(
            "gateway never reported a CID".to_string(),
        ))
    }

    /// Send one chunk of an upload
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn send_chunk(
        &self,
        file_name: &str,
        chunk_index: u64,
        total_chunks: u64,
        upload_id: Option<&str>,
        data: Bytes,
    ) -> Result<ChunkResponse> {
        let part = multipart::Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let mut form = multipart::Form::new()
            .part("file", part)
            .text("chunkIndex", chunk_index.to_string())
            .text("totalChunks", total_chunks.to_string())
            .text("fileName", file_name.to_string());
        if let Some(id) = upload_id {
            form = form.text("uploadId", id.to_string());
        }

        let response = self
            .send(self.request(Method::POST, "/storage/upload-chunk").multipart(form))
            .await?;
        Ok(response.json().await?)
    }

    /// Retry the finalize step of an upload whose chunks all arrived
    #[instrument(skip(self))]
    pub async fn retry_finalize(&self, upload_id: &str) -> Result<UploadResult> {
        let path = format!("/storage/uploads/{}/finalize", upload_id);
        let reply: ChunkResponse = self
            .send(self.request(Method::POST, &path))
            .await?
            .json()
            .await?;
        let cid = reply
            .cid
            .ok_or_else(|| ClientError::InvalidResponse("finalize reply without a CID".to_string()))?;
        Ok(UploadResult {
            cid,
            upload_id: reply.upload_id,
        })
    }

    /// Abort an upload and discard its staged data
    #[instrument(skip(self))]
    pub async fn abort_upload(&self, upload_id: &str) -> Result<()> {
        let path = format!("/storage/uploads/{}", upload_id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    /// In-flight upload sessions
    #[instrument(skip(self))]
    pub async fn list_uploads(&self) -> Result<Vec<UploadSession>> {
        let response = self.send(self.request(Method::GET, "/storage/uploads")).await?;
        Ok(response.json().await?)
    }

    // ==================== Retrieval ====================

    /// Fetch content by CID into memory
    #[instrument(skip(self))]
    pub async fn retrieve(&self, cid: &str, peer_addr: Option<&str>) -> Result<Bytes> {
        let request = self
            .retrieve_request(cid, peer_addr)
            .timeout(self.config.timeout);
        let response = self.send(request).await?;
        Ok(response.bytes().await?)
    }

    /// Stream content by CID to a file on disk
    #[instrument(skip(self, dest), fields(dest = %dest.as_ref().display()))]
    pub async fn retrieve_to_file(
        &self,
        cid: &str,
        peer_addr: Option<&str>,
        dest: impl AsRef<Path>,
    ) -> Result<RetrievalOutcome> {
        let idle = self.config.timeout;
        let response = tokio::time::timeout(idle, self.send(self.retrieve_request(cid, peer_addr)))
            .await
            .map_err(|_| ClientError::Stalled(idle))??;
        let mut outcome = RetrievalOutcome {
            peer_connect: header_text(&response, PEER_CONNECT_HEADER),
            pin_on_read: header_text(&response, PIN_ON_READ_HEADER),
            bytes: 0,
        };

        let mut file = tokio::fs::File::create(dest.as_ref()).await?;
        let mut body = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(idle, body.next())
                .await
                .map_err(|_| ClientError::Stalled(idle))?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            outcome.bytes += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(bytes = outcome.bytes, "Retrieval written to disk");
        Ok(outcome)
    }

    /// Content read without a total deadline
    fn retrieve_request(&self, cid: &str, peer_addr: Option<&str>) -> RequestBuilder {
        let mut query = vec![("cid", cid)];
        if let Some(addr) = peer_addr {
            query.push(("addr", addr));
        }
        self.unbounded(Method::GET, "/storage/getById").query(&query)
    }

    // ==================== Pins ====================

    /// CIDs pinned by users
    #[instrument(skip(self))]
    pub async fn pinned_files(&self) -> Result<Vec<String>> {
        let response = self.send(self.request(Method::GET, "/storage/pinned-files")).await?;
        Ok(response.json().await?)
    }

    /// Pin content, returning the canonical CID
    #[instrument(skip(self))]
    pub async fn pin(&self, cid: &str) -> Result<String> {
        let request = self.request(Method::GET, "/storage/pinCID").query(&[("cid", cid)]);
        let reply: PinResponse = self.send(request).await?.json().await?;
        Ok(reply.cid)
    }

    /// Unpin content, returning the canonical CID
    #[instrument(skip(self))]
    pub async fn unpin(&self, cid: &str) -> Result<String> {
        let request = self.request(Method::GET, "/storage/unpin").query(&[("cid", cid)]);
        let reply: PinResponse = self.send(request).await?.json().await?;
        Ok(reply.cid)
    }

    // ==================== Peers ====================

    /// Ask the gateway's node to dial a multiaddress
    #[instrument(skip(self))]
    pub async fn connect_peer(&self, multiaddr: &str) -> Result<()> {
        let request = self
            .request(Method::POST, "/peers")
            .json(&PeerRequest { peer_id: multiaddr });
        self.send(request).await?;
        Ok(())
    }

    /// Peers the node is connected to
    #[instrument(skip(self))]
    pub async fn list_peers(&self) -> Result<Vec<PeerRecord>> {
        let response = self.send(self.request(Method::GET, "/peers")).await?;
        Ok(response.json().await?)
    }

    /// Identity of one peer
    #[instrument(skip(self))]
    pub async fn peer_info(&self, peer_id: &str) -> Result<NodeIdentity> {
        let path = format!("/peers/{}", peer_id);
        let response = self.send(self.request(Method::GET, &path)).await?;
        Ok(response.json().await?)
    }

    /// Round trip to a peer, formatted by the gateway (e.g. `"42 ms"`)
    #[instrument(skip(self))]
    pub async fn latency(&self, peer_id: &str) -> Result<String> {
        let request = self
            .request(Method::GET, "/peers/get-latency")
            .query(&[("peerId", peer_id)]);
        Ok(self.send(request).await?.json().await?)
    }

    /// Identity of the gateway's own node
    #[instrument(skip(self))]
    pub async fn node_identity(&self) -> Result<NodeIdentity> {
        let response = self.send(self.request(Method::GET, "/ipfs")).await?;
        Ok(response.json().await?)
    }

    /// Whether the gateway answers its health check
    pub async fn health(&self) -> Result<bool> {
        match self.send(self.request(Method::GET, "/health")).await {
            Ok(_) => Ok(true),
            Err(ClientError::Api { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ==================== Internal ====================

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.unbounded(method, path).timeout(self.config.timeout)
    }

    fn unbounded(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url(), path);
        debug!("Sending {} request to {}", method, url);
        self.http.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_body(&text, status.as_u16()));
        }

        Ok(response)
    }
}

fn chunk_count(total_bytes: u64, chunk_size: usize) -> u64 {
    total_bytes.div_ceil(chunk_size.max(1) as u64).max(1)
}

fn report(
    progress: &Option<ProgressCallback>,
    bytes_uploaded: u64,
    total_bytes: u64,
    chunks_sent: u64,
    total_chunks: u64,
) {
    if let Some(callback) = progress {
        callback(UploadProgress {
            bytes_uploaded,
            total_bytes,
            chunks_sent,
            total_chunks,
        });
    }
}

/// Thread the issued upload id forward, or return the result after the last chunk
fn finish_or_continue(
    reply: ChunkResponse,
    index: u64,
    total_chunks: u64,
    upload_id: &mut Option<String>,
) -> Result<Option<UploadResult>> {
    if index + 1 < total_chunks {
        upload_id.get_or_insert(reply.upload_id);
        return Ok(None);
    }
    match reply.cid {
        Some(cid) => Ok(Some(UploadResult {
            cid,
            upload_id: reply.upload_id,
        })),
        None => Err(ClientError::UploadFailed(format!(
            "final chunk acknowledged without a CID: {}",
            reply.message
        ))),
    }
}

fn header_text(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CID: &str = "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku";

    async fn client_for(server: &MockServer, chunk_size: usize) -> GatewayClient {
        GatewayClient::new(Config::new(server.uri()).with_chunk_size(chunk_size)).unwrap()
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 10), 1);
        assert_eq!(chunk_count(10, 10), 1);
        assert_eq!(chunk_count(11, 10), 2);
        assert_eq!(chunk_count(25, 10), 3);
        assert_eq!(chunk_count(3, 0), 3);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_set_directly_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/upload-chunk"))
            .and(body_string_contains("name=\"uploadId\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "File upload complete",
                "cid": CID,
                "uploadId": "u-0"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/storage/upload-chunk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "Chunk 0 received",
                "uploadId": "u-0"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::new(server.uri());
        config.chunk_size = 0;
        let client = GatewayClient::new(config).unwrap();
        let result = client
            .upload_bytes("two.bin", Bytes::from_static(b"ab"), None)
            .await
            .unwrap();
        assert_eq!(result.cid, CID);
    }

    #[test]
    fn test_downloads_have_no_total_deadline() {
        let config = Config::new("http://gateway:3000").with_timeout(Duration::from_secs(5));
        let client = GatewayClient::new(config).unwrap();

        let download = client.retrieve_request(CID, None).build().unwrap();
        assert!(download.timeout().is_none());

        let control = client.request(Method::GET, "/health").build().unwrap();
        assert_eq!(control.timeout(), Some(&Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_silent_download_is_stalled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/getById"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_bytes(b"late".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(server.uri()).with_timeout(Duration::from_millis(200));
        let client = GatewayClient::new(config).unwrap();
        let err = client
            .retrieve_to_file(CID, None, dir.path().join("late.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Stalled(_)));
    }

    #[tokio::test]
    async fn test_upload_bytes_threads_upload_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/upload-chunk"))
            .and(body_string_contains("name=\"uploadId\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "File upload complete",
                "cid": CID,
                "uploadId": "u-1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/storage/upload-chunk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "Chunk 0 received",
                "uploadId": "u-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p.chunks_sent));

        let client = client_for(&server, 4).await;
        let result = client
            .upload_bytes("notes.txt", Bytes::from_static(b"abcdefg"), Some(progress))
            .await
            .unwrap();

        assert_eq!(result.cid, CID);
        assert_eq!(result.upload_id, "u-1");
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_upload_file_single_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/upload-chunk"))
            .and(body_string_contains("report.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "File upload complete",
                "cid": CID,
                "uploadId": "u-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.pdf");
        std::fs::write(&file, b"%PDF-1.7").unwrap();

        let client = client_for(&server, 1024).await;
        let result = client.upload_file(&file, None).await.unwrap();
        assert_eq!(result.cid, CID);
    }

    #[tokio::test]
    async fn test_gateway_error_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/getById"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "statusCode": 400,
                "error": "InvalidCid",
                "message": "Invalid CID: nope",
                "requestId": "r-9"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 1024).await;
        let err = client.retrieve("nope", None).await.unwrap_err();
        assert!(err.is_invalid_request());
        assert_eq!(err.code(), Some("InvalidCid"));
    }

    #[tokio::test]
    async fn test_retrieve_to_file_reports_steps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/getById"))
            .and(query_param("cid", CID))
            .and(query_param("addr", "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWabc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-peer-connect", "failed")
                    .insert_header("x-pin-on-read", "succeeded")
                    .set_body_bytes(b"hello world".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let client = client_for(&server, 1024).await;
        let outcome = client
            .retrieve_to_file(CID, Some("/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWabc"), &dest)
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 11);
        assert_eq!(outcome.peer_connect.as_deref(), Some("failed"));
        assert_eq!(outcome.pin_on_read.as_deref(), Some("succeeded"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_latency_and_pins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/peers/get-latency"))
            .and(query_param("peerId", "12D3KooWabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json("42 ms"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/pinCID"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message": "Pinned", "cid": CID})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 1024).await;
        assert_eq!(client.latency("12D3KooWabc").await.unwrap(), "42 ms");
        assert_eq!(client.pin(CID).await.unwrap(), CID);
    }

    #[tokio::test]
    async fn test_abort_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/uploads/u-404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "statusCode": 404,
                "error": "NoSuchUpload",
                "message": "Upload session not found: u-404",
                "requestId": "r-1"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 1024).await;
        let err = client.abort_upload("u-404").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
