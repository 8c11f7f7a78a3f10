//! Docker デーモンとの最小限のワイヤープロトコル
//!
//! 汎用の HTTP クライアントではありません。build / tag / push の
//! 3 操作だけを、リクエストを手組みした HTTP/1.0 で発行します。
//! build と push のレスポンスは改行区切り JSON の長いストリームで、
//! 全体をバッファせず 1 行ずつ読み出します。

use crate::error::{BuildError, Result};
use base64::Engine;
use gitship_core::{DockerEndpoint, PushConfig};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// 接続の種類を問わない読み書きストリーム
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// X-Registry-Auth ヘッダに入れる認証情報
#[derive(Serialize)]
struct RegistryAuth<'a> {
    username: &'a str,
    password: &'a str,
    email: &'a str,
    serveraddress: &'a str,
}

/// Docker デーモンへの低レベルクライアント
///
/// 1 回の呼び出しにつき 1 接続・1 リクエストを発行します
/// (HTTP/1.0 のため、レスポンスは接続クローズで終端されます)。
pub struct DaemonClient {
    endpoint: DockerEndpoint,
}

impl DaemonClient {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &DockerEndpoint {
        &self.endpoint
    }

    /// イメージをビルド
    ///
    /// コンテキスト (tar.gz) をボディとして送信し、ステータス行の
    /// ストリームを返します。`nocache=true` は常に付与します。
    pub async fn build(&self, image: &str, context: &[u8]) -> Result<StatusLines> {
        let path = format!("/build?t={}&nocache=true", url_encode(image));
        let head = format!(
            "POST {} HTTP/1.0\r\n\
             Accept: */*\r\n\
             Content-Type: application/x-tar\r\n\
             Content-Length: {}\r\n\
             \r\n",
            path,
            context.len()
        );

        self.send(&head, context).await
    }

    /// イメージにリモートリポジトリのタグを付ける
    pub async fn tag(&self, image: &str, remote_repo: &str) -> Result<()> {
        let path = format!(
            "/images/{}/tag?repo={}",
            url_encode(image),
            url_encode(remote_repo)
        );
        let head = format!("POST {} HTTP/1.0\r\nAccept: */*\r\n\r\n", path);

        let mut lines = self.send(&head, &[]).await?;
        // 短い有限のレスポンスなので読み捨てる
        while lines.next_line().await?.is_some() {}

        Ok(())
    }

    /// イメージをレジストリに push
    ///
    /// 認証情報は base64 エンコードした JSON として
    /// X-Registry-Auth ヘッダで送ります。
    pub async fn push(&self, image_ref: &str, push: &PushConfig) -> Result<StatusLines> {
        let auth = RegistryAuth {
            username: &push.username,
            password: &push.password,
            email: &push.email,
            serveraddress: &push.remote,
        };
        let auth_json = serde_json::to_vec(&auth)
            .map_err(|e| BuildError::Protocol(format!("Failed to encode credentials: {}", e)))?;
        let auth_header = base64::engine::general_purpose::STANDARD.encode(auth_json);

        let path = format!("/images/{}/push", url_encode(image_ref));
        let head = format!(
            "POST {} HTTP/1.0\r\n\
             X-Registry-Auth: {}\r\n\
             Accept: */*\r\n\
             \r\n",
            path, auth_header
        );

        self.send(&head, &[]).await
    }

    /// リクエストを送信してレスポンスヘッダを検証し、ボディの
    /// 行ストリームを返す
    async fn send(&self, head: &str, body: &[u8]) -> Result<StatusLines> {
        let mut stream = self.connect().await?;

        stream.write_all(head.as_bytes()).await?;
        if !body.is_empty() {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let status = read_response_head(&mut reader).await?;

        if !(200..300).contains(&status) {
            // エラーレスポンスのボディは短いので、先頭を読んで文脈に含める
            let mut detail = String::new();
            let mut line = String::new();
            while detail.len() < 512 {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => detail.push_str(&line),
                }
            }
            return Err(BuildError::Protocol(format!(
                "HTTP {} from {}: {}",
                status,
                self.endpoint,
                detail.trim()
            )));
        }

        Ok(StatusLines { reader })
    }

    /// エンドポイントへ接続
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        match &self.endpoint {
            DockerEndpoint::Unix { path } => {
                let stream = UnixStream::connect(path).await.map_err(|source| {
                    BuildError::DaemonUnreachable {
                        address: self.endpoint.to_string(),
                        source,
                    }
                })?;
                Ok(Box::new(stream))
            }
            DockerEndpoint::Tcp { host, port, tls } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|source| BuildError::DaemonUnreachable {
                        address: self.endpoint.to_string(),
                        source,
                    })?;

                if !tls {
                    return Ok(Box::new(stream));
                }

                let connector = tls_connector()?;
                let server_name = ServerName::try_from(host.clone())
                    .map_err(|e| BuildError::Tls(format!("Invalid server name '{}': {}", host, e)))?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|source| BuildError::DaemonUnreachable {
                        address: self.endpoint.to_string(),
                        source,
                    })?;
                Ok(Box::new(tls_stream))
            }
        }
    }
}

/// レスポンスボディの行ストリーム
///
/// build / push の出力は無制限に長くなり得るため、
/// 全体をメモリに置かず 1 行ずつ読み進めます。
pub struct StatusLines {
    reader: BufReader<Box<dyn Transport>>,
}

impl StatusLines {
    /// 次の 1 行を読む。ストリーム終端で `None`。
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
        }
    }
}

/// ステータス行とヘッダを読み、ステータスコードを返す
async fn read_response_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<u16> {
    let mut status_line = String::new();
    if reader.read_line(&mut status_line).await? == 0 {
        return Err(BuildError::Protocol(
            "Connection closed before a response was received".to_string(),
        ));
    }

    // 形式: "HTTP/1.0 200 OK"
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") {
        return Err(BuildError::Protocol(format!(
            "Malformed status line: {}",
            status_line.trim()
        )));
    }

    let status: u16 = code.parse().map_err(|_| {
        BuildError::Protocol(format!("Malformed status code: {}", status_line.trim()))
    })?;

    // ヘッダは空行まで読み捨てる
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BuildError::Protocol(
                "Connection closed inside response headers".to_string(),
            ));
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    Ok(status)
}

/// URL エンコード対象 (unreserved 文字以外すべて)
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// パス・クエリパラメータ用の URL エンコード
fn url_encode(value: &str) -> String {
    utf8_percent_encode(value, URL_ENCODE_SET).to_string()
}

/// tls:// エンドポイント用の TLS コネクタを作成
///
/// DOCKER_CERT_PATH が設定されていれば ca.pem をルート証明書として
/// 読み込み、cert.pem / key.pem があればクライアント認証に使います
/// (docker CLI と同じ配置)。
fn tls_connector() -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    let cert_dir = std::env::var_os("DOCKER_CERT_PATH").map(PathBuf::from);

    if let Some(dir) = &cert_dir {
        let ca_path = dir.join("ca.pem");
        if ca_path.exists() {
            for cert in CertificateDer::pem_file_iter(&ca_path)
                .map_err(|e| BuildError::Tls(format!("Failed to read {}: {}", ca_path.display(), e)))?
            {
                let cert = cert.map_err(|e| {
                    BuildError::Tls(format!("Invalid certificate in {}: {}", ca_path.display(), e))
                })?;
                roots.add(cert).map_err(|e| {
                    BuildError::Tls(format!("Failed to add CA certificate: {}", e))
                })?;
            }
        }
    }

    if roots.is_empty() {
        tracing::warn!(
            "No CA certificates loaded (set DOCKER_CERT_PATH); TLS verification will likely fail"
        );
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match client_cert_paths(cert_dir.as_deref()) {
        Some((cert_path, key_path)) => {
            let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(&cert_path)
                .map_err(|e| {
                    BuildError::Tls(format!("Failed to read {}: {}", cert_path.display(), e))
                })?
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| {
                    BuildError::Tls(format!("Invalid certificate in {}: {}", cert_path.display(), e))
                })?;
            let key = PrivateKeyDer::from_pem_file(&key_path).map_err(|e| {
                BuildError::Tls(format!("Failed to read {}: {}", key_path.display(), e))
            })?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| BuildError::Tls(format!("Client certificate rejected: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// クライアント証明書と鍵の組が揃っていればそのパスを返す
fn client_cert_paths(cert_dir: Option<&Path>) -> Option<(PathBuf, PathBuf)> {
    let dir = cert_dir?;
    let cert = dir.join("cert.pem");
    let key = dir.join("key.pem");
    (cert.exists() && key.exists()).then_some((cert, key))
}
