use crate::error::{CoreError, Result};
use std::fmt;
use std::path::PathBuf;

/// プレーン TCP のデフォルトポート (Docker daemon)
pub const DEFAULT_TCP_PORT: u16 = 2375;
/// TLS のデフォルトポート
pub const DEFAULT_TLS_PORT: u16 = 2376;

/// Docker デーモンの接続先
///
/// `.deployerfile` の "host" パラメータ、または DOCKER_HOST 環境変数から
/// 解決されます。サポートされる形式:
/// - `unix:///var/run/docker.sock`
/// - `tcp://192.168.1.10:2375` (ポート省略時は 2375)
/// - `tls://192.168.1.10:2376` (ポート省略時は 2376)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix { path: PathBuf },
    Tcp { host: String, port: u16, tls: bool },
}

impl DockerEndpoint {
    /// ホスト文字列を解析してエンドポイントを作成
    pub fn parse(host: &str) -> Result<Self> {
        let trimmed = host.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(path) = lower.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(CoreError::InvalidHost(trimmed.to_string()));
            }
            // パス部分は大文字小文字を保持したまま使う
            return Ok(DockerEndpoint::Unix {
                path: PathBuf::from(&trimmed[7..]),
            });
        }

        let (rest, tls) = if lower.starts_with("tcp://") {
            (&trimmed[6..], false)
        } else if lower.starts_with("tls://") {
            (&trimmed[6..], true)
        } else {
            return Err(CoreError::InvalidHost(trimmed.to_string()));
        };

        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(CoreError::InvalidHost(trimmed.to_string()));
        }

        // ポート省略時は標準ポートを補完
        match rest.rsplit_once(':') {
            Some((host_part, port_part)) if !port_part.is_empty() => {
                let port = port_part
                    .parse::<u16>()
                    .map_err(|_| CoreError::InvalidHost(trimmed.to_string()))?;
                if host_part.is_empty() {
                    return Err(CoreError::InvalidHost(trimmed.to_string()));
                }
                Ok(DockerEndpoint::Tcp {
                    host: host_part.to_string(),
                    port,
                    tls,
                })
            }
            _ => Ok(DockerEndpoint::Tcp {
                host: rest.to_string(),
                port: if tls { DEFAULT_TLS_PORT } else { DEFAULT_TCP_PORT },
                tls,
            }),
        }
    }

    /// 設定値と DOCKER_HOST 環境変数からエンドポイントを解決
    ///
    /// 優先順位:
    /// 1. `.deployerfile` の "host" パラメータ
    /// 2. DOCKER_HOST 環境変数
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        let host = match configured {
            Some(h) if !h.trim().is_empty() => h.to_string(),
            _ => std::env::var("DOCKER_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .ok_or(CoreError::HostNotConfigured)?,
        };

        Self::parse(&host)
    }
}

impl fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerEndpoint::Unix { path } => write!(f, "unix://{}", path.display()),
            DockerEndpoint::Tcp { host, port, tls } => {
                let scheme = if *tls { "tls" } else { "tcp" };
                write!(f, "{}://{}:{}", scheme, host, port)
            }
        }
    }
}
