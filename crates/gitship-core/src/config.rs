use crate::error::{CoreError, Result};
use serde::Deserialize;

/// docker ビルダーに渡される設定
///
/// `.deployerfile` の "docker" セクションに相当します。設定の継承や
/// プレースホルダ展開は上位レイヤーで解決済みの前提です。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuilderConfig {
    /// Docker ホスト (省略時は DOCKER_HOST 環境変数)
    #[serde(default)]
    pub host: Option<String>,

    /// SSH トンネル設定 (tcp:// / tls:// ホストのみ有効)
    #[serde(default)]
    pub ssh: Option<SshConfig>,

    /// ビルド後のレジストリ push 設定
    #[serde(default)]
    pub push: Option<PushConfig>,
}

/// SSH トンネル設定
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// トンネルを有効にするか
    #[serde(default)]
    pub tunnel: bool,

    /// SSH 接続ユーザー
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// SSH 接続先ホスト
    #[serde(default)]
    pub host: String,

    /// SSH 接続先ポート
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH 秘密鍵ファイルのパス
    #[serde(default)]
    pub key: String,

    /// 秘密鍵のパスフレーズ (省略可)
    #[serde(default)]
    pub password: Option<String>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl SshConfig {
    /// トンネル利用時の必須パラメータを検証
    pub fn validate(&self) -> Result<()> {
        if !self.tunnel {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(CoreError::SshHostMissing);
        }
        if self.key.trim().is_empty() {
            return Err(CoreError::SshKeyMissing);
        }
        Ok(())
    }
}

/// レジストリ push 設定
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// push 先のリモートリポジトリ (例: "registry.example.com:5000")
    #[serde(default)]
    pub remote: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub email: String,
}

impl PushConfig {
    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(CoreError::PushRemoteMissing);
        }
        Ok(())
    }
}
