//! `.deployerfile` の発見と読み込み
//!
//! Git リポジトリのルートに置かれた `.deployerfile` (JSON) から、
//! 使用するビルダーバックエンドとその設定を読み込みます。
//! 設定の継承・プレースホルダ展開は上位ツールの責務で、ここでは
//! 解決済みの JSON をそのまま型に落とすだけです。

pub mod error;

pub use error::*;

use gitship_core::BuilderConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// `.deployerfile` の内容
#[derive(Debug, Clone, Deserialize)]
pub struct DeployerFile {
    /// 使用するビルダーバックエンド (現在は "docker" のみ)
    #[serde(rename = "type", default = "default_builder")]
    pub builder: String,

    /// ビルダーに渡す設定 (host / ssh / push)
    #[serde(flatten)]
    pub config: BuilderConfig,
}

fn default_builder() -> String {
    "docker".to_string()
}

/// プロジェクトルートから `.deployerfile` を探す
///
/// 検索順序:
/// 1. `.deployerfile`
/// 2. `deployerfile` (ドットなし、init コマンドの生成物との互換)
pub fn find_deployer_file(project_root: &Path) -> Result<PathBuf> {
    for filename in [".deployerfile", "deployerfile"] {
        let path = project_root.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(ConfigError::DeployerFileNotFound(project_root.to_path_buf()))
}

/// `.deployerfile` を読み込んで解析
pub fn load(project_root: &Path) -> Result<DeployerFile> {
    let path = find_deployer_file(project_root)?;
    tracing::debug!("Loading deployer file: {}", path.display());

    let content = std::fs::read_to_string(&path)?;
    let file: DeployerFile = serde_json::from_str(&content)?;

    Ok(file)
}
