use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        ".deployerfile が見つかりません: {0}\n\
        プロジェクトルートに .deployerfile (JSON) を作成してください"
    )]
    DeployerFileNotFound(PathBuf),

    #[error(".deployerfile の解析に失敗しました: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
