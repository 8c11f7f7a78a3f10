//! Gitship のコアデータモデル
//!
//! Docker デーモンのエンドポイント表現と、`.deployerfile` から
//! 読み込まれるビルダー設定の型を提供します。

pub mod config;
pub mod endpoint;
pub mod error;

pub use config::{BuilderConfig, PushConfig, SshConfig};
pub use endpoint::DockerEndpoint;
pub use error::{CoreError, Result};
