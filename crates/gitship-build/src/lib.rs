//! Gitship の Docker イメージビルド機能
//!
//! チェックアウト済みリポジトリからのビルドコンテキスト作成、
//! Docker デーモンとの最小限のワイヤープロトコル、ストリーミング
//! ステータスの解析、そして build → tag → push を束ねる
//! オーケストレーションを提供します。

pub mod context;
pub mod deployer;
pub mod error;
pub mod image;
pub mod progress;
pub mod stream;
pub mod transport;

pub use context::ContextBuilder;
pub use deployer::{BuildReport, DockerBuilder};
pub use error::{BuildError, Result};
pub use image::{project_image_name, sanitize_image_name};
pub use progress::PushProgress;
pub use stream::{LayerPhase, LayerProgress, LayerState, StatusEvent, StatusParser};
pub use transport::{DaemonClient, StatusLines};
