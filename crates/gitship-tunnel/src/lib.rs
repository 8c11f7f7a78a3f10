//! SSH トンネル管理
//!
//! リモートの Docker デーモンに tcp:// / tls:// で接続する際、
//! ssh のローカルポートフォワードを子プロセスとして起動・監視します。

pub mod error;
pub mod tunnel;

pub use error::{Result, TunnelError};
pub use tunnel::{SshTunnel, TunnelState};
