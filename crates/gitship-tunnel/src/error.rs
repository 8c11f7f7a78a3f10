use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error(
        "SSH クライアントが見つかりません\n\nヒント:\n  • \"ssh\" コマンドがインストールされ、$PATH に含まれているか確認してください"
    )]
    SshNotFound,

    #[error("SSH 接続に失敗しました: {0}")]
    AuthenticationFailed(String),

    #[error(
        "SSH トンネルの確立が {seconds} 秒以内に完了しませんでした\n\nヒント:\n  • リモートホストに到達できるか確認してください\n  • Docker デーモンがリモート側でポートを listen しているか確認してください"
    )]
    Timeout { seconds: u64 },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
