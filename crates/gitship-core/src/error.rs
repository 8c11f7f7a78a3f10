use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(
        "Docker ホストが設定されていません。\n\
        .deployerfile の \"host\" パラメータを指定するか、\n\
        DOCKER_HOST 環境変数を設定してください"
    )]
    HostNotConfigured,

    #[error(
        "ホスト文字列を解析できません: {0}\n\
        サポートされる形式: unix:///var/run/docker.sock, tcp://host:2375, tls://host:2376"
    )]
    InvalidHost(String),

    #[error("SSH トンネルには接続先ホスト (ssh.host) の指定が必要です")]
    SshHostMissing,

    #[error("SSH 秘密鍵 (ssh.key) が正しく指定されていません")]
    SshKeyMissing,

    #[error("push 設定にはリモートリポジトリ (push.remote) の指定が必要です")]
    PushRemoteMissing,
}

pub type Result<T> = std::result::Result<T, CoreError>;
