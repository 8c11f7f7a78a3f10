use crate::error::{Result, TunnelError};
use gitship_core::{DockerEndpoint, SshConfig};
use rand::Rng;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

/// トンネル用ローカルポートの選択範囲
const PORT_RANGE: std::ops::RangeInclusive<u16> = 60000..=65000;
/// フォワードポートが接続可能になるまでの全体タイムアウト
const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// 接続ポーリングの間隔
const READY_INTERVAL: Duration = Duration::from_millis(200);
/// 接続試行ごとのタイムアウト
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// パスフレーズプロンプトの待機タイムアウト
const PASSPHRASE_TIMEOUT: Duration = Duration::from_secs(30);

/// トンネルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    Ready,
    Closed,
}

/// ssh コマンドによるローカルポートフォワード
///
/// `ssh -N -i <key> -L <local>:<host>:<port> -p <ssh_port> <user>@<ssh_host>`
/// を子プロセスとして起動し、フォワードポートへの TCP 接続が
/// 成功するまでポーリングして準備完了を判定します。
/// 一度の build/deploy 実行が一つのトンネルを占有します。
pub struct SshTunnel {
    local_port: u16,
    child: Child,
    // パスフレーズ入力後も stdin を閉じないよう保持する
    stdin: Option<tokio::process::ChildStdin>,
    state: TunnelState,
}

impl SshTunnel {
    /// トンネルを開き、準備完了まで待機
    ///
    /// # Arguments
    /// * `ssh` - 検証済みの SSH 設定 (`SshConfig::validate` 済みであること)
    /// * `target_host` - リモート側でフォワードする Docker デーモンのホスト
    /// * `target_port` - 同ポート
    pub async fn open(ssh: &SshConfig, target_host: &str, target_port: u16) -> Result<SshTunnel> {
        // ssh バイナリがなければトンネルは開けないので先に確認
        if !command_exists("ssh").await {
            return Err(TunnelError::SshNotFound);
        }

        let local_port = random_local_port();
        let args = ssh_args(ssh, local_port, target_host, target_port);

        tracing::debug!("Opening SSH tunnel: ssh {}", args.join(" "));

        let mut command = Command::new("ssh");
        command.args(&args);
        command.kill_on_drop(true);

        let interactive = ssh.password.as_deref().is_some_and(|p| !p.is_empty());
        if interactive {
            command.stdin(Stdio::piped());
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
            // 制御端末があると ssh はプロンプトを /dev/tty に出して
            // パイプには何も流さないため、端末のないセッションで起動する
            detach_controlling_tty(&mut command);
        } else {
            command.stdin(Stdio::null());
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }

        let mut child = command.spawn()?;

        let mut stdin = None;
        if interactive {
            // プロンプトを監視してパスフレーズを書き込む
            let passphrase = ssh.password.as_deref().unwrap_or_default();
            match drive_passphrase(&mut child, passphrase).await {
                Ok(handle) => stdin = Some(handle),
                Err(e) => {
                    child.start_kill().ok();
                    return Err(e);
                }
            }
        }

        let mut tunnel = SshTunnel {
            local_port,
            child,
            stdin,
            state: TunnelState::Connecting,
        };

        if let Err(e) = tunnel.wait_ready().await {
            tunnel.close().await;
            return Err(e);
        }

        tunnel.state = TunnelState::Ready;
        tracing::info!(
            "SSH tunnel ready: 127.0.0.1:{} -> {}:{}",
            local_port,
            target_host,
            target_port
        );

        Ok(tunnel)
    }

    /// トンネル経由の接続先エンドポイント
    ///
    /// TLS フラグは元のエンドポイントのものを引き継ぎます
    /// (トンネルはバイトを転送するだけで、TLS は end-to-end のため)。
    pub fn local_endpoint(&self, tls: bool) -> DockerEndpoint {
        DockerEndpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: self.local_port,
            tls,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// フォワードポートが接続可能になるまでポーリング
    async fn wait_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + READY_TIMEOUT;
        let addr = format!("127.0.0.1:{}", self.local_port);

        loop {
            // ssh が先に死んでいたら待っても無駄
            if let Some(status) = self.child.try_wait()? {
                return Err(TunnelError::AuthenticationFailed(format!(
                    "SSH process exited with {} before the tunnel became available",
                    status
                )));
            }

            match timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    return Ok(());
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(TunnelError::Timeout {
                    seconds: READY_TIMEOUT.as_secs(),
                });
            }

            sleep(READY_INTERVAL).await;
        }
    }

    /// トンネルを閉じる
    ///
    /// 冪等で、二度目以降の呼び出しは何もしません。子プロセスには
    /// SIGKILL を送るため、長時間ブロックすることはありません。
    pub async fn close(&mut self) {
        if self.state == TunnelState::Closed {
            return;
        }
        self.state = TunnelState::Closed;
        self.stdin.take();

        if let Err(e) = self.child.start_kill() {
            // 既に終了している場合もここに来る
            tracing::debug!("SSH tunnel kill: {}", e);
        }
        match timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("SSH tunnel closed: {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to reap SSH tunnel process: {}", e),
            Err(_) => tracing::warn!("Timed out waiting for SSH tunnel process to exit"),
        }
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        // close() が呼ばれないパスでも子プロセスを残さない
        if self.state != TunnelState::Closed {
            self.child.start_kill().ok();
        }
    }
}

/// ssh コマンドの引数を組み立てる
fn ssh_args(ssh: &SshConfig, local_port: u16, target_host: &str, target_port: u16) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-i".to_string(),
        ssh.key.clone(),
        "-L".to_string(),
        format!("{}:{}:{}", local_port, target_host, target_port),
        "-p".to_string(),
        ssh.port.to_string(),
        format!("{}@{}", ssh.user, ssh.host),
    ]
}

/// 60000-65000 の範囲からランダムにローカルポートを選ぶ
///
/// 衝突の検出はしない (bind に失敗した場合は接続ポーリングが
/// タイムアウトしてエラーになる)。
fn random_local_port() -> u16 {
    rand::thread_rng().gen_range(PORT_RANGE)
}

/// 子プロセスを制御端末のない新しいセッションで起動させる
fn detach_controlling_tty(command: &mut Command) {
    // SAFETY: fork 後 exec 前に呼ばれるのは async-signal-safe な
    // setsid(2) のみで、アロケーションは行わない
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

/// コマンドが $PATH 上に存在するか確認
async fn command_exists(command: &str) -> bool {
    match Command::new("which")
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// パスフレーズプロンプトを監視して入力する
///
/// 子プロセスの stdout/stderr を読み、"Enter passphrase" を含む出力が
/// 現れたらパスフレーズを stdin に書き込みます。30 秒以内にプロンプトが
/// 現れない、またはプロンプト前に出力が閉じた場合は認証エラー。
/// 成功時は開いたままの stdin を返します (閉じると ssh が EOF を受けるため)。
async fn drive_passphrase(
    child: &mut Child,
    passphrase: &str,
) -> Result<tokio::process::ChildStdin> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| TunnelError::AuthenticationFailed("SSH stdout not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| TunnelError::AuthenticationFailed("SSH stderr not captured".to_string()))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| TunnelError::AuthenticationFailed("SSH stdin not captured".to_string()))?;

    let deadline = Instant::now() + PASSPHRASE_TIMEOUT;
    let mut seen: Vec<u8> = Vec::new();
    let mut out_buf = [0u8; 256];
    let mut err_buf = [0u8; 256];

    loop {
        let n = tokio::select! {
            r = stdout.read(&mut out_buf) => {
                let n = r?;
                seen.extend_from_slice(&out_buf[..n]);
                n
            }
            r = stderr.read(&mut err_buf) => {
                let n = r?;
                seen.extend_from_slice(&err_buf[..n]);
                n
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TunnelError::AuthenticationFailed(
                    "Expected a passphrase prompt, but none was received within 30s".to_string(),
                ));
            }
        };

        if n == 0 {
            return Err(TunnelError::AuthenticationFailed(
                "SSH client closed its output before prompting for a passphrase".to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&seen).to_ascii_lowercase();
        if text.contains("enter passphrase") {
            stdin.write_all(passphrase.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            break;
        }
    }

    // 残りの出力はログに流して読み捨てる
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("ssh stdout: {}", line);
        }
    });
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("ssh stderr: {}", line);
        }
    });

    Ok(stdin)
}
