//! ビルド・デプロイのオーケストレーション
//!
//! エンドポイント解決 → (必要なら) SSH トンネル → コンテキスト作成 →
//! build → (設定があれば) tag + push → トンネル破棄、の順に実行します。
//! トンネルはどの経路で失敗しても必ず閉じます。

use crate::context::ContextBuilder;
use crate::error::{BuildError, Result};
use crate::image::project_image_name;
use crate::progress::PushProgress;
use crate::stream::{StatusEvent, StatusParser};
use crate::transport::{DaemonClient, StatusLines};
use colored::Colorize;
use gitship_core::{BuilderConfig, DockerEndpoint};
use gitship_tunnel::SshTunnel;
use std::path::PathBuf;

/// 1 回のビルド・デプロイ実行の結果
///
/// 生成後は不変。`diagnostics` はデーモンから受け取った
/// ログ行を到着順に保持します。
#[derive(Debug)]
pub struct BuildReport {
    pub success: bool,
    pub image_name: String,
    pub diagnostics: Vec<String>,
    pub error: Option<BuildError>,
}

/// docker ビルダー
///
/// チェックアウト済みのリポジトリから Docker イメージをビルドし、
/// push 設定があればリモートレジストリへ送ります。
pub struct DockerBuilder {
    project_name: String,
    project_root: PathBuf,
    config: BuilderConfig,
}

impl DockerBuilder {
    pub fn new(
        project_name: impl Into<String>,
        project_root: impl Into<PathBuf>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            project_root: project_root.into(),
            config,
        }
    }

    /// パイプライン全体を実行
    ///
    /// 失敗してもエラーを [`BuildReport`] に畳み込んで返します。
    /// トンネルを開いた場合は、成否に関わらずここで閉じます。
    pub async fn run(self) -> BuildReport {
        let image_name = project_image_name(&self.project_name);
        let mut diagnostics = Vec::new();
        let mut tunnel: Option<SshTunnel> = None;

        let result = self
            .run_pipeline(&image_name, &mut diagnostics, &mut tunnel)
            .await;

        // 失敗時も必ずトンネルを閉じる。閉じ損ねは記録するだけで、
        // 元のエラーを上書きしない。
        if let Some(mut tunnel) = tunnel {
            tunnel.close().await;
        }

        match result {
            Ok(()) => {
                tracing::info!("Successfully built: {}", image_name);
                BuildReport {
                    success: true,
                    image_name,
                    diagnostics,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("Build pipeline failed: {}", e);
                BuildReport {
                    success: false,
                    image_name,
                    diagnostics,
                    error: Some(e),
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        image_name: &str,
        diagnostics: &mut Vec<String>,
        tunnel_slot: &mut Option<SshTunnel>,
    ) -> Result<()> {
        // 1. エンドポイントの解決
        let mut endpoint = DockerEndpoint::resolve(self.config.host.as_deref())?;

        // 2. SSH トンネル (tcp/tls エンドポイントのみ)
        if let Some(ssh) = &self.config.ssh
            && ssh.tunnel
            && let DockerEndpoint::Tcp { host, port, tls } = endpoint.clone()
        {
            ssh.validate()?;
            tracing::info!("Connecting to Docker daemon via SSH...");

            let tunnel = SshTunnel::open(ssh, &host, port).await?;
            endpoint = tunnel.local_endpoint(tls);
            *tunnel_slot = Some(tunnel);
        }

        // 3. Dockerfile の確認とコンテキスト作成
        let dockerfile = self.project_root.join("Dockerfile");
        if !dockerfile.exists() {
            return Err(BuildError::DockerfileNotFound(dockerfile));
        }

        tracing::info!("Uploading build context...");
        let context = ContextBuilder::create_context(&self.project_root)?;

        let client = DaemonClient::new(endpoint);

        // 4. ビルド (常に no-cache)
        tracing::info!("Building image {} (no-cache)...", image_name);
        let mut lines = client.build(image_name, &context).await?;
        drain_stream(&mut lines, diagnostics, None, BuildError::BuildFailed).await?;

        // 5. tag + push (設定されている場合のみ)
        if let Some(push) = &self.config.push {
            push.validate()?;
            let remote_ref = format!("{}/{}", push.remote, image_name);

            tracing::info!("Tagging image for remote push...");
            client.tag(image_name, &remote_ref).await?;

            tracing::info!("Pushing image to {} (this may take a while)...", push.remote);
            let mut lines = client.push(&remote_ref, push).await?;
            let mut progress = PushProgress::new();
            drain_stream(
                &mut lines,
                diagnostics,
                Some(&mut progress),
                BuildError::PushFailed,
            )
            .await?;
            progress.finish();
        }

        Ok(())
    }
}

/// ステータスストリームを最後まで読み切る
///
/// `error` イベントが現れた時点で `on_error` に畳んで中断します。
/// それまでに受け取った診断行は失敗時でも `diagnostics` に残ります。
async fn drain_stream(
    lines: &mut StatusLines,
    diagnostics: &mut Vec<String>,
    mut progress: Option<&mut PushProgress>,
    on_error: fn(String) -> BuildError,
) -> Result<()> {
    let mut parser = StatusParser::new();

    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parser.parse_line(&line) {
                Some(StatusEvent::Error(message)) => break Err(on_error(message)),
                Some(StatusEvent::Stream(text)) => print!("{}", text),
                Some(StatusEvent::Status(text)) => println!("{}", text.cyan()),
                Some(StatusEvent::Layer { id, .. }) => {
                    if let Some(progress) = progress.as_deref_mut() {
                        progress.update(&id, parser.layers());
                    }
                }
                None => {}
            },
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    diagnostics.extend(parser.take_diagnostics());
    result
}
