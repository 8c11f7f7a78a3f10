use anyhow::Context;
use colored::Colorize;
use gitship_build::DockerBuilder;
use std::path::Path;

/// ビルドコマンドを処理
pub async fn handle_build_command(
    path: &Path,
    name: Option<&str>,
    no_push: bool,
) -> anyhow::Result<()> {
    let project_root = path
        .canonicalize()
        .with_context(|| format!("プロジェクトパスを解決できません: {}", path.display()))?;

    // イメージのベース名は --name 指定がなければディレクトリ名
    let project_name = match name {
        Some(name) => name.to_string(),
        None => project_root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .ok_or_else(|| anyhow::anyhow!("プロジェクト名を決定できません"))?,
    };

    let deployer = gitship_config::load(&project_root)?;

    // ビルダーバックエンドは設定値で選択する (現在は docker のみ)
    if deployer.builder != "docker" {
        anyhow::bail!(
            "未対応のビルダーです: \"{}\" (サポート: docker)",
            deployer.builder
        );
    }

    let mut config = deployer.config;
    if no_push {
        config.push = None;
    }

    println!("{}", "Dockerイメージをビルド中...".green());

    let report = DockerBuilder::new(project_name, project_root, config)
        .run()
        .await;

    if report.success {
        println!(
            "{} ビルド完了: {}",
            "✓".green(),
            report.image_name.cyan()
        );
        Ok(())
    } else {
        match report.error {
            Some(error) => Err(anyhow::Error::new(error)),
            None => Err(anyhow::anyhow!("ビルドに失敗しました")),
        }
    }
}
