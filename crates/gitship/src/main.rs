mod build;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gitship")]
#[command(about = "チェックアウト済みリポジトリからDockerイメージをビルドして届ける", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// プロジェクトをビルド (push 設定があればレジストリへ送信)
    Build {
        /// チェックアウト済みプロジェクトのパス
        #[arg(default_value = ".")]
        path: PathBuf,
        /// イメージのベース名 (省略時はディレクトリ名)
        #[arg(short, long)]
        name: Option<String>,
        /// push 設定があっても push しない
        #[arg(long)]
        no_push: bool,
    },
    /// バージョンを表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrに出力 (RUST_LOG で制御)
    tracing_subscriber::fmt::init();

    match cli.command {
        Commands::Version => {
            println!("gitship {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Build {
            path,
            name,
            no_push,
        } => {
            build::handle_build_command(&path, name.as_deref(), no_push).await?;
        }
    }

    Ok(())
}
