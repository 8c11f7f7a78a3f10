//! ビルドコンテキストの作成
//!
//! プロジェクトディレクトリを gzip 圧縮した tar アーカイブにまとめます。
//! ルートの `.dockerignore` に書かれた glob パターンは除外されます。

use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::Pattern;
use std::fs;
use std::path::Path;
use tar::Builder;

/// コンテキストサイズの警告しきい値 (500MB)
const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// エントリはディレクトリからの相対パスで格納され、
    /// 先頭にディレクトリ名は付きません。
    pub fn create_context(context_path: &Path) -> Result<Vec<u8>> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }

        tracing::debug!("Creating build context from: {}", context_path.display());

        let ignore_patterns = load_ignore_patterns(context_path).map_err(BuildError::Packaging)?;

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            append_dir(&mut tar, context_path, Path::new(""), &ignore_patterns)
                .map_err(BuildError::Packaging)?;

            tar.finish().map_err(BuildError::Packaging)?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        if archive_data.len() > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "ビルドコンテキストが大きすぎます（{}MB）。\
                 .dockerignoreで不要なファイルを除外することを推奨します。",
                archive_data.len() / 1024 / 1024
            );
        }

        Ok(archive_data)
    }
}

/// `.dockerignore` から除外パターンを読み込む
///
/// 空行と `#` で始まる行は無視します。
fn load_ignore_patterns(context_path: &Path) -> std::io::Result<Vec<Pattern>> {
    let ignore_file = context_path.join(".dockerignore");
    if !ignore_file.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&ignore_file)?;
    let mut patterns = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Pattern::new(line) {
            Ok(pattern) => patterns.push(pattern),
            Err(e) => {
                tracing::warn!("Ignoring invalid .dockerignore pattern '{}': {}", line, e);
            }
        }
    }

    Ok(patterns)
}

/// 相対パスが除外対象か判定
fn is_ignored(relative: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| {
        p.matches_path(relative)
            || relative
                .file_name()
                .is_some_and(|name| p.matches_path(Path::new(name)))
    })
}

/// ディレクトリを再帰的にアーカイブへ追加
fn append_dir<W: std::io::Write>(
    tar: &mut Builder<W>,
    root: &Path,
    relative_dir: &Path,
    patterns: &[Pattern],
) -> std::io::Result<()> {
    let dir = root.join(relative_dir);
    let mut entries: Vec<_> = fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
    // 再現性のため名前順に揃える
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let relative = relative_dir.join(entry.file_name());

        if is_ignored(&relative, patterns) {
            tracing::debug!("Excluding from context: {}", relative.display());
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            tar.append_dir(&relative, &path)?;
            append_dir(tar, root, &relative, patterns)?;
        } else {
            tar.append_path_with_name(&path, &relative)?;
        }
    }

    Ok(())
}
