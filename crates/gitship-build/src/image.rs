//! イメージ名の正規化
//!
//! プロジェクト名を Docker が受け付けるイメージ名に変換します。

/// Gitship が作成するイメージの名前プレフィックス
pub const IMAGE_PREFIX: &str = "gsp-";

/// プロジェクト名を Docker 互換のイメージ名に正規化
///
/// `.` は `_` に置換して位置を保持し、それ以外で
/// `[a-zA-Z0-9_-]` に含まれない文字は取り除きます。冪等です。
pub fn sanitize_image_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '.' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// プロジェクト名から完全なイメージ名を作成 (プレフィックス付き)
pub fn project_image_name(project_name: &str) -> String {
    format!("{}{}", IMAGE_PREFIX, sanitize_image_name(project_name))
}
