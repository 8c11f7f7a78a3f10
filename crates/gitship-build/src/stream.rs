//! デーモンのステータスストリーム解析
//!
//! build / push のレスポンスは改行区切りの JSON オブジェクトとして
//! 届きます。1 行ずつイベントに分類し、push ではレイヤーごとの
//! 進捗モデル ([`LayerProgress`]) を更新します。

use serde::Deserialize;
use std::fmt;

/// 解析済みのステータスイベント
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// ビルドログの出力 (表示専用)
    Stream(String),
    /// レイヤーに紐付かないステータス行
    Status(String),
    /// レイヤーごとのステータス更新
    Layer { id: String, phase: LayerPhase },
    /// デーモンが報告したエラー (ストリームはここで終了)
    Error(String),
}

/// レイヤーの進捗フェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    Preparing,
    Waiting,
    /// 既にリモートに存在するレイヤー (完了扱い)
    LayerExists,
    /// 転送中 (0-100%)
    Pushing,
    Complete,
}

impl fmt::Display for LayerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LayerPhase::Preparing => "Preparing",
            LayerPhase::Waiting => "Waiting",
            LayerPhase::LayerExists => "Layer already exists",
            LayerPhase::Pushing => "Pushing",
            LayerPhase::Complete => "Pushed",
        };
        write!(f, "{}", text)
    }
}

/// 1 レイヤーの進捗状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerState {
    pub phase: LayerPhase,
    /// 0-100
    pub percent: u8,
}

/// レイヤー ID → 進捗のマップ
///
/// 表示順を安定させるため、最初に現れた順序を保持します。
/// 更新するのはパーサーだけで、他からは読み取り専用です。
#[derive(Debug, Default)]
pub struct LayerProgress {
    layers: Vec<(String, LayerState)>,
}

impl LayerProgress {
    pub fn get(&self, id: &str) -> Option<&LayerState> {
        self.layers
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, state)| state)
    }

    /// 挿入順のイテレータ
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LayerState)> {
        self.layers
            .iter()
            .map(|(id, state)| (id.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn entry_mut(&mut self, id: &str) -> &mut LayerState {
        if let Some(pos) = self.layers.iter().position(|(key, _)| key == id) {
            return &mut self.layers[pos].1;
        }
        self.layers.push((
            id.to_string(),
            LayerState {
                phase: LayerPhase::Preparing,
                percent: 0,
            },
        ));
        &mut self.layers.last_mut().unwrap().1
    }
}

/// デーモンが送ってくる 1 行分の JSON
#[derive(Debug, Deserialize)]
struct StatusLine {
    stream: Option<String>,
    status: Option<String>,
    id: Option<String>,
    error: Option<String>,
    #[serde(rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
    #[serde(rename = "progressDetail")]
    progress_detail: Option<ProgressDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressDetail {
    current: Option<u64>,
    total: Option<u64>,
}

/// ステータスストリームのパーサー
///
/// 1 レスポンスストリームにつき 1 インスタンス。push のレイヤー進捗と、
/// 画面表示用に蓄積した診断メッセージを保持します。
#[derive(Debug, Default)]
pub struct StatusParser {
    layers: LayerProgress,
    diagnostics: Vec<String>,
}

impl StatusParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 行を解析してイベントに分類
    ///
    /// JSON として解釈できない行 (デーモンの keep-alive 等) は
    /// 読み飛ばして `None` を返します。認識できないステータスは
    /// 診断として記録するだけで、ストリームは中断しません。
    pub fn parse_line(&mut self, line: &str) -> Option<StatusEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let data: StatusLine = match serde_json::from_str(line) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("Skipping undecodable status line ({}): {}", e, line);
                return None;
            }
        };

        // error フィールドは即時終了
        if let Some(message) = data.error.or_else(|| {
            data.error_detail.and_then(|detail| detail.message)
        }) {
            return Some(StatusEvent::Error(message));
        }

        if let Some(text) = data.stream {
            self.diagnostics.push(text.trim_end().to_string());
            return Some(StatusEvent::Stream(text));
        }

        match (data.status, data.id) {
            (Some(status), None) => {
                self.diagnostics.push(status.clone());
                Some(StatusEvent::Status(status))
            }
            (Some(status), Some(id)) => {
                let phase = self.apply_layer_status(&id, &status, data.progress_detail.as_ref())?;
                Some(StatusEvent::Layer { id, phase })
            }
            (None, _) => {
                tracing::debug!("Unrecognized status line: {}", line);
                None
            }
        }
    }

    /// レイヤーステータスを進捗モデルに反映
    fn apply_layer_status(
        &mut self,
        id: &str,
        status: &str,
        progress: Option<&ProgressDetail>,
    ) -> Option<LayerPhase> {
        match status {
            "Preparing" => {
                let entry = self.layers.entry_mut(id);
                entry.phase = LayerPhase::Preparing;
                entry.percent = 0;
                Some(LayerPhase::Preparing)
            }
            "Waiting" => {
                // percent は前回の値を維持
                let entry = self.layers.entry_mut(id);
                entry.phase = LayerPhase::Waiting;
                Some(LayerPhase::Waiting)
            }
            "Layer already exists" => {
                let entry = self.layers.entry_mut(id);
                entry.phase = LayerPhase::LayerExists;
                entry.percent = 100;
                Some(LayerPhase::LayerExists)
            }
            "Pushing" => {
                let percent = progress
                    .and_then(|p| match (p.current, p.total) {
                        (Some(current), Some(total)) if total > 0 => {
                            Some(((current * 100) / total).min(100) as u8)
                        }
                        _ => None,
                    });
                let entry = self.layers.entry_mut(id);
                entry.phase = LayerPhase::Pushing;
                if let Some(percent) = percent {
                    entry.percent = percent;
                }
                Some(LayerPhase::Pushing)
            }
            "Pushed" => {
                let entry = self.layers.entry_mut(id);
                entry.phase = LayerPhase::Complete;
                entry.percent = 100;
                Some(LayerPhase::Complete)
            }
            other => {
                // 未知のステータスは互換性のため読み飛ばして続行
                tracing::debug!("Unknown layer status '{}' for {}", other, id);
                self.diagnostics.push(format!("{}: {}", id, other));
                None
            }
        }
    }

    pub fn layers(&self) -> &LayerProgress {
        &self.layers
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// 蓄積した診断メッセージを取り出す
    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }
}
