//! push 進捗の表示
//!
//! [`crate::stream::LayerProgress`] の内容をレイヤーごとの
//! プログレスバーとして描画します。状態の管理はパーサー側にあり、
//! ここは与えられたデータを表示するだけです。

use crate::stream::{LayerPhase, LayerProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;

pub struct PushProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl Default for PushProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl PushProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    /// 指定レイヤーのバーを進捗モデルの現在値に合わせる
    pub fn update(&mut self, id: &str, layers: &LayerProgress) {
        let Some(state) = layers.get(id) else {
            return;
        };

        let bar = self.bars.entry(id.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg:40} [{bar:30}] {pos:>3}%")
                    .unwrap()
                    .progress_chars("=> "),
            );
            bar
        });

        bar.set_message(format!("{}: {}", id, state.phase));
        bar.set_position(state.percent as u64);

        if matches!(state.phase, LayerPhase::LayerExists | LayerPhase::Complete)
            && !bar.is_finished()
        {
            bar.finish();
        }
    }

    /// 全バーを完了させて表示を確定する
    pub fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.finish();
            }
        }
    }
}
