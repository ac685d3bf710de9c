//! ラベルテーブル
//!
//! ラベルファイルは1行1クラスのUTF-8テキスト。行の順番がモデル出力チャネルの順番になる。

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::types::Label;

/// 読み込み後は変更されないクラス名の一覧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    /// ラベルファイルを読み込む
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid labels file: {}", path.display()))
    }

    /// 改行区切りのテキストからテーブルを作る（行末の空白・CRは除去）
    ///
    /// ファイル末尾の空行は無視する。途中の空行はエラー。
    pub fn parse(content: &str) -> Result<Self> {
        let mut names: Vec<String> = content.lines().map(|line| line.trim_end().to_string()).collect();
        while names.last().is_some_and(|name| name.is_empty()) {
            names.pop();
        }
        Self::from_names(names)
    }

    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            bail!("label list is empty");
        }
        if let Some(index) = names.iter().position(|name| name.is_empty()) {
            bail!("label at line {} is blank", index + 1);
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.names.iter().enumerate().map(|(index, name)| Label {
            index,
            name: name.clone(),
        })
    }
}
