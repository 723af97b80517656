use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(
        "プロセス '{0}' が見つかりません\n\nヒント:\n  • berth ps で登録済みのプロセスを確認してください"
    )]
    ProcessNotFound(String),

    #[error("プロセス '{0}' は既に存在します")]
    DuplicateName(String),

    #[error(
        "プロセス名 '{name}' は使用できません: {reason}\n\nヒント:\n  • 英小文字・数字・'-'・'_' のみ使用できます（先頭は英小文字か数字）\n  • 63文字以内にしてください"
    )]
    InvalidName { name: String, reason: String },

    #[error("状態ファイルのバージョン {found} はサポート外です（対応: {supported}）")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("状態ファイルの書き込みに失敗しました: {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
