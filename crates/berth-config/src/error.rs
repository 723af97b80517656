use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません: {0}\n\nヒント:\n  • BERTH_CONFIG_PATH 環境変数のパスを確認してください\n  • 未指定の場合は ./berth.local.yaml, ./berth.yaml, ./.berth/berth.yaml, ~/.config/berth/berth.yaml の順に検索します"
    )]
    ConfigFileNotFound(PathBuf),

    #[error("設定値が不正です: {0}")]
    Invalid(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML パースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
