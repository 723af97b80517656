use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error(
        "プロセス '{name}' のコンテナが起動していません\n\nヒント:\n  • 先にプロセスを起動してください: berth start {name}"
    )]
    ContainerNotRunning { name: String },

    #[error("コマンドの実行に失敗しました: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("{what} が {secs} 秒でタイムアウトしました")]
    Timeout { what: String, secs: u64 },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error(
        "プロセスディレクトリ {0} が見つかりません\n\nヒント:\n  • プロセスを作り直すか、servers_dir の設定を確認してください"
    )]
    ProjectDirNotFound(PathBuf),

    #[error(
        "ディレクトリ {0} は既に存在します\n\nヒント:\n  • 別の名前を指定するか、既存のディレクトリを削除してください"
    )]
    DirectoryExists(PathBuf),

    #[error(
        "プロセス '{name}' に対する '{permission}' 権限がありません\n\nヒント:\n  • プロセスの所有者に権限の付与を依頼してください"
    )]
    Forbidden { name: String, permission: String },

    #[error("{0}")]
    Core(#[from] berth_core::CoreError),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAMLエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContainerError {
    pub fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        ContainerError::CommandFailed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => ContainerError::ContainerNotFound {
                container: message.clone(),
            },
            _ => {
                let err_str = err.to_string();
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                {
                    ContainerError::DockerConnectionFailed(err_str)
                } else {
                    ContainerError::DockerApiError(err_str)
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
