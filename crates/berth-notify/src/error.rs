use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook URL が空です")]
    MissingUrl,

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
