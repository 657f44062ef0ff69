pub mod aggregator;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod logsink;
pub mod model;
pub mod pipeline;
pub mod progress;

use std::result;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Client(#[from] client::ClientError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("missing or invalid Internet Archive credentials in ~/.ia")]
    MissingCredentials,
    #[error("input stream did not start with a meta record")]
    MissingMetaRecord,
    #[error("more than {0} internal errors encountered, aborting run")]
    TooManyInternalErrors(usize),
}

pub type Result<T> = result::Result<T, Error>;
