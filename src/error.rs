use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported tile source '{0}'")]
    SourceConfig(String),

    #[error("tile fetch failed: {0}")]
    TileFetch(String),

    #[error("tile decode failed: {0}")]
    TileDecode(String),

    #[error("renderer busy")]
    RendererBusy,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::TileFetch(err.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::TileDecode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
