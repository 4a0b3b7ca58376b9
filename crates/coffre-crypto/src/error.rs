use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("first chunk too short for stream header: got {got} bytes, need {need}")]
    HeaderTooShort { got: usize, need: usize },

    #[error("stream ended before a full authentication tag: got {got} bytes, need {need}")]
    IncompleteTail { got: usize, need: usize },

    #[error("authentication tag mismatch: stream corrupted or wrong password")]
    MacMismatch,

    #[error("stream already finished")]
    Finished,
}
