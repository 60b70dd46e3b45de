use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("frame is not valid json: {0}")]
    Json(String),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame type discriminator must be a string")]
    InvalidDiscriminator,
    #[error("status frame does not match schema: {0}")]
    Schema(String),
    #[error("device index {0} reported more than once")]
    DuplicateIndex(u32),
    #[error("device {index} memory out of range: used {used} MiB, total {total} MiB")]
    MemoryOutOfRange { index: u32, used: f64, total: f64 },
}
