use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("stored key is not valid UTF-8: {0}")]
    InvalidKey(String),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Heed(e.to_string())
    }
}

impl From<std::io::Error> for LmdbError {
    fn from(e: std::io::Error) -> Self {
        LmdbError::Io(e.to_string())
    }
}

impl From<LmdbError> for accord_store::StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::NotFound(key) => accord_store::StoreError::NotFound(key),
            LmdbError::InvalidKey(key) => accord_store::StoreError::Corruption(key),
            other => accord_store::StoreError::Backend(other.to_string()),
        }
    }
}
