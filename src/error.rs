use thiserror::Error;

#[derive(Error, Debug)]
pub enum NdStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{backend}' {op} failed: {source}")]
    Backend {
        backend: String,
        op: &'static str,
        source: Box<NdStoreError>,
    },
    #[error("read region not fully covered by stored fragments and no fill value defined")]
    IncompleteData,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("staging allocation of {0} bytes failed")]
    OutOfMemory(usize),
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
    #[error("Bad magic number in {0}")]
    BadMagic(&'static str),
    #[error("Parse error: {0}")]
    Parse(&'static str),
    #[error("CRC mismatch in {0}")]
    CrcMismatch(&'static str),
}

pub type Result<T> = std::result::Result<T, NdStoreError>;
