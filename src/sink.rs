use crate::point::Point;
use async_trait::async_trait;

/// Error returned by a [`PointWriter`].
#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("http request failed: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("write rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "influx")]
impl From<reqwest::Error> for WriterError {
    fn from(err: reqwest::Error) -> Self {
        WriterError::Http(Box::new(err))
    }
}

impl WriterError {
    /// Whether retrying the same batch could succeed.
    ///
    /// Client errors other than 408 and 429 mean the batch itself was
    /// rejected and will be rejected again.
    pub fn is_retryable(&self) -> bool {
        match self {
            WriterError::Http(_) => true,
            WriterError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            WriterError::InvalidUrl(_) => false,
            WriterError::Other(_) => true,
        }
    }
}

/// Destination that points are written to in batches.
///
/// Implementations transport points to a concrete store (InfluxDB, a test
/// double, /dev/null). The sink calls `write_batch` from its delivery task
/// and never from the logging call site.
#[async_trait]
pub trait PointWriter: Send + Sync {
    /// Write a batch of points.
    ///
    /// **Returns**
    /// - `Ok(())` if the store accepted the whole batch.
    /// - `Err(..)` on network, HTTP status or encoding failure. The sink
    ///   retries retryable errors with backoff before giving up on the
    ///   batch.
    async fn write_batch(&self, points: &[Point]) -> Result<(), WriterError>;

    /// Flush anything the writer buffers on its own side.
    ///
    /// Called once during shutdown, after the last batch. Default
    /// implementation is a no-op.
    async fn flush(&self) -> Result<(), WriterError> {
        Ok(())
    }
}
