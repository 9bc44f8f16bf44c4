use crate::point::Point;
use crate::sink::{PointWriter, WriterError};
use async_trait::async_trait;

/// A writer that simply drops all points.
///
/// Useful for measuring the overhead of the layer and the sink without
/// any external I/O, and for tests that don't care about persistence.
#[derive(Clone, Default)]
pub struct NoopWriter;

#[async_trait]
impl PointWriter for NoopWriter {
    async fn write_batch(&self, _points: &[Point]) -> Result<(), WriterError> {
        Ok(())
    }
}
