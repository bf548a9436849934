use anyhow::Result;

use crate::samples::Sample;

/// Consumer of decoded sample sets. Writing the tabular artifact itself is an
/// external collaborator's job; the worker only hands the ordered set over.
pub trait SampleSink: Send + Sync {
    fn emit(&self, host: &str, file_name: &str, samples: &[Sample]) -> Result<()>;
}

/// Default sink: records that a decode happened and how large it was.
pub struct LogSink;

impl SampleSink for LogSink {
    fn emit(&self, host: &str, file_name: &str, samples: &[Sample]) -> Result<()> {
        tracing::info!(host, file = file_name, records = samples.len(), "decoded sample set");
        Ok(())
    }
}
