//! Single-writer serialization of collected metric families.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::debug;

use crate::expfmt::{encode, MetricFamily};

/// Capacity of the family channel between fetch tasks and the writer.
/// Bounded so a stalled writer backpressures producers instead of buffering
/// without limit; senders block, data is never dropped.
pub const FAMILY_CHANNEL_CAPACITY: usize = 256;

/// Create the family channel feeding the writer.
pub fn family_channel() -> (mpsc::Sender<MetricFamily>, mpsc::Receiver<MetricFamily>) {
    mpsc::channel(FAMILY_CHANNEL_CAPACITY)
}

/// Sole consumer of the family channel; sole owner of the output stream.
///
/// Families are serialized whole, in arrival order, so one family's samples
/// are never interleaved with another's. Any write failure is fatal to the
/// run: there is no point collecting into a dead sink.
pub struct MetricWriter<W> {
    out: BufWriter<W>,
    families_written: u64,
}

impl<W: AsyncWrite + Unpin> MetricWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            families_written: 0,
        }
    }

    /// Drain the channel until every sender is gone, then finalize the
    /// stream with the end-of-stream marker, exactly once.
    ///
    /// Channel closure is the finalize signal: the lifecycle controller
    /// joins every producer before the last sender drops, so nothing can
    /// race a write past the marker.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<MetricFamily>) -> Result<()> {
        let mut buf = String::with_capacity(1024);

        while let Some(family) = rx.recv().await {
            buf.clear();
            encode::write_family(&mut buf, &family);
            self.out
                .write_all(buf.as_bytes())
                .await
                .context("writing metric family")?;
            self.families_written += 1;
        }

        self.out
            .write_all(encode::EOF.as_bytes())
            .await
            .context("finalizing output stream")?;
        self.out.flush().await.context("flushing output stream")?;

        debug!(families = self.families_written, "output stream finalized");
        Ok(())
    }

    pub fn families_written(&self) -> u64 {
        self.families_written
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}
