//! Log-kind monitor: tails a configured file from its last-read offset,
//! emitting new lines as a `log`-kind datapoint. Generalizes the original
//! source's auth-log-specific reader to an arbitrary configured path, since
//! the platform-specific default log location is itself an
//! external-collaborator concern (§1).
//!
//! Log-kind monitors carry no `expected_values`; the alert engine's
//! "no threshold set" branch applies unconditionally (see `alert::check`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};

use crate::collector::{CollectError, CollectResult, Collector};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};

pub struct LogTailMonitor {
    descriptor: MonitorDescriptor,
    path: PathBuf,
    offset: AtomicU64,
}

impl LogTailMonitor {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, path: PathBuf, poll_interval: u64) -> Self {
        Self {
            descriptor: MonitorDescriptor {
                uid: uid.into(),
                name: name.into(),
                kind: MonitorKind::Log,
                sources: HashMap::from([("line".to_string(), "text".to_string())]),
                states: vec![],
                importance: MonitorDescriptor::DEFAULT_IMPORTANCE,
                poll_interval: Some(poll_interval),
                aggregation_interval: MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL,
                flop_threshold: MonitorDescriptor::DEFAULT_FLOP_THRESHOLD,
                pulls_processes: false,
            },
            path,
            offset: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Collector for LogTailMonitor {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| CollectError::Failed(format!("failed to open {}: {e}", self.path.display())))?;

        let start = self.offset.load(Ordering::SeqCst);
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| CollectError::Failed(format!("failed to seek: {e}")))?;

        let mut reader = BufReader::new(file);
        let mut last_line = String::new();
        let mut bytes_read: u64 = 0;
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| CollectError::Failed(format!("failed to read: {e}")))?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            last_line = line;
        }
        self.offset.fetch_add(bytes_read, Ordering::SeqCst);

        let mut readings = HashMap::new();
        readings.insert(
            "line".to_string(),
            Observation::State(last_line.trim_end().to_string()),
        );
        Ok(Datapoint::new(
            readings,
            Utc::now().timestamp(),
            self.descriptor.poll_interval.unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn collect_reads_new_lines_since_last_offset() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        {
            let mut f = tokio::fs::File::create(&path).await.unwrap();
            f.write_all(b"first\nsecond\n").await.unwrap();
        }
        let monitor = LogTailMonitor::new("log1", "test log", path.clone(), 5);
        let dp1 = monitor.collect().await.unwrap();
        assert_eq!(
            dp1.readings.get("line").unwrap().as_state(),
            Some("second")
        );

        {
            let mut f = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .unwrap();
            f.write_all(b"third\n").await.unwrap();
        }
        let dp2 = monitor.collect().await.unwrap();
        assert_eq!(dp2.readings.get("line").unwrap().as_state(), Some("third"));
    }
}
