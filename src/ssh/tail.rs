use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info};

use crate::config::{ConfigError, JsonConfigStore};

pub type LogPositions = HashMap<String, u64>;

/// Follows log files across restarts by persisting the byte offset read so far.
pub struct LogTailer {
    store: JsonConfigStore<LogPositions>,
    positions: LogPositions,
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Reads the complete lines between `saved` and the end of the file. Returns
/// them with the offset just past the last newline.
fn read_from(path: &Path, saved: u64) -> io::Result<(Vec<String>, u64)> {
    let mut file = File::open(path)?;
    let end = file.metadata()?.len();
    let mut start = saved;
    if start > end {
        info!(
            path = ?path,
            saved = start,
            size = end,
            "Log file shrank, reading from the start."
        );
        start = 0;
    }

    file.seek(SeekFrom::Start(start))?;
    let mut appended = Vec::new();
    file.take(end - start).read_to_end(&mut appended)?;

    let complete = appended
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |idx| idx + 1);
    let lines = String::from_utf8_lossy(&appended[..complete])
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();
    Ok((lines, start + complete as u64))
}

impl LogTailer {
    pub fn new(store: JsonConfigStore<LogPositions>) -> Self {
        let positions = store.load();
        Self { store, positions }
    }

    pub fn position(&self, path: &Path) -> Option<u64> {
        self.positions.get(&key(path)).copied()
    }

    /// Moves the offset to the current end of `path`, ignoring existing content.
    pub async fn skip_existing(&mut self, path: &Path) -> io::Result<()> {
        let end = tokio::fs::metadata(path).await?.len();
        self.positions.insert(key(path), end);
        info!(path = ?path, position = end, "Skipping existing log content.");
        Ok(())
    }

    /// Returns the complete lines appended since the last call.
    ///
    /// A saved offset past the end of the file means it was rotated or
    /// truncated, and reading restarts from the beginning. A trailing line
    /// without its newline is left for the next call.
    pub async fn read_new_lines(&mut self, path: &Path) -> io::Result<Vec<String>> {
        let saved = self.position(path).unwrap_or(0);
        let owned: PathBuf = path.to_path_buf();
        let (lines, next) = task::spawn_blocking(move || read_from(&owned, saved))
            .await
            .map_err(io::Error::other)??;
        self.positions.insert(key(path), next);
        debug!(path = ?path, count = lines.len(), "Read new log lines.");
        Ok(lines)
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        self.store.save_async(self.positions.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn tailer(dir: &Path) -> LogTailer {
        LogTailer::new(JsonConfigStore::new(dir.join("last_position.json")))
    }

    #[tokio::test]
    async fn existing_content_is_skipped_and_new_lines_returned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("auth.log");
        append(&log, "old line 1\nold line 2\n");

        let mut tailer = tailer(dir.path());
        tailer.skip_existing(&log).await.unwrap();
        assert!(tailer.read_new_lines(&log).await.unwrap().is_empty());

        append(&log, "new line\n");
        assert_eq!(tailer.read_new_lines(&log).await.unwrap(), vec!["new line"]);
        assert!(tailer.read_new_lines(&log).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_line_waits_for_its_newline() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("auth.log");
        append(&log, "");
        let mut tailer = tailer(dir.path());

        append(&log, "complete\npart");
        assert_eq!(tailer.read_new_lines(&log).await.unwrap(), vec!["complete"]);
        append(&log, "ial\n");
        assert_eq!(tailer.read_new_lines(&log).await.unwrap(), vec!["partial"]);
    }

    #[tokio::test]
    async fn truncated_file_is_read_from_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("auth.log");
        append(&log, "a fairly long first line\nand a second one\n");
        let mut tailer = tailer(dir.path());
        tailer.skip_existing(&log).await.unwrap();

        std::fs::write(&log, "rotated\n").unwrap();
        assert_eq!(tailer.read_new_lines(&log).await.unwrap(), vec!["rotated"]);
        assert_eq!(tailer.position(&log), Some(8));
    }

    #[tokio::test]
    async fn positions_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("auth.log");
        append(&log, "seen\n");

        let mut first = tailer(dir.path());
        first.read_new_lines(&log).await.unwrap();
        first.save().await.unwrap();

        append(&log, "unseen\n");
        let mut second = tailer(dir.path());
        assert_eq!(second.read_new_lines(&log).await.unwrap(), vec!["unseen"]);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = tailer(dir.path());
        assert!(tailer
            .read_new_lines(&dir.path().join("absent.log"))
            .await
            .is_err());
    }
}
