//! JSONL-backed telegram history store.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use telewatch_events::{ChannelSide, Direction, TelegramDraft, TelegramEvent};

use crate::error::HistoryError;

/// History of both channels, ascending by sequence.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    /// Client-side telegrams.
    pub client: Vec<TelegramEvent>,
    /// Server-side telegrams.
    pub server: Vec<TelegramEvent>,
}

/// Mutable per-channel state; guarded by one mutex per channel so appends,
/// queries and clears on the same channel are serialized while the two
/// channels stay independent.
#[derive(Debug)]
struct ChannelLog {
    path: PathBuf,
    next_sequence: u64,
    last_incoming: Option<DateTime<Utc>>,
    last_outgoing: Option<DateTime<Utc>>,
}

impl ChannelLog {
    fn last_for(&mut self, direction: Direction) -> &mut Option<DateTime<Utc>> {
        match direction {
            Direction::Incoming => &mut self.last_incoming,
            Direction::Outgoing => &mut self.last_outgoing,
        }
    }
}

/// Durable, bounded-on-read, append-only log of telegrams per channel.
pub struct TelegramHistory {
    client: Mutex<ChannelLog>,
    server: Mutex<ChannelLog>,
}

impl TelegramHistory {
    /// Open (or create) the history under `base_dir`.
    ///
    /// Existing files are scanned so sequence numbering and delta baselines
    /// continue where the previous process stopped; sequences are never
    /// reused across restarts.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            client: Mutex::new(Self::recover(base_dir, ChannelSide::Client)?),
            server: Mutex::new(Self::recover(base_dir, ChannelSide::Server)?),
        })
    }

    fn recover(base_dir: &Path, channel: ChannelSide) -> Result<ChannelLog, HistoryError> {
        let path = base_dir.join(format!("{channel}.jsonl"));
        let mut log = ChannelLog {
            path,
            next_sequence: 1,
            last_incoming: None,
            last_outgoing: None,
        };
        if !log.path.exists() {
            return Ok(log);
        }
        for event in read_events(&log.path, None)? {
            log.next_sequence = event.sequence + 1;
            *log.last_for(event.direction) = Some(event.timestamp);
        }
        Ok(log)
    }

    fn channel_log(&self, channel: ChannelSide) -> &Mutex<ChannelLog> {
        match channel {
            ChannelSide::Client => &self.client,
            ChannelSide::Server => &self.server,
        }
    }

    /// Append one observed telegram.
    ///
    /// Assigns the next sequence number, stamps the capture time, computes
    /// the delta against the previous event of the same direction and makes
    /// the record durable before returning it. On failure nothing is
    /// advanced and the event must not be broadcast.
    pub async fn append(&self, draft: TelegramDraft) -> Result<TelegramEvent, HistoryError> {
        let channel = draft.channel;
        let direction = draft.direction;
        let mut log = self.channel_log(channel).lock().await;

        let timestamp = Utc::now();
        let previous = *log.last_for(direction);
        let delta = previous.map_or(0.0, |previous| {
            let micros = timestamp
                .signed_duration_since(previous)
                .num_microseconds()
                .unwrap_or(0);
            (micros.max(0) as f64) / 1_000_000.0
        });

        let event = draft.into_event(log.next_sequence, timestamp, delta);
        let line = serde_json::to_string(&event)?;
        append_line(&log.path, &line)?;

        log.next_sequence += 1;
        *log.last_for(direction) = Some(timestamp);
        Ok(event)
    }

    /// Newest `limit` telegrams of one channel, ascending by sequence.
    ///
    /// A channel without stored history yields an empty list, not an error.
    pub async fn query(
        &self,
        channel: ChannelSide,
        limit: Option<usize>,
    ) -> Result<Vec<TelegramEvent>, HistoryError> {
        let log = self.channel_log(channel).lock().await;
        if !log.path.exists() {
            return Ok(Vec::new());
        }
        read_events(&log.path, limit)
    }

    /// History of both channels, each truncated to the newest `limit`.
    pub async fn query_all(&self, limit: Option<usize>) -> Result<HistorySnapshot, HistoryError> {
        Ok(HistorySnapshot {
            client: self.query(ChannelSide::Client, limit).await?,
            server: self.query(ChannelSide::Server, limit).await?,
        })
    }

    /// Drop all stored telegrams of one channel and restart numbering at 1.
    ///
    /// Serialized with concurrent appends on the same channel; idempotent.
    pub async fn clear(&self, channel: ChannelSide) -> Result<(), HistoryError> {
        let mut log = self.channel_log(channel).lock().await;
        let file = File::create(&log.path)?;
        file.sync_data()?;
        log.next_sequence = 1;
        log.last_incoming = None;
        log.last_outgoing = None;
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_data()
}

fn read_events(path: &Path, limit: Option<usize>) -> Result<Vec<TelegramEvent>, HistoryError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TelegramEvent>(&line) {
            Ok(event) => events.push(event),
            Err(error) => {
                tracing::warn!("skipping corrupt history line in {}: {error}", path.display());
            }
        }
    }
    if let Some(limit) = limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use telewatch_events::{Direction, FrameKind};

    fn draft(channel: ChannelSide, direction: Direction) -> TelegramDraft {
        TelegramDraft::plain(
            channel,
            direction,
            FrameKind::U,
            "TESTFR act",
            "127.0.0.1:2404",
            "127.0.0.1:55000",
        )
    }

    #[tokio::test]
    async fn sequences_increase_by_one_without_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();

        for expected in 1..=5 {
            let event = history
                .append(draft(ChannelSide::Client, Direction::Outgoing))
                .await
                .unwrap();
            assert_eq!(event.sequence, expected);
        }

        let stored = history.query(ChannelSide::Client, None).await.unwrap();
        let sequences: Vec<u64> = stored.iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn channels_number_independently() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();

        history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();
        let server_first = history
            .append(draft(ChannelSide::Server, Direction::Incoming))
            .await
            .unwrap();
        assert_eq!(server_first.sequence, 1);
    }

    #[tokio::test]
    async fn delta_is_zero_for_first_event_of_each_direction() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();

        let first = history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();
        assert_eq!(first.delta, 0.0);

        // Different direction on the same channel gets its own baseline.
        let incoming = history
            .append(draft(ChannelSide::Client, Direction::Incoming))
            .await
            .unwrap();
        assert_eq!(incoming.delta, 0.0);

        let second = history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();
        assert!(second.delta >= 0.0);
    }

    #[tokio::test]
    async fn query_returns_newest_limit_in_ascending_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();

        for _ in 0..10 {
            history
                .append(draft(ChannelSide::Server, Direction::Outgoing))
                .await
                .unwrap();
        }

        let newest = history.query(ChannelSide::Server, Some(3)).await.unwrap();
        let sequences: Vec<u64> = newest.iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn query_of_empty_channel_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();
        assert!(history
            .query(ChannelSide::Server, Some(50))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn clear_resets_numbering_and_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();

        for _ in 0..4 {
            history
                .append(draft(ChannelSide::Client, Direction::Outgoing))
                .await
                .unwrap();
        }
        history.clear(ChannelSide::Client).await.unwrap();

        assert!(history
            .query(ChannelSide::Client, None)
            .await
            .unwrap()
            .is_empty());

        let restarted = history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();
        assert_eq!(restarted.sequence, 1);
        assert_eq!(restarted.delta, 0.0);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();
        history.clear(ChannelSide::Server).await.unwrap();
        history.clear(ChannelSide::Server).await.unwrap();
    }

    #[tokio::test]
    async fn reopen_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        {
            let history = TelegramHistory::open(dir.path()).unwrap();
            for _ in 0..3 {
                history
                    .append(draft(ChannelSide::Client, Direction::Outgoing))
                    .await
                    .unwrap();
            }
        }
        let reopened = TelegramHistory::open(dir.path()).unwrap();
        let event = reopened
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();
        assert_eq!(event.sequence, 4);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let history = TelegramHistory::open(dir.path()).unwrap();
        history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();

        let path = dir.path().join("client.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{ not json\n").unwrap();
        drop(file);

        history
            .append(draft(ChannelSide::Client, Direction::Outgoing))
            .await
            .unwrap();

        let events = history.query(ChannelSide::Client, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_appends_never_duplicate_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(TelegramHistory::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let history = Arc::clone(&history);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    history
                        .append(draft(ChannelSide::Client, Direction::Outgoing))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let events = history.query(ChannelSide::Client, None).await.unwrap();
        let mut sequences: Vec<u64> = events.iter().map(|event| event.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=100).collect::<Vec<u64>>());
    }
}
