//! On-disk evidence storage
//!
//! Each saved [`ScreenshotSet`] becomes one directory of JPEG files named
//! after the capture time and stream. Directory names sort chronologically,
//! so pruning removes the lexicographically smallest names first.

use std::io;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;

use crate::error::Result;
use crate::frame::Frame;

use super::set::ScreenshotSet;

/// JPEG quality used for evidence frames
const JPEG_QUALITY: u8 = 85;

/// Bounded-count evidence directory
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
    max_events: usize,
}

impl EvidenceStore {
    /// Store at most `max_events` event directories under `dir` (minimum 1)
    pub fn new(dir: impl Into<PathBuf>, max_events: usize) -> Self {
        Self {
            dir: dir.into(),
            max_events: max_events.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Write the set's frames and prune old events
    ///
    /// Returns the event directory.
    pub async fn save(&self, set: &ScreenshotSet) -> Result<PathBuf> {
        let name = format!(
            "{}_{}",
            set.captured_wall.format("%Y%m%dT%H%M%S%.3fZ"),
            sanitize(set.stream.as_str())
        );
        let event_dir = self.dir.join(name);
        tokio::fs::create_dir_all(&event_dir).await?;

        for (label, frame) in set.frames() {
            let jpeg = encode_jpeg(frame.clone()).await?;
            tokio::fs::write(event_dir.join(format!("{}.jpg", label)), jpeg).await?;
        }

        tracing::debug!(stream = %set.stream, dir = %event_dir.display(), "Evidence saved");

        self.prune().await?;
        Ok(event_dir)
    }

    /// Event directories, oldest first
    pub async fn events(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Delete the oldest event directories beyond `max_events`
    pub async fn prune(&self) -> Result<usize> {
        let dirs = self.events().await?;
        let excess = dirs.len().saturating_sub(self.max_events);

        for dir in &dirs[..excess] {
            tokio::fs::remove_dir_all(dir).await?;
            tracing::debug!(dir = %dir.display(), "Evidence pruned");
        }
        Ok(excess)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn encode_jpeg(frame: Frame) -> Result<Vec<u8>> {
    let encoded = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
        let image = frame.to_rgb_image().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame {} does not match {}x{}", frame.seq, frame.width, frame.height),
            )
        })?;

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&image)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(out)
    })
    .await
    .map_err(io::Error::other)??;

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::time::Instant;

    use super::*;
    use crate::frame::StreamId;

    fn frame(seq: u64) -> Frame {
        Frame::copy_from(StreamId::new("cam"), seq, 4, 4, Instant::now(), &[seq as u8; 48])
    }

    fn set_at(offset_secs: i64, after: bool) -> ScreenshotSet {
        let mut set = ScreenshotSet::new(
            StreamId::new("front door"),
            frame(1),
            frame(2),
            after.then(|| frame(3)),
        );
        set.captured_wall = Utc::now() + ChronoDuration::seconds(offset_secs);
        set
    }

    #[tokio::test]
    async fn test_save_writes_jpegs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(tmp.path(), 5);

        let dir = store.save(&set_at(0, false)).await.unwrap();

        assert!(dir.join("before.jpg").exists());
        assert!(dir.join("now.jpg").exists());
        assert!(!dir.join("after.jpg").exists());
        assert!(dir.file_name().unwrap().to_string_lossy().ends_with("front_door"));

        let bytes = std::fs::read(dir.join("now.jpg")).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(tmp.path(), 2);

        let first = store.save(&set_at(0, true)).await.unwrap();
        let second = store.save(&set_at(10, true)).await.unwrap();
        let third = store.save(&set_at(20, true)).await.unwrap();

        let events = store.events().await.unwrap();
        assert_eq!(events, vec![second, third]);
        assert!(!first.exists());
    }

    #[tokio::test]
    async fn test_events_on_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(tmp.path().join("missing"), 2);
        assert!(store.events().await.unwrap().is_empty());
        assert_eq!(store.prune().await.unwrap(), 0);
    }
}
