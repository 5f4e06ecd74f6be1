use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::file_id::FileId;

/// Outcome of one poll cycle.
pub enum Poll {
    /// Complete new lines since the last poll, possibly none.
    Lines(Vec<String>),
    /// The path no longer resolves to the file we opened. Terminal for
    /// this follower; a replacement file is someone else's discovery.
    RotatedAway,
}

/// Where to begin reading a freshly opened file.
///
/// `End` is for files whose history predates us and must not be
/// replayed. `Beginning` is for files known to have appeared under
/// watch, where everything in them is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
}

/// Follows a single file by offset, handing back complete lines as they
/// are appended and holding an unterminated tail until its newline
/// arrives.
pub struct Follower {
    path: PathBuf,
    file: File,
    id: FileId,
    offset: u64,
    partial: Vec<u8>,
}

impl Follower {
    pub async fn open(
        path: impl Into<PathBuf>,
        start: StartPosition,
    ) -> std::io::Result<Follower> {
        let path = path.into();
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;

        let offset = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => metadata.len(),
        };

        Ok(Follower {
            path,
            id: FileId::from_metadata(&metadata),
            offset,
            partial: Vec::new(),
            file,
        })
    }

    pub async fn poll(&mut self) -> std::io::Result<Poll> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Deleted, or the path is unreadable. Either way our handle
            // is no longer the file at this path.
            Err(_) => return Ok(Poll::RotatedAway),
        };

        if FileId::from_metadata(&metadata) != self.id {
            return Ok(Poll::RotatedAway);
        }

        if metadata.len() < self.offset {
            // Truncated in place: treat the content as a fresh file.
            self.offset = 0;
            self.partial.clear();
        }

        if metadata.len() == self.offset {
            return Ok(Poll::Lines(Vec::new()));
        }

        self.file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        let n = self.file.read_to_end(&mut buf).await?;
        self.offset += n as u64;

        self.partial.extend_from_slice(&buf);
        Ok(Poll::Lines(self.split_lines()))
    }

    fn split_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(pos) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            match std::str::from_utf8(&self.partial[start..end]) {
                Ok(line) => lines.push(line.to_string()),
                // Lines that are not valid UTF-8 are dropped.
                Err(_) => {}
            }
            start = end + 1;
        }

        self.partial.drain(..start);
        lines
    }
}
