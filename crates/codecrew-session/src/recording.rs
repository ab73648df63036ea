//! Local session recording.
//!
//! Buffers encoded media chunks from the local capture pipeline and
//! finalizes them into a single artifact on stop. Recording covers
//! the local participant's outgoing media only, not the composed
//! call; that is a known limitation of the baseline behavior, not
//! something this sink quietly extends.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Result, SessionError};

const RECORDING_MIME: &str = "video/webm";

/// A finalized recording artifact, ready for the export/download
/// collaborator.
#[derive(Debug)]
pub struct Recording {
    pub data: Vec<u8>,
    pub mime: &'static str,
    pub file_name: String,
}

pub struct RecordingSink {
    session_id: Uuid,
    chunks: Vec<Vec<u8>>,
    active: bool,
}

impl RecordingSink {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            chunks: Vec::new(),
            active: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active
    }

    /// Begin buffering. Role enforcement (host only) happens at the
    /// session layer, which owns the local identity.
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            return Err(SessionError::RecordingActive);
        }
        self.chunks.clear();
        self.active = true;
        tracing::info!(session_id = %self.session_id, "recording started");
        Ok(())
    }

    /// Append one encoded chunk. Chunks delivered while no recording
    /// is active are discarded.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if !self.active {
            return;
        }
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Stop and concatenate everything buffered into one deliverable.
    pub fn stop(&mut self) -> Result<Recording> {
        if !self.active {
            return Err(SessionError::RecordingInactive);
        }
        self.active = false;
        let data: Vec<u8> = self.chunks.drain(..).flatten().collect();
        let file_name = format!(
            "codecrew-session-{}-{}.webm",
            self.session_id,
            Utc::now().to_rfc3339()
        );
        tracing::info!(bytes = data.len(), %file_name, "recording finalized");
        Ok(Recording {
            data,
            mime: RECORDING_MIME,
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_concatenate_in_order() {
        let mut sink = RecordingSink::new(Uuid::nil());
        sink.start().unwrap();
        sink.push_chunk(vec![1, 2]);
        sink.push_chunk(vec![]);
        sink.push_chunk(vec![3]);
        let recording = sink.stop().unwrap();
        assert_eq!(recording.data, vec![1, 2, 3]);
        assert_eq!(recording.mime, "video/webm");
        assert!(recording.file_name.starts_with("codecrew-session-"));
        assert!(recording.file_name.ends_with(".webm"));
    }

    #[test]
    fn double_start_and_idle_stop_are_errors() {
        let mut sink = RecordingSink::new(Uuid::nil());
        assert!(matches!(sink.stop(), Err(SessionError::RecordingInactive)));
        sink.start().unwrap();
        assert!(matches!(sink.start(), Err(SessionError::RecordingActive)));
    }

    #[test]
    fn chunks_outside_recording_are_dropped() {
        let mut sink = RecordingSink::new(Uuid::nil());
        sink.push_chunk(vec![9, 9]);
        sink.start().unwrap();
        sink.push_chunk(vec![1]);
        let recording = sink.stop().unwrap();
        assert_eq!(recording.data, vec![1]);
    }
}
