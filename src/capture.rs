//! Voice-note recording over an injected capture device.
//!
//! The device side is [`MediaRecorderSource`]: it streams encoded chunks on
//! an mpsc channel while recording and reports the container MIME type on
//! stop. [`VoiceRecorder`] gathers the chunks into one blob and turns it
//! into a recorded voice-note [`Attachment`].

use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::attachment::{Attachment, AttachmentSource};
use crate::error::{ChatError, Result};

/// An audio capture device that produces encoded chunks.
#[async_trait]
pub trait MediaRecorderSource: Send {
    /// Start capturing. Chunks arrive on the returned receiver.
    async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>>;

    /// Stop capturing and return the MIME type of the encoded stream.
    ///
    /// Implementations must flush pending chunks and drop their sender
    /// before returning so the receiver drains to completion.
    async fn stop(&mut self) -> Result<String>;
}

struct Recording {
    chunks: mpsc::Receiver<Bytes>,
    started: Instant,
}

/// Drives one recording at a time.
pub struct VoiceRecorder<S> {
    source: S,
    recording: Option<Recording>,
    transcript_parts: Vec<String>,
}

impl<S: MediaRecorderSource> VoiceRecorder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            recording: None,
            transcript_parts: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// # Errors
    ///
    /// Returns [`ChatError::Media`] when already recording, or the device
    /// error when capture cannot start.
    pub async fn start(&mut self) -> Result<()> {
        if self.recording.is_some() {
            return Err(ChatError::Media("already recording".into()));
        }
        let chunks = self.source.start().await?;
        self.transcript_parts.clear();
        self.recording = Some(Recording {
            chunks,
            started: Instant::now(),
        });
        tracing::debug!("voice recording started");
        Ok(())
    }

    /// Attach a live speech-recognition segment to the current recording.
    pub fn push_transcript_part(&mut self, part: impl Into<String>) {
        if self.recording.is_some() {
            self.transcript_parts.push(part.into());
        }
    }

    /// Stop and build the voice-note attachment.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Media`] when not recording or when no audio was
    /// captured.
    pub async fn stop(&mut self) -> Result<Attachment> {
        let Some(mut recording) = self.recording.take() else {
            return Err(ChatError::Media("not recording".into()));
        };
        let mime_type = self.source.stop().await?;
        let duration_ms = u64::try_from(recording.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut blob = BytesMut::new();
        while let Some(chunk) = recording.chunks.recv().await {
            blob.extend_from_slice(&chunk);
        }
        if blob.is_empty() {
            return Err(ChatError::Media("recording produced no audio".into()));
        }

        let created = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let file_name = format!("voice-note-{created}.{}", extension_for_mime(&mime_type));
        let mut attachment = Attachment::voice_note(
            BASE64.encode(&blob),
            mime_type,
            AttachmentSource::Record,
        )
        .with_file_name(file_name)
        .with_duration_ms(duration_ms);
        let parts = std::mem::take(&mut self.transcript_parts);
        if !parts.is_empty() {
            attachment = attachment.with_transcript_parts(parts);
        }
        tracing::debug!(
            attachment_id = %attachment.id,
            bytes = blob.len(),
            duration_ms,
            "voice recording finished"
        );
        Ok(attachment)
    }

    /// Stop and throw the recording away.
    pub async fn cancel(&mut self) -> Result<()> {
        let Some(recording) = self.recording.take() else {
            return Ok(());
        };
        self.transcript_parts.clear();
        let stopped = self.source.stop().await;
        drop(recording);
        stopped.map(|_| ())
    }
}

/// File extension for an audio MIME type (parameters ignored).
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::attachment::AttachmentKind;

    struct FakeMic {
        chunks: Vec<&'static [u8]>,
        tx: Option<mpsc::Sender<Bytes>>,
        stops: usize,
    }

    impl FakeMic {
        fn new(chunks: Vec<&'static [u8]>) -> Self {
            Self {
                chunks,
                tx: None,
                stops: 0,
            }
        }
    }

    #[async_trait]
    impl MediaRecorderSource for FakeMic {
        async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>> {
            let (tx, rx) = mpsc::channel(16);
            self.tx = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<String> {
            self.stops += 1;
            if let Some(tx) = self.tx.take() {
                for chunk in &self.chunks {
                    tx.send(Bytes::from_static(chunk))
                        .await
                        .map_err(|e| ChatError::Media(e.to_string()))?;
                }
            }
            Ok("audio/webm;codecs=opus".into())
        }
    }

    #[tokio::test]
    async fn chunks_become_base64_voice_note() {
        let mut recorder = VoiceRecorder::new(FakeMic::new(vec![b"ab", b"cd"]));
        recorder.start().await.unwrap();
        recorder.push_transcript_part(" hello ");
        let att = recorder.stop().await.unwrap();
        assert_eq!(att.kind, AttachmentKind::VoiceNote);
        assert_eq!(att.source, AttachmentSource::Record);
        assert_eq!(att.data, BASE64.encode(b"abcd"));
        assert_eq!(att.mime_type, "audio/webm;codecs=opus");
        assert!(att.file_name.as_deref().unwrap().ends_with(".webm"));
        assert!(att.duration_ms.is_some());
        assert_eq!(att.transcript_parts, Some(vec![" hello ".to_owned()]));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn empty_recording_is_media_error() {
        let mut recorder = VoiceRecorder::new(FakeMic::new(Vec::new()));
        recorder.start().await.unwrap();
        let err = recorder.stop().await.unwrap_err();
        assert_eq!(err.code(), "MEDIA_ERROR");
    }

    #[tokio::test]
    async fn double_start_and_idle_stop_are_rejected() {
        let mut recorder = VoiceRecorder::new(FakeMic::new(vec![b"x"]));
        assert!(recorder.stop().await.is_err());
        recorder.start().await.unwrap();
        assert!(recorder.start().await.is_err());
    }

    #[tokio::test]
    async fn cancel_stops_device_and_discards() {
        let mut recorder = VoiceRecorder::new(FakeMic::new(vec![b"x"]));
        recorder.start().await.unwrap();
        recorder.cancel().await.unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.source.stops, 1);
        recorder.cancel().await.unwrap();
        assert_eq!(recorder.source.stops, 1);
    }

    #[test]
    fn mime_extensions() {
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("audio/mp4"), "m4a");
        assert_eq!(extension_for_mime("AUDIO/WAV"), "wav");
        assert_eq!(extension_for_mime("application/octet-stream"), "bin");
    }
}
