//! Inbound media pipeline.
//!
//! Every 20 ms media frame runs through the same sequence: decode, barge-in
//! detection while the bot is speaking, silence classification, utterance
//! accumulation, and the silence ladder that first re-engages a quiet caller
//! and eventually hangs up. A completed utterance is flushed to the speech
//! recognizer and surfaced as a [`FrameOutcome::Transcript`] for the agent
//! graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::phrases;
use crate::config::CallTuning;
use crate::core::audio::mulaw::pcm16_to_le_bytes;
use crate::core::audio::{decode_mulaw, high_pass, peak_normalize, rms, write_wav_file};
use crate::core::audio::TELEPHONY_SAMPLE_RATE;
use crate::core::rag::InterruptFlag;
use crate::core::stt::BaseSTT;
use crate::core::vad::{FrameVad, VadConfig, VadError};

use super::outgoing::OutgoingManager;

/// Upper bound on one media payload; anything longer is not a media frame.
const MAX_PAYLOAD_B64: usize = 16_384;

/// Peak level utterances are normalized to before recognition.
const NORMALIZE_TARGET: f32 = 0.9;

/// High-pass cutoff removing line hum before recognition (Hz).
const HIGH_PASS_CUTOFF_HZ: f32 = 80.0;

/// Analysis window handed to the detector (ms).
const VAD_FRAME_MS: u32 = 30;

/// What the session loop should do after one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep reading frames.
    Continue,
    /// A usable utterance was recognized; run the agent graph on it.
    Transcript(String),
    /// The caller has been silent past the hangup threshold.
    Hangup,
}

/// Per-call inbound audio state machine.
///
/// Owned by the session task; frames are processed one at a time so all
/// state is plain fields without interior locking.
pub struct IncomingAudioManager {
    call_id: String,
    tuning: CallTuning,
    spool_dir: PathBuf,
    stt: Arc<dyn BaseSTT>,
    outgoing: Arc<OutgoingManager>,
    interrupt: InterruptFlag,
    vad: FrameVad,
    /// Decoded utterance being accumulated. One mu-law byte per sample, so
    /// the sample count compares directly against the byte thresholds.
    buffer: Vec<i16>,
    /// Trailing silence on the line (ms).
    silence_ms: u64,
    /// Sustained loud audio while the bot speaks, toward a barge-in (ms).
    loud_ms: u64,
    /// The still-there prompt was already spoken for this silence stretch.
    reask_done: bool,
    /// Unspoken speech reclaimed by the last barge-in, restored when the
    /// interrupting utterance turns out to be empty.
    captured_text: Option<String>,
}

impl IncomingAudioManager {
    pub fn new(
        call_id: impl Into<String>,
        tuning: CallTuning,
        spool_dir: PathBuf,
        stt: Arc<dyn BaseSTT>,
        outgoing: Arc<OutgoingManager>,
        interrupt: InterruptFlag,
    ) -> Result<Self, VadError> {
        let vad = FrameVad::new(VadConfig {
            sample_rate: TELEPHONY_SAMPLE_RATE,
            mode: tuning.vad_mode,
            frame_ms: VAD_FRAME_MS,
            rms_silence_threshold: tuning.rms_silence_threshold,
        })?;

        Ok(Self {
            call_id: call_id.into(),
            tuning,
            spool_dir,
            stt,
            outgoing,
            interrupt,
            vad,
            buffer: Vec::new(),
            silence_ms: 0,
            loud_ms: 0,
            reask_done: false,
            captured_text: None,
        })
    }

    /// Process one base64 mu-law media payload.
    pub async fn process_media(&mut self, payload_b64: &str) -> FrameOutcome {
        if payload_b64.len() > MAX_PAYLOAD_B64 {
            warn!(
                call_id = %self.call_id,
                len = payload_b64.len(),
                "Dropping oversized media payload"
            );
            return FrameOutcome::Continue;
        }
        let mulaw = match BASE64.decode(payload_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Dropping undecodable media payload");
                return FrameOutcome::Continue;
            }
        };
        if mulaw.is_empty() {
            return FrameOutcome::Continue;
        }

        let samples = decode_mulaw(&mulaw);
        let frame_ms = samples.len() as u64 * 1_000 / u64::from(TELEPHONY_SAMPLE_RATE);

        if self.outgoing.is_sending() && self.outgoing.can_speech_be_interrupted() {
            self.detect_barge_in(&samples, frame_ms);
        } else {
            self.loud_ms = 0;
        }

        let decision = match self.vad.push_chunk(&samples) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Dropping frame the detector rejected");
                return FrameOutcome::Continue;
            }
        };

        if self.buffer.is_empty() && decision.is_silence {
            self.silence_ms += frame_ms;
        } else {
            // Silent frames inside an utterance are kept so word gaps reach
            // the recognizer intact; only speech resets the silence run.
            self.buffer.extend_from_slice(&samples);
            if decision.is_silence {
                self.silence_ms += frame_ms;
            } else {
                self.silence_ms = 0;
                self.reask_done = false;
            }
        }

        if self.silence_ms >= self.tuning.hangup_silence_secs * 1_000 {
            info!(call_id = %self.call_id, "Caller silent past the hangup threshold");
            return FrameOutcome::Hangup;
        }
        if self.silence_ms >= self.tuning.reask_silence_secs * 1_000
            && !self.reask_done
            && self.tuning.speak_anew_on_silence
        {
            self.reask_done = true;
            info!(call_id = %self.call_id, "Caller quiet, asking whether they are still there");
            self.outgoing.enqueue_text(phrases::REASK).await;
        }

        let flush_on_silence = self.buffer.len() >= self.tuning.min_utterance_bytes
            && self.silence_ms >= self.tuning.required_silence_ms;
        let flush_on_size = self.buffer.len() >= self.tuning.max_utterance_bytes;
        if flush_on_silence || flush_on_size {
            return self.flush_utterance().await;
        }

        FrameOutcome::Continue
    }

    /// Track sustained loud audio while the bot speaks and cut it off once
    /// the streak is long enough to rule out an echo spike.
    fn detect_barge_in(&mut self, samples: &[i16], frame_ms: u64) {
        let threshold = self.tuning.rms_silence_threshold * self.tuning.barge_in_factor;
        if rms(samples) < threshold {
            self.loud_ms = 0;
            return;
        }
        self.loud_ms += frame_ms;
        if self.loud_ms < self.tuning.barge_in_sustain_ms {
            return;
        }

        let unspoken = self.outgoing.clear_queue();
        if !unspoken.is_empty() {
            self.captured_text = Some(unspoken);
        }
        self.buffer.clear();
        self.silence_ms = 0;
        self.vad.reset();
        self.interrupt.interrupt();
        self.loud_ms = 0;
        info!(call_id = %self.call_id, "Caller barged in, outbound speech cleared");
    }

    /// Snapshot the buffered utterance, recognize it, and decide what the
    /// caller hears next. Exactly one of transcript, restored speech, or the
    /// did-not-hear fallback comes out of each flush.
    async fn flush_utterance(&mut self) -> FrameOutcome {
        let mut samples = std::mem::take(&mut self.buffer);
        self.silence_ms = 0;
        self.loud_ms = 0;
        self.reask_done = false;
        self.vad.reset();
        let captured = self.captured_text.take();

        debug!(
            call_id = %self.call_id,
            samples = samples.len(),
            "Flushing utterance to the recognizer"
        );
        self.outgoing
            .enqueue_text(phrases::random_acknowledgement())
            .await;

        if self.tuning.preprocess_audio {
            peak_normalize(&mut samples, NORMALIZE_TARGET);
            high_pass(&mut samples, TELEPHONY_SAMPLE_RATE, HIGH_PASS_CUTOFF_HZ);
        }

        let wav_path = self
            .spool_dir
            .join(format!("{}-{}.wav", self.call_id, Uuid::new_v4()));
        let transcript = self.transcribe(&wav_path, &samples).await;
        if let Err(e) = tokio::fs::remove_file(&wav_path).await {
            debug!(
                error = %e,
                path = %wav_path.display(),
                "Could not remove spooled utterance"
            );
        }

        if !transcript.is_empty() && !phrases::is_unusable_transcript(&transcript) {
            info!(
                call_id = %self.call_id,
                chars = transcript.chars().count(),
                "Utterance transcribed"
            );
            return FrameOutcome::Transcript(transcript);
        }

        if let Some(text) = captured {
            info!(
                call_id = %self.call_id,
                "Nothing heard after the barge-in, resuming the interrupted answer"
            );
            self.outgoing.enqueue_text(&text).await;
            return FrameOutcome::Continue;
        }

        debug!(call_id = %self.call_id, "No usable speech in the flushed utterance");
        self.outgoing.enqueue_text(phrases::DID_NOT_HEAR).await;
        FrameOutcome::Continue
    }

    /// Spool the utterance to a WAV file and run recognition on it. Any
    /// failure along the way degrades to an empty transcript.
    async fn transcribe(&self, wav_path: &Path, samples: &[i16]) -> String {
        let pcm = pcm16_to_le_bytes(samples);
        if let Err(e) = write_wav_file(wav_path, &pcm, TELEPHONY_SAMPLE_RATE, 1).await {
            warn!(call_id = %self.call_id, error = %e, "Failed to spool utterance audio");
            return String::new();
        }
        match self.stt.transcribe_audio(wav_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    call_id = %self.call_id,
                    error = %e,
                    "Transcription failed, treating the utterance as empty"
                );
                String::new()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SpeakSink;
    use crate::call::testing::{FakeWireTts, GatedTransport, RecordingTransport, ScriptedStt};
    use crate::call::StreamTransport;
    use crate::core::audio::encode_mulaw;
    use crate::core::cache::AudioCache;
    use crate::core::tts::BaseTTS;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Rig {
        incoming: IncomingAudioManager,
        outgoing: Arc<OutgoingManager>,
        tts: Arc<FakeWireTts>,
        stt: Arc<ScriptedStt>,
        interrupt: InterruptFlag,
        spool: PathBuf,
        _dir: tempfile::TempDir,
    }

    async fn rig_over(
        transport: Arc<dyn StreamTransport>,
        stt: ScriptedStt,
        tuning: CallTuning,
    ) -> Rig {
        let dir = tempdir().unwrap();
        let cache = Arc::new(
            AudioCache::open(&dir.path().join("cache"), "fake", "voice")
                .await
                .unwrap(),
        );
        let tts = Arc::new(FakeWireTts::default());
        let outgoing = Arc::new(OutgoingManager::start(
            "MZ-test",
            transport,
            tts.clone(),
            cache,
            &tuning,
        ));
        let stt = Arc::new(stt);
        let interrupt = InterruptFlag::new();
        let spool = dir.path().join("spool");
        let incoming = IncomingAudioManager::new(
            "CA-test",
            tuning,
            spool.clone(),
            stt.clone(),
            outgoing.clone(),
            interrupt.clone(),
        )
        .unwrap();

        Rig {
            incoming,
            outgoing,
            tts,
            stt,
            interrupt,
            spool,
            _dir: dir,
        }
    }

    /// 20 ms of dead line.
    fn silent_frame() -> String {
        BASE64.encode(encode_mulaw(&[0i16; 160]))
    }

    /// 20 ms of a 200 Hz square wave, loud enough that the RMS floor alone
    /// classifies it as speech.
    fn loud_frame() -> String {
        let samples: Vec<i16> = (0..160)
            .map(|i| if (i / 20) % 2 == 0 { 12_000 } else { -12_000 })
            .collect();
        BASE64.encode(encode_mulaw(&samples))
    }

    async fn feed(incoming: &mut IncomingAudioManager, frame: &str, count: usize) {
        for i in 0..count {
            let outcome = incoming.process_media(frame).await;
            assert_eq!(outcome, FrameOutcome::Continue, "frame {i} should continue");
        }
    }

    #[tokio::test]
    async fn test_speech_then_silence_flushes_a_transcript() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::answering(&["Quels sont vos horaires ?"]),
            CallTuning::default(),
        )
        .await;

        // 50 loud frames reach the minimum utterance size.
        feed(&mut rig.incoming, &loud_frame(), 50).await;
        // 34 silent frames stay under the 700 ms flush threshold.
        feed(&mut rig.incoming, &silent_frame(), 34).await;

        let outcome = rig.incoming.process_media(&silent_frame()).await;
        assert_eq!(
            outcome,
            FrameOutcome::Transcript("Quels sont vos horaires ?".to_string())
        );
        assert_eq!(rig.stt.call_count(), 1);

        // The flush spoke an acknowledgement and nothing else.
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        assert_eq!(transport.media_payloads().len(), 1);

        // The spooled WAV was removed after recognition.
        let leftovers: Vec<_> = std::fs::read_dir(&rig.spool).unwrap().collect();
        assert!(leftovers.is_empty());
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_silence_alone_never_reaches_the_recognizer() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::default(),
            CallTuning::default(),
        )
        .await;

        feed(&mut rig.incoming, &silent_frame(), 40).await;

        assert_eq!(rig.stt.call_count(), 0);
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        assert!(transport.media_payloads().is_empty());
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_reask_then_hangup_ladder() {
        let tuning = CallTuning {
            reask_silence_secs: 1,
            hangup_silence_secs: 3,
            ..Default::default()
        };
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(transport.clone(), ScriptedStt::default(), tuning).await;

        // 149 frames are 2980 ms of silence; the still-there prompt fires
        // once at the one-second mark along the way.
        feed(&mut rig.incoming, &silent_frame(), 149).await;

        let outcome = rig.incoming.process_media(&silent_frame()).await;
        assert_eq!(outcome, FrameOutcome::Hangup);

        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        let payloads = transport.media_payloads();
        assert_eq!(payloads.len(), 1, "exactly one re-ask prompt");
        let expected = rig
            .tts
            .synthesize_speech_to_bytes(phrases::REASK)
            .await
            .unwrap();
        assert_eq!(BASE64.decode(&payloads[0]).unwrap(), expected);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_reask_suppressed_when_disabled() {
        let tuning = CallTuning {
            reask_silence_secs: 1,
            hangup_silence_secs: 3,
            speak_anew_on_silence: false,
            ..Default::default()
        };
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(transport.clone(), ScriptedStt::default(), tuning).await;

        feed(&mut rig.incoming, &silent_frame(), 149).await;
        let outcome = rig.incoming.process_media(&silent_frame()).await;
        assert_eq!(outcome, FrameOutcome::Hangup);

        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        assert!(transport.media_payloads().is_empty());
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_barge_in_interrupts_and_restores_unspoken_speech() {
        let transport = Arc::new(GatedTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::answering(&[""]),
            CallTuning::default(),
        )
        .await;

        rig.outgoing.enqueue_text("Premier segment de la réponse.").await;
        rig.outgoing
            .enqueue_text("Second segment qui sera restauré.")
            .await;
        tokio::task::yield_now().await;
        assert!(rig.outgoing.is_sending());

        // 80 ms of loud audio stays under the sustain threshold.
        feed(&mut rig.incoming, &loud_frame(), 4).await;
        assert!(!rig.interrupt.is_interrupted());
        assert!(rig.outgoing.has_text_to_be_sent());

        // The fifth frame crosses 90 ms and trips the barge-in.
        let outcome = rig.incoming.process_media(&loud_frame()).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(rig.interrupt.is_interrupted());
        assert!(!rig.outgoing.has_text_to_be_sent());

        // Unblock the in-flight chunk so the interrupting utterance can
        // accumulate without re-triggering against a busy line.
        transport.release();
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);

        feed(&mut rig.incoming, &loud_frame(), 45).await;
        feed(&mut rig.incoming, &silent_frame(), 34).await;
        let outcome = rig.incoming.process_media(&silent_frame()).await;
        assert_eq!(outcome, FrameOutcome::Continue, "empty transcript stays internal");
        assert_eq!(rig.stt.call_count(), 1);

        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        let payloads = transport.inner.media_payloads();
        // First chunk of the cut answer, the acknowledgement, then the
        // restored second phrase.
        assert_eq!(payloads.len(), 3);
        let restored = rig
            .tts
            .synthesize_speech_to_bytes("Second segment qui sera restauré.")
            .await
            .unwrap();
        assert_eq!(BASE64.decode(&payloads[2]).unwrap(), restored);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_barge_in_respects_the_interruptible_flag() {
        let transport = Arc::new(GatedTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::default(),
            CallTuning::default(),
        )
        .await;

        rig.outgoing.set_interruptible(false);
        rig.outgoing.enqueue_text("Annonce à ne pas couper.").await;
        rig.outgoing.enqueue_text("Suite de l'annonce.").await;
        tokio::task::yield_now().await;
        assert!(rig.outgoing.is_sending());

        feed(&mut rig.incoming, &loud_frame(), 10).await;

        assert!(!rig.interrupt.is_interrupted());
        assert!(rig.outgoing.has_text_to_be_sent(), "queue left intact");

        transport.release();
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_transcript_without_capture_says_did_not_hear() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::answering(&[""]),
            CallTuning::default(),
        )
        .await;

        feed(&mut rig.incoming, &loud_frame(), 50).await;
        feed(&mut rig.incoming, &silent_frame(), 34).await;
        let outcome = rig.incoming.process_media(&silent_frame()).await;
        assert_eq!(outcome, FrameOutcome::Continue);

        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        let payloads = transport.media_payloads();
        assert_eq!(payloads.len(), 2, "acknowledgement then fallback");
        let expected = rig
            .tts
            .synthesize_speech_to_bytes(phrases::DID_NOT_HEAR)
            .await
            .unwrap();
        assert_eq!(BASE64.decode(&payloads[1]).unwrap(), expected);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_watermark_transcript_is_discarded() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::answering(&["Sous-titres réalisés par la communauté d'Amara.org"]),
            CallTuning::default(),
        )
        .await;

        feed(&mut rig.incoming, &loud_frame(), 50).await;
        feed(&mut rig.incoming, &silent_frame(), 34).await;
        let outcome = rig.incoming.process_media(&silent_frame()).await;

        assert_eq!(outcome, FrameOutcome::Continue);
        assert_eq!(rig.stt.call_count(), 1);

        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        assert_eq!(transport.media_payloads().len(), 2);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_recognizer_outage_is_not_fatal() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::failing(),
            CallTuning::default(),
        )
        .await;

        feed(&mut rig.incoming, &loud_frame(), 50).await;
        feed(&mut rig.incoming, &silent_frame(), 34).await;
        let outcome = rig.incoming.process_media(&silent_frame()).await;

        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        // The caller still hears the acknowledgement and the fallback.
        assert_eq!(transport.media_payloads().len(), 2);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_payloads_are_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::default(),
            CallTuning::default(),
        )
        .await;

        let outcome = rig.incoming.process_media("%%%pas-du-base64%%%").await;
        assert_eq!(outcome, FrameOutcome::Continue);

        let oversized = "A".repeat(MAX_PAYLOAD_B64 + 1);
        let outcome = rig.incoming.process_media(&oversized).await;
        assert_eq!(outcome, FrameOutcome::Continue);

        let outcome = rig.incoming.process_media("").await;
        assert_eq!(outcome, FrameOutcome::Continue);

        assert_eq!(rig.stt.call_count(), 0);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_overlong_utterance_forces_a_flush() {
        let tuning = CallTuning {
            max_utterance_bytes: 3_200,
            ..Default::default()
        };
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(
            transport.clone(),
            ScriptedStt::answering(&["Je souhaite prendre rendez-vous."]),
            tuning,
        )
        .await;

        // 19 frames stay under the cap, the 20th reaches it mid-speech.
        feed(&mut rig.incoming, &loud_frame(), 19).await;
        let outcome = rig.incoming.process_media(&loud_frame()).await;
        assert_eq!(
            outcome,
            FrameOutcome::Transcript("Je souhaite prendre rendez-vous.".to_string())
        );
        assert_eq!(rig.stt.call_count(), 1);
        rig.outgoing.shutdown().await;
    }

    #[tokio::test]
    async fn test_reask_rearms_after_caller_activity() {
        let tuning = CallTuning {
            reask_silence_secs: 1,
            hangup_silence_secs: 10,
            ..Default::default()
        };
        let transport = Arc::new(RecordingTransport::default());
        let mut rig = rig_over(transport.clone(), ScriptedStt::default(), tuning).await;

        // First quiet stretch prompts the caller.
        feed(&mut rig.incoming, &silent_frame(), 50).await;

        // A short blip of speech, then silence again: the blip flushes once
        // the padded utterance reaches the minimum size, and the prompt
        // re-arms for the following quiet stretch.
        feed(&mut rig.incoming, &loud_frame(), 5).await;
        feed(&mut rig.incoming, &silent_frame(), 45).await;
        feed(&mut rig.incoming, &silent_frame(), 50).await;

        assert_eq!(rig.stt.call_count(), 1);
        assert!(rig.outgoing.await_drained(Duration::from_secs(5)).await);
        // Prompt, acknowledgement, did-not-hear, prompt again.
        assert_eq!(transport.media_payloads().len(), 4);
        rig.outgoing.shutdown().await;
    }
}
