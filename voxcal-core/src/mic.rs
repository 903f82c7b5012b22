//! Microphone capture.
//!
//! Conversion and WAV encoding are always available. [`MicRecognition`]
//! records from an input device with cpal and requires the `voice` feature.

use crate::backend::AudioClip;
use crate::error::RecognitionError;

/// Sample rate of clips sent for transcription.
pub const UPLOAD_SAMPLE_RATE: u32 = 16_000;

/// Recordings whose peak stays below this are treated as silence.
pub const SILENCE_PEAK: f32 = 0.01;

/// Average interleaved frames down to one channel.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio using linear interpolation.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).ceil() as usize;
    (0..out_len)
        .filter_map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(a), Some(b)) => Some(a * (1.0 - frac) + b * frac),
                (Some(a), None) => Some(*a),
                _ => None,
            }
        })
        .collect()
}

/// Encode mono samples as a 16-bit PCM WAV clip.
pub fn wav_clip(samples: &[f32], sample_rate: u32) -> Result<AudioClip, RecognitionError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode_error = |e: hound::Error| RecognitionError::Failed {
        message: format!("WAV encoding failed: {e}"),
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
        for sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(pcm).map_err(encode_error)?;
        }
        writer.finalize().map_err(encode_error)?;
    }
    Ok(AudioClip::new(cursor.into_inner(), "capture.wav", "audio/wav"))
}

/// Turn an interleaved recording into an upload-ready clip.
///
/// Fails with [`RecognitionError::NoSpeech`] when nothing above the silence
/// floor was recorded.
pub fn clip_from_capture(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioClip, RecognitionError> {
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak < SILENCE_PEAK {
        return Err(RecognitionError::NoSpeech);
    }
    let mono = downmix(samples, channels);
    wav_clip(&resample(&mono, sample_rate, UPLOAD_SAMPLE_RATE), UPLOAD_SAMPLE_RATE)
}

#[cfg(feature = "voice")]
pub use capture::MicRecognition;

#[cfg(feature = "voice")]
mod capture {
    use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::clip_from_capture;
    use crate::backend::{AudioClip, AudioTranscriber, AuthTokenProvider};
    use crate::config::RecognitionConfig;
    use crate::error::RecognitionError;
    use crate::recognition::{
        RecognitionControl, RecognitionEvent, RecognitionSession, RecognitionSessionFactory,
        transcribe_clip,
    };

    /// Recognition from a live microphone.
    ///
    /// Each session records until `recognition.max_capture_secs` elapses,
    /// then uploads the recording as WAV and emits the transcript. Stopping
    /// the session ends the capture and discards it.
    pub struct MicRecognition {
        transcriber: Arc<dyn AudioTranscriber>,
        auth: Arc<dyn AuthTokenProvider>,
        device_name: Option<String>,
    }

    impl MicRecognition {
        pub fn new(transcriber: Arc<dyn AudioTranscriber>, auth: Arc<dyn AuthTokenProvider>) -> Self {
            Self {
                transcriber,
                auth,
                device_name: None,
            }
        }

        /// Record from the named input device instead of the default one.
        pub fn with_device(mut self, name: impl Into<String>) -> Self {
            self.device_name = Some(name.into());
            self
        }
    }

    struct MicControl {
        stop: std_mpsc::Sender<()>,
        cancel: CancellationToken,
    }

    impl RecognitionControl for MicControl {
        fn stop(&self) {
            let _ = self.stop.send(());
            self.cancel.cancel();
        }
    }

    impl RecognitionSessionFactory for MicRecognition {
        fn name(&self) -> &str {
            "microphone"
        }

        fn is_supported(&self) -> bool {
            cpal::default_host().default_input_device().is_some()
        }

        fn start(&self, config: &RecognitionConfig) -> Result<RecognitionSession, RecognitionError> {
            let runtime = tokio::runtime::Handle::try_current().map_err(unavailable)?;
            let (tx, rx) = mpsc::unbounded_channel();
            let (stop_tx, stop_rx) = std_mpsc::channel();
            let (ready_tx, ready_rx) = std_mpsc::channel();
            let cancel = CancellationToken::new();

            let max = Duration::from_secs(config.max_capture_secs);
            let device_name = self.device_name.clone();
            let transcriber = self.transcriber.clone();
            let auth = self.auth.clone();
            let task_cancel = cancel.clone();

            // cpal streams are not Send, so the stream lives and dies on this thread.
            std::thread::Builder::new()
                .name("voxcal-mic".into())
                .spawn(move || {
                    match record(device_name.as_deref(), max, &stop_rx, ready_tx) {
                        Some(Ok(clip)) => {
                            runtime.spawn(transcribe_clip(transcriber, auth, clip, tx, task_cancel));
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Microphone capture produced nothing usable");
                            let _ = tx.send(RecognitionEvent::Error(e));
                        }
                        None => debug!("Microphone capture ended without a clip"),
                    }
                })
                .map_err(unavailable)?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(RecognitionError::Unavailable {
                        message: "capture thread exited".into(),
                    });
                }
            }
            info!(max_secs = config.max_capture_secs, "Microphone recording");
            Ok(RecognitionSession::new(
                rx,
                Box::new(MicControl {
                    stop: stop_tx,
                    cancel,
                }),
            ))
        }
    }

    struct OpenStream {
        stream: cpal::Stream,
        buffer: Arc<Mutex<Vec<f32>>>,
        sample_rate: u32,
        channels: u16,
    }

    /// Record until `max` elapses. Returns `None` when the session was stopped
    /// or the device could not be opened (reported through `ready`).
    fn record(
        device_name: Option<&str>,
        max: Duration,
        stop: &std_mpsc::Receiver<()>,
        ready: std_mpsc::Sender<Result<(), RecognitionError>>,
    ) -> Option<Result<AudioClip, RecognitionError>> {
        let open = match open_stream(device_name) {
            Ok(open) => open,
            Err(e) => {
                let _ = ready.send(Err(e));
                return None;
            }
        };
        let _ = ready.send(Ok(()));

        match stop.recv_timeout(max) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
        }
        drop(open.stream);

        let samples = std::mem::take(&mut *open.buffer.lock().unwrap_or_else(|p| p.into_inner()));
        debug!(
            samples = samples.len(),
            sample_rate = open.sample_rate,
            channels = open.channels,
            "Microphone capture finished"
        );
        Some(clip_from_capture(&samples, open.sample_rate, open.channels))
    }

    fn open_stream(device_name: Option<&str>) -> Result<OpenStream, RecognitionError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(unavailable)?
                .find(|d| d.name().is_ok_and(|n| n == name)),
            None => host.default_input_device(),
        }
        .ok_or_else(|| RecognitionError::Unavailable {
            message: match device_name {
                Some(name) => format!("no input device named {name}"),
                None => "no input device".into(),
            },
        })?;

        let supported = device.default_input_config().map_err(unavailable)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let config = supported.config();
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let sink = buffer.clone();
        let stream = match format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| append(&sink, data.iter().copied()),
                on_stream_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    append(&sink, data.iter().map(|&s| f32::from(s) / f32::from(i16::MAX)))
                },
                on_stream_error,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    append(&sink, data.iter().map(|&s| (f32::from(s) - 32768.0) / 32768.0))
                },
                on_stream_error,
                None,
            ),
            other => {
                return Err(RecognitionError::Unavailable {
                    message: format!("unsupported sample format {other:?}"),
                });
            }
        }
        .map_err(build_error)?;
        stream.play().map_err(unavailable)?;

        Ok(OpenStream {
            stream,
            buffer,
            sample_rate,
            channels,
        })
    }

    fn append(buffer: &Mutex<Vec<f32>>, samples: impl Iterator<Item = f32>) {
        if let Ok(mut buf) = buffer.lock() {
            buf.extend(samples);
        }
    }

    fn on_stream_error(e: cpal::StreamError) {
        warn!(error = %e, "Microphone stream error");
    }

    fn unavailable(e: impl std::fmt::Display) -> RecognitionError {
        RecognitionError::Unavailable {
            message: e.to_string(),
        }
    }

    fn build_error(e: cpal::BuildStreamError) -> RecognitionError {
        let message = e.to_string();
        if message.to_ascii_lowercase().contains("permission") {
            RecognitionError::PermissionDenied
        } else {
            RecognitionError::Unavailable { message }
        }
    }
}
