//! Audio playback
//!
//! One output context per process: the first `play` spawns a thread that opens the default
//! output device and keeps its stream alive until exit. Playback mixes at most one track,
//! shaped by a fade-in/fade-out envelope.

use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::{Notify, oneshot};

use crate::{Error, Result};

/// Length of the fade-in and fade-out ramps
pub const FADE: Duration = Duration::from_millis(180);

/// Gain at the silent ends of the envelope
pub const SILENT_GAIN: f32 = 0.0001;

/// Ramp applied when playback is stopped early
pub const STOP_RAMP: Duration = Duration::from_millis(30);

/// Slack past a buffer's duration before playback is considered stalled
const PLAYBACK_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on waiting for the device to release a stopped track
const STOP_GRACE: Duration = Duration::from_millis(250);

/// Resampler chunk size
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playing time
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Sine tone, used by the speaker check
    #[must_use]
    pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
        #[allow(clippy::cast_precision_loss)]
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.3 * (std::f32::consts::TAU * frequency * t).sin()
            })
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Convert to `target` Hz
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the resampler rejects the rates
    pub fn resampled(self, target: u32) -> Result<Self> {
        if self.sample_rate == target || self.samples.is_empty() {
            return Ok(self);
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            target as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler setup failed: {e}")))?;

        let expected = self.samples.len() * target as usize / self.sample_rate as usize;
        let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);

        let mut chunks = self.samples.chunks_exact(RESAMPLE_CHUNK);
        for chunk in chunks.by_ref() {
            let frames = resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            out.extend_from_slice(&frames[0]);
        }
        let rest = chunks.remainder();
        if !rest.is_empty() {
            let frames = resampler
                .process_partial(Some(&[rest]), None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            out.extend_from_slice(&frames[0]);
        }
        while out.len() < expected {
            let frames = resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if frames[0].is_empty() {
                break;
            }
            out.extend_from_slice(&frames[0]);
        }
        out.truncate(expected);

        Ok(Self::new(out, target))
    }
}

/// Linear fade-in/fade-out gain curve over a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    total: usize,
    fade: usize,
}

impl Envelope {
    /// Envelope for `total` frames; fades are shortened to half the buffer for short clips
    #[must_use]
    pub fn new(total: usize, sample_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let fade = (FADE.as_millis() as usize) * sample_rate as usize / 1000;
        Self {
            total,
            fade: fade.min(total / 2),
        }
    }

    /// Gain for frame `frame`
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn gain_at(&self, frame: usize) -> f32 {
        if frame >= self.total {
            return SILENT_GAIN;
        }
        if self.fade == 0 {
            return 1.0;
        }

        let from_end = self.total - 1 - frame;
        let edge = frame.min(from_end);
        if edge >= self.fade {
            return 1.0;
        }
        let progress = edge as f32 / self.fade as f32;
        SILENT_GAIN + (1.0 - SILENT_GAIN) * progress
    }
}

/// Audio output capability
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play `buffer`; resolves when it finished or was stopped
    ///
    /// # Errors
    ///
    /// `Error::Audio` when no output device can be used
    async fn play(&self, buffer: AudioBuffer) -> Result<()>;

    /// Ramp down and halt the current track; idempotent
    async fn stop(&self);
}

struct Track {
    samples: Vec<f32>,
    position: usize,
    envelope: Envelope,
    ramp: Option<(usize, usize)>,
    done: Option<oneshot::Sender<()>>,
}

impl Track {
    /// Next sample, or `None` once the track is finished
    fn next_sample(&mut self) -> Option<f32> {
        if self.position >= self.samples.len() {
            return None;
        }
        let mut gain = self.envelope.gain_at(self.position);
        if let Some((left, len)) = self.ramp.as_mut() {
            if *left == 0 {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let factor = *left as f32 / *len as f32;
            gain *= factor.max(SILENT_GAIN);
            *left -= 1;
        }
        let sample = self.samples[self.position] * gain;
        self.position += 1;
        Some(sample)
    }
}

struct OutputContext {
    track: Arc<Mutex<Option<Track>>>,
    released: Arc<Notify>,
    sample_rate: u32,
}

static OUTPUT: OnceLock<std::result::Result<OutputContext, String>> = OnceLock::new();

fn output_context() -> Result<&'static OutputContext> {
    OUTPUT
        .get_or_init(open_output)
        .as_ref()
        .map_err(|e| Error::Audio(e.clone()))
}

fn open_output() -> std::result::Result<OutputContext, String> {
    let track: Arc<Mutex<Option<Track>>> = Arc::new(Mutex::new(None));
    let released = Arc::new(Notify::new());
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let thread_track = Arc::clone(&track);
    let thread_released = Arc::clone(&released);
    std::thread::Builder::new()
        .name("zoul-audio-out".to_string())
        .spawn(move || {
            let _stream = match build_stream(thread_track, thread_released) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Keep the stream alive for the rest of the process
            loop {
                std::thread::park();
            }
        })
        .map_err(|e| e.to_string())?;

    let sample_rate = ready_rx
        .recv()
        .map_err(|_| "audio output thread exited".to_string())??;

    tracing::debug!(sample_rate, "audio output context ready");
    Ok(OutputContext {
        track,
        released,
        sample_rate,
    })
}

fn build_stream(
    track: Arc<Mutex<Option<Track>>>,
    released: Arc<Notify>,
) -> std::result::Result<(cpal::Stream, u32), String> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;
    let config = device
        .default_output_config()
        .map_err(|e| e.to_string())?
        .config();
    let channels = usize::from(config.channels.max(1));
    let sample_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut slot) = track.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = match slot.as_mut().map(Track::next_sample) {
                        Some(Some(sample)) => sample,
                        Some(None) => {
                            if let Some(done) = slot.take().and_then(|t| t.done) {
                                let _ = done.send(());
                            }
                            released.notify_waiters();
                            0.0
                        }
                        None => 0.0,
                    };
                    frame.fill(sample);
                }
            },
            |err| tracing::error!(error = %err, "audio playback error"),
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, sample_rate))
}

/// Wait for the output callback to finish a track.
///
/// A dropped sender means the track was replaced or stopped; silence past `limit` means the
/// device stopped pulling samples.
async fn wait_for_track(done: oneshot::Receiver<()>, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, done).await {
        Ok(_) => Ok(()),
        Err(_) => Err(Error::Audio("playback stalled".to_string())),
    }
}

/// Plays buffers through the process-wide output context
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioPlaybackEngine;

impl AudioPlaybackEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioOutput for AudioPlaybackEngine {
    async fn play(&self, buffer: AudioBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let ctx = tokio::task::spawn_blocking(output_context)
            .await
            .map_err(|e| Error::Audio(e.to_string()))??;

        let buffer = buffer.resampled(ctx.sample_rate)?;
        let frames = buffer.samples.len();
        let limit = buffer.duration() + PLAYBACK_GRACE;
        let (done_tx, done_rx) = oneshot::channel();
        let track = Track {
            envelope: Envelope::new(frames, ctx.sample_rate),
            samples: buffer.samples,
            position: 0,
            ramp: None,
            done: Some(done_tx),
        };

        {
            let mut slot = ctx
                .track
                .lock()
                .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;
            // Replacing a track drops its sender, which resolves its `play`
            *slot = Some(track);
        }

        if let Err(e) = wait_for_track(done_rx, limit).await {
            tracing::warn!(samples = frames, ?limit, "output device stalled, dropping track");
            if let Ok(mut slot) = ctx.track.lock() {
                *slot = None;
            }
            return Err(e);
        }
        tracing::debug!(samples = frames, "playback complete");
        Ok(())
    }

    async fn stop(&self) {
        let Some(Ok(ctx)) = OUTPUT.get() else {
            return;
        };

        let released = ctx.released.notified();
        tokio::pin!(released);
        released.as_mut().enable();

        {
            let Ok(mut slot) = ctx.track.lock() else {
                return;
            };
            let Some(track) = slot.as_mut() else {
                return;
            };
            if track.ramp.is_none() {
                #[allow(clippy::cast_possible_truncation)]
                let len = ((STOP_RAMP.as_millis() as usize) * ctx.sample_rate as usize / 1000).max(1);
                track.ramp = Some((len, len));
            }
        }

        if tokio::time::timeout(STOP_RAMP + STOP_GRACE, released).await.is_err() {
            // Device stalled; drop the track directly
            if let Ok(mut slot) = ctx.track.lock() {
                slot.take();
            }
        }
        tracing::debug!("playback stopped");
    }
}

/// Decode MP3 bytes to mono samples
///
/// # Errors
///
/// Returns `Error::Decode` for malformed or empty input
pub fn decode_mp3(mp3_data: &[u8]) -> Result<AudioBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Decode("no audio frames in response".to_string()));
    }

    Ok(AudioBuffer::new(samples, sample_rate))
}
