//! Energy-based utterance segmentation
//!
//! Splits a live sample stream into speech segments: a segment starts when the RMS
//! energy of a chunk crosses the threshold and completes after enough trailing silence.

use std::time::Duration;

/// Minimum speech length for a segment to count
const MIN_SPEECH: Duration = Duration::from_millis(300);

/// Trailing silence that closes a segment
const END_SILENCE: Duration = Duration::from_millis(700);

/// Threshold at sensitivity 0
const THRESHOLD_MAX: f32 = 0.06;

/// Threshold range covered by the sensitivity scale
const THRESHOLD_SPAN: f32 = 0.05;

/// Energy threshold for a sensitivity of 0 (least) to 100 (most)
#[must_use]
pub fn threshold_for(sensitivity: u8) -> f32 {
    THRESHOLD_MAX - f32::from(sensitivity.min(100)) / 100.0 * THRESHOLD_SPAN
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// What a chunk did to the segmenter
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Nothing changed
    Pending,
    /// Speech began
    SpeechStarted,
    /// A segment finished; carries its samples
    Complete(Vec<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Quiet,
    Speaking,
}

/// Turns chunks of samples into speech segments
#[derive(Debug)]
pub struct Segmenter {
    threshold: f32,
    min_speech: usize,
    end_silence: usize,
    phase: Phase,
    segment: Vec<f32>,
    voiced: usize,
    silence: usize,
    heard_speech: bool,
}

impl Segmenter {
    #[must_use]
    pub fn new(sample_rate: u32, sensitivity: u8) -> Self {
        Self {
            threshold: threshold_for(sensitivity),
            min_speech: samples_in(MIN_SPEECH, sample_rate),
            end_silence: samples_in(END_SILENCE, sample_rate),
            phase: Phase::Quiet,
            segment: Vec::new(),
            voiced: 0,
            silence: 0,
            heard_speech: false,
        }
    }

    /// Feed one chunk
    pub fn push(&mut self, samples: &[f32]) -> SegmentEvent {
        let energy = rms(samples);
        let is_speech = energy > self.threshold;

        match self.phase {
            Phase::Quiet => {
                if is_speech {
                    self.phase = Phase::Speaking;
                    self.segment.clear();
                    self.segment.extend_from_slice(samples);
                    self.voiced = samples.len();
                    self.silence = 0;
                    self.heard_speech = true;
                    tracing::trace!(energy, "speech started");
                    return SegmentEvent::SpeechStarted;
                }
            }
            Phase::Speaking => {
                self.segment.extend_from_slice(samples);
                if is_speech {
                    self.voiced += samples.len();
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence > self.end_silence {
                    if self.voiced >= self.min_speech {
                        tracing::debug!(samples = self.segment.len(), "speech segment complete");
                        let segment = std::mem::take(&mut self.segment);
                        self.reset();
                        return SegmentEvent::Complete(segment);
                    }
                    tracing::trace!(voiced = self.voiced, "discarding short noise burst");
                    self.reset();
                    self.heard_speech = false;
                }
            }
        }

        SegmentEvent::Pending
    }

    /// Whether speech has been heard since creation; a discarded noise burst does not count
    #[must_use]
    pub const fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Whether a segment is open
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.phase == Phase::Speaking
    }

    fn reset(&mut self) {
        self.phase = Phase::Quiet;
        self.segment.clear();
        self.voiced = 0;
        self.silence = 0;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn samples_in(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_millis() * u128::from(sample_rate) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const CHUNK: usize = 1_600; // 100 ms

    fn loud() -> Vec<f32> {
        vec![0.3; CHUNK]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; CHUNK]
    }

    #[test]
    fn test_energy() {
        assert!(rms(&[0.0; 100]) < 0.001);
        assert!(rms(&[0.5; 100]) > 0.4);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_threshold_scales_with_sensitivity() {
        assert!(threshold_for(100) < threshold_for(50));
        assert!(threshold_for(50) < threshold_for(0));
        assert!((threshold_for(250) - threshold_for(100)).abs() < f32::EPSILON);
        assert!(threshold_for(100) > 0.0);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut seg = Segmenter::new(RATE, 50);
        assert_eq!(seg.push(&loud()), SegmentEvent::SpeechStarted);
        for _ in 0..4 {
            assert_eq!(seg.push(&loud()), SegmentEvent::Pending);
        }

        let mut completed = None;
        for _ in 0..10 {
            if let SegmentEvent::Complete(samples) = seg.push(&quiet()) {
                completed = Some(samples);
                break;
            }
        }
        let samples = completed.expect("segment should complete");
        assert!(samples.len() >= CHUNK * 5);
        assert!(!seg.is_speaking());
        assert!(seg.heard_speech());
    }

    #[test]
    fn test_short_burst_is_discarded() {
        let mut seg = Segmenter::new(RATE, 50);
        seg.push(&loud());
        for _ in 0..10 {
            assert!(!matches!(seg.push(&quiet()), SegmentEvent::Complete(_)));
        }
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_discarded_burst_is_not_heard_speech() {
        let mut seg = Segmenter::new(RATE, 50);
        assert_eq!(seg.push(&loud()), SegmentEvent::SpeechStarted);
        assert!(seg.heard_speech());
        for _ in 0..8 {
            assert_eq!(seg.push(&quiet()), SegmentEvent::Pending);
        }
        assert!(!seg.is_speaking());
        assert!(!seg.heard_speech());
    }

    #[test]
    fn test_silence_never_starts() {
        let mut seg = Segmenter::new(RATE, 100);
        for _ in 0..20 {
            assert_eq!(seg.push(&quiet()), SegmentEvent::Pending);
        }
        assert!(!seg.heard_speech());
    }
}
