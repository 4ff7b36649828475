use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, warn};
use std::f64::consts::PI;
use std::sync::mpsc;
use std::time::Duration;

use crate::error::AudioError;
use crate::policy::SoundSettings;

/// Attack ramp before the decay starts
const ATTACK: Duration = Duration::from_millis(10);

/// Gain at the end of a note, relative to its peak (0.2 -> 0.01)
const DECAY_FLOOR: f64 = 0.05;

/// A command sent to the audio thread
enum SoundCommand {
    /// Start one voice per frequency, all sounding for `duration`
    Play { freqs: Vec<f64>, duration: Duration },
    /// Cut every sounding voice
    Silence,
}

/// One decaying sine tone.
#[derive(Debug, Clone)]
struct Voice {
    step: f64,
    phase: f64,
    age: usize,
    attack: usize,
    length: usize,
    peak: f64,
}

impl Voice {
    fn new(freq: f64, duration: Duration, sample_rate: f64, peak: f64) -> Self {
        let length = (duration.as_secs_f64() * sample_rate).max(1.0) as usize;
        Self {
            step: 2.0 * PI * freq / sample_rate,
            phase: 0.0,
            age: 0,
            attack: ((ATTACK.as_secs_f64() * sample_rate) as usize).min(length / 2),
            length,
            peak,
        }
    }

    fn is_done(&self) -> bool {
        self.age >= self.length
    }

    fn next_sample(&mut self) -> f64 {
        if self.is_done() {
            return 0.0;
        }
        let value = self.phase.sin() * envelope(self.age, self.attack, self.length, self.peak);
        self.phase = (self.phase + self.step) % (2.0 * PI);
        self.age += 1;
        value
    }
}

/// Gain at sample `age`: linear attack, then exponential decay from `peak`
/// to `peak * DECAY_FLOOR` over the rest of the note.
fn envelope(age: usize, attack: usize, length: usize, peak: f64) -> f64 {
    if age >= length {
        0.0
    } else if age < attack {
        peak * age as f64 / attack as f64
    } else {
        let t = (age - attack) as f64 / (length - attack) as f64;
        peak * DECAY_FLOOR.powf(t)
    }
}

/// Sum the voices into one sample, dropping finished ones.
fn mix(voices: &mut Vec<Voice>) -> f32 {
    if voices.is_empty() {
        return 0.0;
    }
    let count = voices.len() as f64;
    let value: f64 = voices.iter_mut().map(Voice::next_sample).sum();
    voices.retain(|v| !v.is_done());
    (value / count.max(1.0)) as f32
}

/// Live audio output. Dropping it stops the stream.
pub struct AudioEngine {
    tx: mpsc::Sender<SoundCommand>,
    note: Duration,
    _stream: cpal::Stream,
}

impl AudioEngine {
    /// Open the default output device.
    pub fn new(settings: &SoundSettings) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Config(e.to_string()))?;

        let sample_rate = config.sample_rate() as f64;
        let channels = config.channels() as usize;
        let peak = settings.volume as f64;

        let (tx, rx) = mpsc::channel::<SoundCommand>();
        let mut voices: Vec<Voice> = Vec::new();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    while let Ok(cmd) = rx.try_recv() {
                        match cmd {
                            SoundCommand::Play { freqs, duration } => {
                                voices.extend(
                                    freqs
                                        .into_iter()
                                        .map(|f| Voice::new(f, duration, sample_rate, peak)),
                                );
                            }
                            SoundCommand::Silence => voices.clear(),
                        }
                    }

                    for frame in data.chunks_mut(channels) {
                        let value = mix(&mut voices);
                        for sample in frame.iter_mut() {
                            *sample = value;
                        }
                    }
                },
                move |err| {
                    warn!(target: "audio", "stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        debug!(target: "audio", "output at {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            tx,
            note: settings.note,
            _stream: stream,
        })
    }

    /// Sound every frequency at once for `duration`.
    pub fn play(&self, freqs: Vec<f64>, duration: Duration) {
        if freqs.is_empty() {
            return;
        }
        if self.tx.send(SoundCommand::Play { freqs, duration }).is_err() {
            warn!(target: "audio", "audio thread disconnected");
        }
    }

    /// Sound a key press for the configured note length.
    pub fn strike(&self, freq: f64) {
        self.play(vec![freq], self.note);
    }

    pub fn silence(&self) {
        let _ = self.tx.send(SoundCommand::Silence);
    }
}
