use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use cpal::{FromSample, SampleFormat, SizedSample};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Microphone capture feeding the shared local track.
///
/// cpal streams are not `Send`, so the stream lives on its own thread; this
/// handle only carries the mute flag and a stop channel. Dropping the handle
/// ends the thread.
pub struct AudioCapture {
    enabled: Arc<AtomicBool>,
    _stop: std_mpsc::Sender<()>,
}

impl AudioCapture {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Result<Self> {
        let enabled = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (sample_tx, mut sample_rx) = mpsc::channel::<Sample>(64);

        // Writer: drains captured frames onto the track.
        tokio::spawn(async move {
            while let Some(sample) = sample_rx.recv().await {
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("failed to write capture sample: {e}");
                }
            }
        });

        let gate = enabled.clone();
        std::thread::spawn(move || {
            let stream = match build_capture_stream(sample_tx, gate) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Park until the handle is dropped; the stream dies with us.
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited during setup"))??;

        Ok(Self {
            enabled,
            _stop: stop_tx,
        })
    }

    /// Gates outgoing audio; the stream keeps running so unmute is instant.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

fn build_capture_stream(
    tx: mpsc::Sender<Sample>,
    enabled: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no input device available"))?;
    let config = device.default_input_config()?;
    debug!("input config: {:?}", config);

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config.into(), tx, enabled)?,
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config.into(), tx, enabled)?,
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config.into(), tx, enabled)?,
        format => return Err(anyhow!("unsupported sample format: {format:?}")),
    };
    stream.play()?;
    Ok(stream)
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::Sender<Sample>,
    enabled: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let rate = config.sample_rate.0.max(1);
    let err_fn = |err| warn!("input stream error: {err}");

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !enabled.load(Ordering::Relaxed) {
                return;
            }
            let mut pcm = Vec::with_capacity(data.len() * 2);
            for sample in data {
                let value = f32::from_sample(*sample).clamp(-1.0, 1.0);
                pcm.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes());
            }
            let duration =
                Duration::from_secs_f64(data.len() as f64 / channels as f64 / rate as f64);
            // Frames beyond the queue are dropped, never awaited here.
            let _ = tx.try_send(Sample {
                data: Bytes::from(pcm),
                duration,
                ..Default::default()
            });
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Speaker playback for one remote track. Same thread-ownership scheme as
/// [`AudioCapture`]; dropping the handle stops playback.
pub struct AudioPlayback {
    _stop: std_mpsc::Sender<()>,
}

impl AudioPlayback {
    pub fn new(track: Arc<TrackRemote>) -> Result<Self> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (sample_tx, sample_rx) = std_mpsc::sync_channel::<Vec<f32>>(64);

        // Reader: pulls RTP payloads off the track until it closes.
        tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                let samples: Vec<f32> = packet
                    .payload
                    .chunks_exact(2)
                    .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32)
                    .collect();
                // Drop the frame when the output is behind rather than stall.
                let _ = sample_tx.try_send(samples);
            }
        });

        std::thread::spawn(move || {
            let stream = match build_playback_stream(sample_rx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| anyhow!("playback thread exited during setup"))??;

        Ok(Self { _stop: stop_tx })
    }
}

fn build_playback_stream(rx: std_mpsc::Receiver<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let config = device.default_output_config()?;
    debug!("output config: {:?}", config);

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config.into(), rx)?,
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config.into(), rx)?,
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config.into(), rx)?,
        format => return Err(anyhow!("unsupported sample format: {format:?}")),
    };
    stream.play()?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: std_mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let err_fn = |err| warn!("output stream error: {err}");
    let mut pending: VecDeque<f32> = VecDeque::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while pending.len() < data.len() {
                match rx.try_recv() {
                    Ok(samples) => pending.extend(samples),
                    Err(_) => break,
                }
            }
            for out in data.iter_mut() {
                // Silence when starved.
                let value = pending.pop_front().unwrap_or(0.0);
                *out = T::from_sample(value);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
