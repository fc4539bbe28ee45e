// Audio host - CPAL streams driving the mixer
//
// # Format Support
//
// Devices may expose f32, i16 or u16 samples. The mixer always renders
// interleaved stereo f32; conversion to the device format happens while
// copying into the device buffer, without allocating.
//
// # Input
//
// The input stream runs on its own callback. Captured frames go through a
// lock-free ring buffer and are consumed by the output callback, which owns
// the mixer.
//
// # Stream Limitations
//
// On macOS (CoreAudio) `Stream` is neither Send nor Sync, so the host must
// stay on the thread that created it. Stream errors are reported as
// notifications; reconnecting is left to the caller.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info, warn};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use thiserror::Error;

use crate::audio::buffer::AudioBuffer;
use crate::audio::format_conversion::{read_interleaved_frame, write_buffer_to_device, write_silence};
use crate::engine::MAX_BLOCK_FRAMES;
use crate::messaging::channels::NotificationProducer;
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::mixer::{Mixer, RenderInfo, RenderInfoCell};

/// Input ring size, in samples (interleaved stereo)
const INPUT_RING_SAMPLES: usize = MAX_BLOCK_FRAMES * 2 * 4;

#[derive(Debug, Error)]
pub enum AudioHostError {
    #[error("no audio device found")]
    NoDevice,

    #[error("device configuration error: {0}")]
    Config(String),

    #[error("unsupported sample format {0}, supported formats: F32, I16, U16")]
    UnsupportedFormat(String),

    #[error("cannot build stream: {0}")]
    Build(String),

    #[error("cannot start stream: {0}")]
    Play(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl From<u8> for DeviceStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => DeviceStatus::Connecting,
            2 => DeviceStatus::Connected,
            3 => DeviceStatus::Error,
            _ => DeviceStatus::Disconnected,
        }
    }
}

/// Device status shared with the stream callbacks
#[derive(Debug, Clone, Default)]
pub struct AtomicDeviceStatus {
    inner: Arc<AtomicU8>,
}

impl AtomicDeviceStatus {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(status as u8)),
        }
    }

    pub fn get(&self) -> DeviceStatus {
        DeviceStatus::from(self.inner.load(Ordering::Relaxed))
    }

    pub fn set(&self, status: DeviceStatus) {
        self.inner.store(status as u8, Ordering::Relaxed);
    }
}

type SharedNotifications = Arc<Mutex<NotificationProducer>>;

struct Endpoint {
    device: Device,
    config: StreamConfig,
    format: SampleFormat,
}

impl Endpoint {
    fn channels(&self) -> usize {
        self.config.channels as usize
    }
}

pub struct AudioHost {
    output: Endpoint,
    input: Option<Endpoint>,
    streams: Vec<Stream>,
    status: AtomicDeviceStatus,
    notifications: Option<SharedNotifications>,
}

impl AudioHost {
    /// Open the default output device, and the default input device when
    /// `with_input` is set. Nothing runs until `start`.
    pub fn open(with_input: bool) -> Result<Self, AudioHostError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioHostError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioHostError::Config(e.to_string()))?;
        info!(
            "[audio] output device: {} ({:?})",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            supported
        );
        let output = Endpoint {
            device,
            format: supported.sample_format(),
            config: supported.into(),
        };

        let input = if with_input {
            match Self::open_input(&host) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!("[audio] input disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            output,
            input,
            streams: Vec::new(),
            status: AtomicDeviceStatus::new(DeviceStatus::Disconnected),
            notifications: None,
        })
    }

    fn open_input(host: &cpal::Host) -> Result<Endpoint, AudioHostError> {
        let device = host.default_input_device().ok_or(AudioHostError::NoDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioHostError::Config(e.to_string()))?;
        info!(
            "[audio] input device: {} ({:?})",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            supported
        );
        Ok(Endpoint {
            device,
            format: supported.sample_format(),
            config: supported.into(),
        })
    }

    pub fn set_notifications(&mut self, tx: SharedNotifications) {
        self.notifications = Some(tx);
    }

    pub fn sample_rate(&self) -> u32 {
        self.output.config.sample_rate.0
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.get()
    }

    /// Build and start the streams. The mixer moves into the output callback.
    pub fn start(&mut self, mixer: Mixer, render_info: Arc<RenderInfoCell>) -> Result<(), AudioHostError> {
        self.status.set(DeviceStatus::Connecting);

        let (input_stream, input_rx) = match &self.input {
            Some(endpoint) => {
                let (tx, rx) = HeapRb::<f32>::new(INPUT_RING_SAMPLES).split();
                let stream = match endpoint.format {
                    SampleFormat::F32 => self.build_input::<f32>(endpoint, tx),
                    SampleFormat::I16 => self.build_input::<i16>(endpoint, tx),
                    SampleFormat::U16 => self.build_input::<u16>(endpoint, tx),
                    other => Err(AudioHostError::UnsupportedFormat(format!("{:?}", other))),
                }?;
                (Some(stream), Some(rx))
            }
            None => (None, None),
        };

        let callback = RenderCallback {
            mixer,
            render_info,
            last_info: RenderInfo::default(),
            out: AudioBuffer::stereo(MAX_BLOCK_FRAMES),
            input: AudioBuffer::stereo(MAX_BLOCK_FRAMES),
            input_rx,
        };
        let output_stream = match self.output.format {
            SampleFormat::F32 => self.build_output::<f32>(callback),
            SampleFormat::I16 => self.build_output::<i16>(callback),
            SampleFormat::U16 => self.build_output::<u16>(callback),
            other => Err(AudioHostError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        output_stream
            .play()
            .map_err(|e| AudioHostError::Play(e.to_string()))?;
        self.streams.push(output_stream);
        if let Some(stream) = input_stream {
            stream.play().map_err(|e| AudioHostError::Play(e.to_string()))?;
            self.streams.push(stream);
        }

        self.status.set(DeviceStatus::Connected);
        info!(
            "[audio] started: {} Hz, {} channels",
            self.sample_rate(),
            self.output.channels()
        );
        self.notify(Notification::info(
            NotificationCategory::Audio,
            format!("Audio connected: {} Hz", self.sample_rate()),
        ));
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.notifications {
            if let Ok(mut tx) = tx.try_lock() {
                let _ = tx.try_push(notification);
            }
        }
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let status = self.status.clone();
        let notifications = self.notifications.clone();
        move |err| {
            // Runs outside the audio callback
            error!("[audio] stream error: {}", err);
            status.set(DeviceStatus::Error);
            if let Some(tx) = &notifications {
                if let Ok(mut tx) = tx.try_lock() {
                    let _ = tx.try_push(Notification::error(
                        NotificationCategory::Audio,
                        format!("Audio stream error: {}", err),
                    ));
                }
            }
        }
    }

    fn build_output<T>(&self, mut callback: RenderCallback) -> Result<Stream, AudioHostError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let channels = self.output.channels();
        self.output
            .device
            .build_output_stream(
                &self.output.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    callback.fill(data, channels);
                },
                self.error_callback(),
                None,
            )
            .map_err(|e| AudioHostError::Build(e.to_string()))
    }

    fn build_input<T>(
        &self,
        endpoint: &Endpoint,
        mut tx: ringbuf::HeapProd<f32>,
    ) -> Result<Stream, AudioHostError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = endpoint.channels().max(1);
        endpoint
            .device
            .build_input_stream(
                &endpoint.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(channels) {
                        let (left, right) = read_interleaved_frame(frame);
                        // Overruns drop the newest frames
                        if tx.vacant_len() < 2 {
                            break;
                        }
                        let _ = tx.try_push(left);
                        let _ = tx.try_push(right);
                    }
                },
                self.error_callback(),
                None,
            )
            .map_err(|e| AudioHostError::Build(e.to_string()))
    }
}

/// State owned by the output callback
struct RenderCallback {
    mixer: Mixer,
    render_info: Arc<RenderInfoCell>,
    last_info: RenderInfo,
    out: AudioBuffer,
    input: AudioBuffer,
    input_rx: Option<ringbuf::HeapCons<f32>>,
}

impl RenderCallback {
    fn fill<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        // ========== SACRED ZONE ==========
        // No allocations, No I/O, No blocking locks
        let frames = data.len() / channels.max(1);
        if !self.out.set_frames(frames) || !self.input.set_frames(frames) {
            write_silence(data);
            return;
        }
        self.render_info.load_into(&mut self.last_info);

        let input = match self.input_rx.as_mut() {
            Some(rx) => {
                for frame in 0..frames {
                    let left = rx.try_pop().unwrap_or(0.0);
                    let right = rx.try_pop().unwrap_or(0.0);
                    let slot = self.input.frame_mut(frame);
                    slot[0] = left;
                    slot[1] = right;
                }
                Some(&self.input)
            }
            None => None,
        };

        self.mixer.render(&mut self.out, input, &self.last_info);
        write_buffer_to_device(&self.out, data, channels);
        // ========== SACRED ZONE END ==========
    }
}
