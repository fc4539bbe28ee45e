// Module audio - Buffers, DSP helpers and the CPAL host

pub mod buffer;
pub mod dsp_utils;
pub mod engine;
pub mod format_conversion;
pub mod parameters;
pub mod processor;

pub use buffer::AudioBuffer;
pub use engine::{AudioHost, AudioHostError, DeviceStatus};
