// Format conversion for CPAL audio streams
//
// The render graph works in interleaved stereo f32. Devices may expose any
// channel count and f32/i16/u16 samples; these helpers bridge the two without
// allocating, so they can run inside the stream callbacks.

use cpal::{FromSample, Sample};

use crate::audio::buffer::AudioBuffer;

/// Write one internal stereo frame to a device frame of any width.
///
/// Mono devices get the L/R average, extra device channels get silence.
#[inline]
pub fn write_stereo_to_interleaved_frame<T>((left, right): (f32, f32), output_frame: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    if output_frame.len() >= 2 {
        output_frame[0] = T::from_sample(left);
        output_frame[1] = T::from_sample(right);
        for channel_sample in output_frame.iter_mut().skip(2) {
            *channel_sample = T::from_sample(0.0f32);
        }
    } else if let Some(channel_sample) = output_frame.first_mut() {
        *channel_sample = T::from_sample((left + right) * 0.5);
    }
}

/// Copy a rendered buffer into the device output, converting the format.
/// Device frames past the end of `src` are zero-filled.
pub fn write_buffer_to_device<T>(src: &AudioBuffer, output: &mut [T], device_channels: usize)
where
    T: Sample + FromSample<f32>,
{
    let device_channels = device_channels.max(1);
    for (i, frame) in output.chunks_mut(device_channels).enumerate() {
        let left = src.get(i, 0);
        let right = if src.count_channels() > 1 { src.get(i, 1) } else { left };
        write_stereo_to_interleaved_frame((left, right), frame);
    }
}

/// Zero-fill a device buffer of any sample type
pub fn write_silence<T>(output: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    for sample in output.iter_mut() {
        *sample = T::from_sample(0.0f32);
    }
}

/// Read one device frame into internal stereo. Mono inputs are duplicated.
#[inline]
pub fn read_interleaved_frame<T>(input_frame: &[T]) -> (f32, f32)
where
    T: Sample,
    f32: FromSample<T>,
{
    match input_frame {
        [] => (0.0, 0.0),
        [mono] => {
            let v = f32::from_sample(*mono);
            (v, v)
        }
        [left, right, ..] => (f32::from_sample(*left), f32::from_sample(*right)),
    }
}
