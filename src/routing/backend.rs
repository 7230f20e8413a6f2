//! CPAL-facing stream plumbing.
//!
//! The capture callback runs the routing chain directly; each output
//! device drains its own lock-free SPSC ring buffer from CPAL's output
//! callback. The router's synchronous "write" to a channel is therefore a
//! non-blocking producer push, and a stalled device starves only itself.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;

use crate::routing::channel::BlockWriter;
use crate::{EngineConfig, RouteAudioError, WriteError};

/// Output ring depth in seconds of audio.
const OUTPUT_BUFFER_SECONDS: usize = 3;

/// A running CPAL capture stream.
///
/// Capture continues while this struct is held; dropping it stops the
/// stream and releases the device. Keeping teardown in RAII means the
/// handle can never leak across any exit path.
pub(crate) struct InputStream {
    _stream: cpal::Stream,
}

/// A running CPAL playback stream, draining one channel's ring buffer.
pub(crate) struct OutputStream {
    _stream: cpal::Stream,
}

/// Feeds a CPAL output stream through an SPSC ring buffer.
pub(crate) struct RingWriter {
    producer: ringbuf::HeapProd<f32>,
}

impl BlockWriter for RingWriter {
    fn write_block(&mut self, block: &[f32]) -> Result<(), WriteError> {
        let pushed = self.producer.push_slice(block);
        if pushed < block.len() {
            return Err(WriteError::BufferFull {
                dropped: block.len() - pushed,
            });
        }
        Ok(())
    }
}

/// Finds a device by name across every available host.
pub(crate) fn find_device(name: &str) -> Result<cpal::Device, RouteAudioError> {
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.devices() else {
            continue;
        };
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
    }
    Err(RouteAudioError::DeviceNotFound {
        name: name.to_string(),
    })
}

fn stream_config(engine: &EngineConfig) -> CpalStreamConfig {
    CpalStreamConfig {
        channels: engine.channels,
        sample_rate: SampleRate(engine.sample_rate),
        buffer_size: BufferSize::Fixed(engine.block_size),
    }
}

fn require_f32(format: SampleFormat) -> Result<(), RouteAudioError> {
    if format == SampleFormat::F32 {
        Ok(())
    } else {
        Err(RouteAudioError::UnsupportedFormat {
            format: format!("{format:?}"),
        })
    }
}

/// Opens the capture stream and starts it.
///
/// `on_block` receives every interleaved input block on the real-time
/// thread; `on_error` receives backend stream errors (underruns, device
/// hiccups) off the data path.
pub(crate) fn open_input(
    device: &cpal::Device,
    engine: &EngineConfig,
    mut on_block: impl FnMut(&[f32]) + Send + 'static,
    on_error: impl Fn(String) + Send + 'static,
) -> Result<InputStream, RouteAudioError> {
    let supported = device
        .default_input_config()
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;
    require_f32(supported.sample_format())?;

    let config = stream_config(engine);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_block(data);
            },
            move |err| {
                tracing::error!("input stream error: {err}");
                on_error(err.to_string());
            },
            None,
        )
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;

    Ok(InputStream { _stream: stream })
}

/// Opens a playback stream for one output device and starts it.
///
/// Returns the RAII stream handle plus the producer-side writer the
/// channel pushes processed blocks into. When the ring runs dry the
/// output callback fills with silence rather than glitching.
pub(crate) fn open_output(
    device: &cpal::Device,
    engine: &EngineConfig,
) -> Result<(OutputStream, RingWriter), RouteAudioError> {
    let supported = device
        .default_output_config()
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;
    require_f32(supported.sample_format())?;

    let capacity =
        engine.sample_rate as usize * engine.channels as usize * OUTPUT_BUFFER_SECONDS;
    let ring = HeapRb::<f32>::new(capacity);
    let (producer, mut consumer) = ring.split();

    let config = stream_config(engine);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let read = consumer.pop_slice(data);
                for sample in &mut data[read..] {
                    *sample = 0.0;
                }
            },
            |err| {
                tracing::error!("output stream error: {err}");
            },
            None,
        )
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| RouteAudioError::BackendError(e.to_string()))?;

    Ok((OutputStream { _stream: stream }, RingWriter { producer }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_writer_pushes_and_reports_overflow() {
        let ring = HeapRb::<f32>::new(8);
        let (producer, _consumer) = ring.split();
        let mut writer = RingWriter { producer };

        writer.write_block(&[0.0; 8]).unwrap();
        let result = writer.write_block(&[0.0; 4]);
        assert!(matches!(
            result,
            Err(WriteError::BufferFull { dropped: 4 })
        ));
    }

    #[test]
    fn test_find_device_unknown_name() {
        let result = find_device("definitely-not-a-real-device-name");
        assert!(matches!(
            result,
            Err(RouteAudioError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_require_f32() {
        assert!(require_f32(SampleFormat::F32).is_ok());
        assert!(require_f32(SampleFormat::I16).is_err());
    }
}
