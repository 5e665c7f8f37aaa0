//! Audio decoder using symphonia
//!
//! Decodes whole assets (WAV, MP3, FLAC, AAC, Vorbis) into stereo f32
//! buffers. Decoding is blocking; callers run it on the blocking pool.

use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_S16LE};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::audio::types::AudioBuffer;
use crate::error::{Error, Result};

/// Simple whole-file audio decoder using symphonia.
pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Whether the codec registry can decode at all (baseline PCM support).
    pub fn codecs_available() -> bool {
        symphonia::default::get_codecs()
            .get_codec(CODEC_TYPE_PCM_S16LE)
            .is_some()
    }

    /// Decode an entire audio file.
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be opened
    /// - `Error::Decode` for unsupported formats or a stream with no audio track
    pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
        debug!("Decoding entire file: {}", path.display());

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext_str) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext_str);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: skip it and keep going
                    warn!("Decode error: {}", e);
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Decoder failed: {}", e)));
                }
            }
        }

        if channels == 0 {
            return Err(Error::Decode("Channel count not found".to_string()));
        }

        let buffer = AudioBuffer::from_interleaved(&samples, sample_rate, channels);
        debug!(
            "Decoded {} frames at {} Hz ({} source channels)",
            buffer.frames(),
            sample_rate,
            channels
        );
        Ok(buffer)
    }
}
