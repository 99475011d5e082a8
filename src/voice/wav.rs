//! PCM/WAV/MP3 conversions for the platform recorder and player

use std::io::Cursor;

use crate::{Error, Result};

/// Encode mono f32 samples as 16-bit WAV
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let pcm = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Duration in seconds of a WAV clip, `None` if it does not parse
#[must_use]
pub fn wav_duration_secs(wav: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(wav)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return None;
    }
    let frames = reader.duration();
    Some(f64::from(frames) / f64::from(spec.sample_rate))
}

/// Decoded MP3 stream, downmixed to mono
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the stream is not decodable
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
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
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Audio("MP3 stream contained no frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Re-encode MP3 bytes as WAV for the platform player
///
/// # Errors
///
/// Returns error if decoding or encoding fails
pub fn mp3_to_wav(mp3_data: &[u8]) -> Result<Vec<u8>> {
    let decoded = decode_mp3(mp3_data)?;
    samples_to_wav(&decoded.samples, decoded.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_roundtrip_length() {
        let samples = vec![0.0f32; 16_000];
        let wav = samples_to_wav(&samples, 16_000).unwrap();

        assert_eq!(&wav[..4], b"RIFF");
        let secs = wav_duration_secs(&wav).unwrap();
        assert!((secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clipping_does_not_fail() {
        let wav = samples_to_wav(&[2.0, -2.0, 0.5], 8000).unwrap();
        assert!(wav.len() > 44);
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(decode_mp3(b"definitely not audio").is_err());
        assert!(wav_duration_secs(b"nope").is_none());
    }
}
