//! Audio codec conversion between telephony and realtime formats.
//!
//! Telephony media streams carry G.711 mu-law (PCMU) at 8 kHz. The realtime
//! session expects 16-bit signed little-endian PCM, usually at 24 kHz, or can
//! accept PCMU directly when configured for `g711_ulaw`.
//!
//! The conversion functions are pure: `pcmu_to_pcm16` doubles the byte count,
//! `pcm16_to_pcmu` halves it. Rate conversion is handled separately by
//! [`Resampler`], which keeps interpolation state between frames so that
//! consecutive 20 ms chunks join without clicks.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sample rate of the telephony media stream.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Default PCM16 sample rate for the OpenAI Realtime API.
pub const DEFAULT_UPSTREAM_SAMPLE_RATE: u32 = 24000;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Errors raised while converting a single audio buffer.
///
/// A codec error only ever affects the frame being converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("audio buffer is empty")]
    EmptyInput,

    #[error("PCM16 buffer has odd length {0}")]
    OddLength(usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

static ULAW_TO_LINEAR: [i16; 256] = build_ulaw_table();

const fn build_ulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_ulaw_sample(i as u8);
        i += 1;
    }
    table
}

const fn decode_ulaw_sample(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[inline]
fn encode_ulaw_sample(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    if magnitude > ULAW_CLIP {
        magnitude = ULAW_CLIP;
    }
    magnitude += ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decode PCMU bytes into little-endian PCM16 bytes (1:2).
pub fn pcmu_to_pcm16(input: &[u8]) -> CodecResult<Vec<u8>> {
    if input.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let mut output = Vec::with_capacity(input.len() * 2);
    for &byte in input {
        output.extend_from_slice(&ULAW_TO_LINEAR[byte as usize].to_le_bytes());
    }
    Ok(output)
}

/// Encode little-endian PCM16 bytes into PCMU bytes (2:1).
pub fn pcm16_to_pcmu(input: &[u8]) -> CodecResult<Vec<u8>> {
    if input.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    if input.len() % 2 != 0 {
        return Err(CodecError::OddLength(input.len()));
    }

    Ok(input
        .chunks_exact(2)
        .map(|pair| encode_ulaw_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

fn bytes_to_samples(input: &[u8]) -> CodecResult<Vec<i16>> {
    if input.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    if input.len() % 2 != 0 {
        return Err(CodecError::OddLength(input.len()));
    }
    Ok(input
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut output = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        output.extend_from_slice(&sample.to_le_bytes());
    }
    output
}

/// Streaming linear-interpolation sample rate converter.
///
/// The read position is tracked as an exact fraction (`phase / to_rate`
/// input samples) so long calls do not accumulate floating point drift.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    phase: u64,
    last: Option<i16>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            phase: 0,
            last: None,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample one chunk, carrying the trailing sample into the next call.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let mut window = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            window.push(last);
        }
        window.extend_from_slice(input);

        let to_rate = self.to_rate as u64;
        let from_rate = self.from_rate as u64;
        let span = (window.len() as u64 - 1) * to_rate;
        let mut output =
            Vec::with_capacity((input.len() as u64 * to_rate / from_rate + 1) as usize);

        while self.phase < span {
            let index = (self.phase / to_rate) as usize;
            let frac = (self.phase % to_rate) as f64 / to_rate as f64;
            let current = window[index] as f64;
            let next = window[index + 1] as f64;
            let value = current + (next - current) * frac;
            output.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            self.phase += from_rate;
        }

        self.phase -= span;
        self.last = window.last().copied();
        output
    }

    pub fn reset(&mut self) {
        self.phase = 0;
        self.last = None;
    }
}

/// Audio format negotiated with the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum UpstreamAudioFormat {
    /// 16-bit linear PCM at the given sample rate.
    Pcm16 { sample_rate: u32 },
    /// G.711 mu-law at 8 kHz, forwarded without transcoding.
    G711Ulaw,
}

impl Default for UpstreamAudioFormat {
    fn default() -> Self {
        UpstreamAudioFormat::Pcm16 {
            sample_rate: DEFAULT_UPSTREAM_SAMPLE_RATE,
        }
    }
}

impl UpstreamAudioFormat {
    /// Parse a format name such as `pcm16` or `g711_ulaw`.
    pub fn parse(name: &str, sample_rate: Option<u32>) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "pcm16" | "pcm" | "linear16" => Some(UpstreamAudioFormat::Pcm16 {
                sample_rate: sample_rate.unwrap_or(DEFAULT_UPSTREAM_SAMPLE_RATE),
            }),
            "g711_ulaw" | "ulaw" | "mulaw" | "pcmu" => Some(UpstreamAudioFormat::G711Ulaw),
            _ => None,
        }
    }

    /// Name used in the realtime session configuration.
    #[inline]
    pub fn wire_name(&self) -> &'static str {
        match self {
            UpstreamAudioFormat::Pcm16 { .. } => "pcm16",
            UpstreamAudioFormat::G711Ulaw => "g711_ulaw",
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            UpstreamAudioFormat::Pcm16 { sample_rate } => *sample_rate,
            UpstreamAudioFormat::G711Ulaw => TELEPHONY_SAMPLE_RATE,
        }
    }
}

impl fmt::Display for UpstreamAudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamAudioFormat::Pcm16 { sample_rate } => write!(f, "pcm16@{sample_rate}"),
            UpstreamAudioFormat::G711Ulaw => write!(f, "g711_ulaw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ingress,
    Egress,
}

/// Per-direction conversion chain owned by a single relay.
#[derive(Debug, Clone)]
pub struct AudioPipeline {
    direction: Direction,
    format: UpstreamAudioFormat,
    resampler: Option<Resampler>,
}

impl AudioPipeline {
    /// PCMU from telephony into the upstream input format.
    pub fn ingress(format: UpstreamAudioFormat) -> Self {
        let resampler = match format {
            UpstreamAudioFormat::Pcm16 { sample_rate } if sample_rate != TELEPHONY_SAMPLE_RATE => {
                Some(Resampler::new(TELEPHONY_SAMPLE_RATE, sample_rate))
            }
            _ => None,
        };
        Self {
            direction: Direction::Ingress,
            format,
            resampler,
        }
    }

    /// Upstream output format into PCMU for telephony.
    pub fn egress(format: UpstreamAudioFormat) -> Self {
        let resampler = match format {
            UpstreamAudioFormat::Pcm16 { sample_rate } if sample_rate != TELEPHONY_SAMPLE_RATE => {
                Some(Resampler::new(sample_rate, TELEPHONY_SAMPLE_RATE))
            }
            _ => None,
        };
        Self {
            direction: Direction::Egress,
            format,
            resampler,
        }
    }

    pub fn format(&self) -> UpstreamAudioFormat {
        self.format
    }

    /// Convert one buffer. An empty result means the resampler is still
    /// priming and nothing should be sent for this buffer.
    pub fn convert(&mut self, input: &[u8]) -> CodecResult<Vec<u8>> {
        if input.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        match (self.direction, self.format) {
            (_, UpstreamAudioFormat::G711Ulaw) => Ok(input.to_vec()),
            (Direction::Ingress, UpstreamAudioFormat::Pcm16 { .. }) => {
                let pcm = pcmu_to_pcm16(input)?;
                match self.resampler.as_mut() {
                    Some(resampler) => {
                        let samples = bytes_to_samples(&pcm)?;
                        Ok(samples_to_bytes(&resampler.process(&samples)))
                    }
                    None => Ok(pcm),
                }
            }
            (Direction::Egress, UpstreamAudioFormat::Pcm16 { .. }) => {
                let samples = bytes_to_samples(input)?;
                let samples = match self.resampler.as_mut() {
                    Some(resampler) => resampler.process(&samples),
                    None => samples,
                };
                if samples.is_empty() {
                    return Ok(Vec::new());
                }
                pcm16_to_pcmu(&samples_to_bytes(&samples))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcmu_frame_decodes_to_double_length() {
        let frame = vec![0xFFu8; 160];
        let pcm = pcmu_to_pcm16(&frame).unwrap();
        assert_eq!(pcm.len(), 320);
    }

    #[test]
    fn test_round_trip_is_length_stable() {
        for len in [2usize, 20, 160, 320, 1000] {
            let pcmu: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            let pcm = pcmu_to_pcm16(&pcmu).unwrap();
            let back = pcm16_to_pcmu(&pcm).unwrap();
            assert_eq!(back.len(), pcmu.len(), "length changed for {len}");
        }
    }

    #[test]
    fn test_round_trip_preserves_codewords() {
        // Every mu-law codeword except negative zero (0x7F) survives decode/encode.
        for byte in 0u8..=255 {
            if byte == 0x7F {
                continue;
            }
            let pcm = pcmu_to_pcm16(&[byte]).unwrap();
            let back = pcm16_to_pcmu(&pcm).unwrap();
            assert_eq!(back[0], byte, "codeword {byte:#04x}");
        }
    }

    #[test]
    fn test_silence_and_extremes() {
        assert_eq!(ULAW_TO_LINEAR[0xFF], 0);
        assert_eq!(ULAW_TO_LINEAR[0x7F], 0);
        assert_eq!(ULAW_TO_LINEAR[0x00], -32124);
        assert_eq!(ULAW_TO_LINEAR[0x80], 32124);
        assert_eq!(encode_ulaw_sample(0), 0xFF);
        assert_eq!(encode_ulaw_sample(i16::MAX), 0x80);
        assert_eq!(encode_ulaw_sample(i16::MIN), 0x00);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert_eq!(pcmu_to_pcm16(&[]), Err(CodecError::EmptyInput));
        assert_eq!(pcm16_to_pcmu(&[]), Err(CodecError::EmptyInput));
    }

    #[test]
    fn test_odd_pcm16_length_is_rejected() {
        assert_eq!(pcm16_to_pcmu(&[0, 1, 2]), Err(CodecError::OddLength(3)));
    }

    #[test]
    fn test_upsample_three_times() {
        let mut resampler = Resampler::new(8000, 24000);
        let first = resampler.process(&[0i16; 160]);
        // The first chunk has no previous sample to interpolate from.
        assert_eq!(first.len(), 477);
        let second = resampler.process(&[0i16; 160]);
        assert_eq!(second.len(), 480);
        let third = resampler.process(&[0i16; 160]);
        assert_eq!(third.len(), 480);
    }

    #[test]
    fn test_downsample_by_three() {
        let mut resampler = Resampler::new(24000, 8000);
        let mut total = 0;
        for _ in 0..10 {
            total += resampler.process(&[100i16; 480]).len();
        }
        // 4800 input samples at 24 kHz are 1600 samples at 8 kHz.
        assert!((1599..=1600).contains(&total), "got {total}");
    }

    #[test]
    fn test_interpolation_is_linear() {
        let mut resampler = Resampler::new(8000, 16000);
        let out = resampler.process(&[0, 100, 200]);
        assert_eq!(out, vec![0, 50, 100, 150]);
    }

    #[test]
    fn test_pipeline_ingress_pcm16_24k() {
        let mut pipeline = AudioPipeline::ingress(UpstreamAudioFormat::default());
        let first = pipeline.convert(&[0xFFu8; 160]).unwrap();
        assert_eq!(first.len(), 477 * 2);
        let second = pipeline.convert(&[0xFFu8; 160]).unwrap();
        assert_eq!(second.len(), 480 * 2);
    }

    #[test]
    fn test_pipeline_ingress_pcm16_8k_is_plain_decode() {
        let mut pipeline = AudioPipeline::ingress(UpstreamAudioFormat::Pcm16 {
            sample_rate: TELEPHONY_SAMPLE_RATE,
        });
        let out = pipeline.convert(&[0xFFu8; 160]).unwrap();
        assert_eq!(out.len(), 320);
    }

    #[test]
    fn test_pipeline_egress_pcm16_24k() {
        let mut pipeline = AudioPipeline::egress(UpstreamAudioFormat::default());
        // 20 ms at 24 kHz is 480 samples.
        let out = pipeline.convert(&vec![0u8; 960]).unwrap();
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn test_pipeline_egress_rejects_odd_delta() {
        let mut pipeline = AudioPipeline::egress(UpstreamAudioFormat::default());
        assert_eq!(pipeline.convert(&[1, 2, 3]), Err(CodecError::OddLength(3)));
    }

    #[test]
    fn test_pipeline_ulaw_passthrough() {
        let mut ingress = AudioPipeline::ingress(UpstreamAudioFormat::G711Ulaw);
        let mut egress = AudioPipeline::egress(UpstreamAudioFormat::G711Ulaw);
        assert_eq!(ingress.convert(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);
        assert_eq!(egress.convert(&[4, 5]).unwrap(), vec![4, 5]);
        assert_eq!(ingress.convert(&[]), Err(CodecError::EmptyInput));
    }

    #[test]
    fn test_format_parse_and_wire_names() {
        assert_eq!(
            UpstreamAudioFormat::parse("pcm16", None),
            Some(UpstreamAudioFormat::Pcm16 { sample_rate: 24000 })
        );
        assert_eq!(
            UpstreamAudioFormat::parse("G711_ULAW", Some(16000)),
            Some(UpstreamAudioFormat::G711Ulaw)
        );
        assert_eq!(UpstreamAudioFormat::parse("opus", None), None);
        assert_eq!(UpstreamAudioFormat::G711Ulaw.wire_name(), "g711_ulaw");
        assert_eq!(UpstreamAudioFormat::default().to_string(), "pcm16@24000");
    }
}
