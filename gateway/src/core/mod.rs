pub mod codec;
pub mod frame;
pub mod realtime;
pub mod telephony;

pub use codec::{
    AudioPipeline, CodecError, CodecResult, Resampler, TELEPHONY_SAMPLE_RATE, UpstreamAudioFormat,
    pcm16_to_pcmu, pcmu_to_pcm16,
};
pub use frame::FrameDecodeError;
pub use realtime::{
    RealtimeConfig, RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeEvent,
    RealtimeResult, RealtimeSender,
};
pub use telephony::{MediaFrame, OutboundFrame, StreamStart, TelephonyDialect, TelephonyEvent};
