// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod clock;
pub mod error;
pub mod manager;
pub mod packet;
pub mod source;
pub mod stream;
pub mod synth;
// 公开导出这些模块里的结构体，方便外部调用
pub use buffer::ChannelBuffer;
pub use clock::{ClockControl, ClockGenerator, ClockSettings, Edge};
pub use error::{SimError, SimResult, SourceFailure};
pub use manager::SourceManager;
pub use packet::{SamplePacket, TIMESTAMP_UNSET};
pub use source::{SignalSource, SourceConfig, SourceState, TimestampMode};
pub use stream::{ChannelKind, SourceKind, StreamDescriptor};
pub use synth::{ChannelPolicy, NoiseFloor, Synthesizer, Tone, Waveform};
