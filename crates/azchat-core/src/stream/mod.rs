pub mod aggregator;
pub mod decoder;

pub use aggregator::{DeltaAggregator, FnSink, FragmentSink};
pub use decoder::{
    decode_body, decode_line, decode_stream, DecodeStats, LineOutcome, LineSplitter, SseRecord,
    StreamEvent,
};
