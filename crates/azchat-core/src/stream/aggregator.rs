use tracing::debug;

use super::decoder::{SseRecord, StreamEvent};
use crate::error::ChatError;

/// Receives the progress of one streamed reply.
///
/// `on_fragment` gets exactly the new text, never the running buffer.
/// `on_finish` is called at most once, after every fragment.
pub trait FragmentSink {
    fn on_fragment(&mut self, fragment: &str);
    fn on_finish(&mut self);
}

/// Discards all notifications.
impl FragmentSink for () {
    fn on_fragment(&mut self, _fragment: &str) {}
    fn on_finish(&mut self) {}
}

/// Adapts a pair of closures.
pub struct FnSink<F, G> {
    pub on_fragment: F,
    pub on_finish: G,
}

impl<F, G> FragmentSink for FnSink<F, G>
where
    F: FnMut(&str),
    G: FnMut(),
{
    fn on_fragment(&mut self, fragment: &str) {
        (self.on_fragment)(fragment)
    }

    fn on_finish(&mut self) {
        (self.on_finish)()
    }
}

impl<S: FragmentSink + ?Sized> FragmentSink for &mut S {
    fn on_fragment(&mut self, fragment: &str) {
        (**self).on_fragment(fragment)
    }

    fn on_finish(&mut self) {
        (**self).on_finish()
    }
}

/// Folds decoded records into the full reply text.
///
/// Either a `finish_reason` of `"stop"` or the `[DONE]` sentinel finishes the
/// stream, whichever comes first. Records after that are ignored.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    buffer: String,
    fragments: usize,
    finished: bool,
    saw_stop: bool,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record. Returns `true` once the stream is finished and the
    /// caller can stop reading.
    pub fn push(&mut self, record: SseRecord, sink: &mut impl FragmentSink) -> bool {
        match record {
            SseRecord::Event(event) => self.push_event(event, sink),
            SseRecord::Done => {
                debug!("received [DONE] sentinel");
                self.finish(sink);
            }
        }
        self.finished
    }

    fn push_event(&mut self, event: StreamEvent, sink: &mut impl FragmentSink) {
        if self.finished {
            debug!("ignoring event after end of stream");
            return;
        }

        if let Some(content) = event.content.as_deref().filter(|c| !c.is_empty()) {
            self.buffer.push_str(content);
            self.fragments += 1;
            sink.on_fragment(content);
        }

        if event.is_stop() {
            debug!("received finish_reason=stop");
            self.saw_stop = true;
            self.finish(sink);
        }
    }

    fn finish(&mut self, sink: &mut impl FragmentSink) {
        if !self.finished {
            self.finished = true;
            sink.on_finish();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the server ever sent `finish_reason: "stop"`.
    pub fn saw_stop(&self) -> bool {
        self.saw_stop
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// The full reply, or `EmptyContent` if nothing was received.
    pub fn into_result(self) -> Result<String, ChatError> {
        if self.buffer.is_empty() {
            Err(ChatError::EmptyContent)
        } else {
            Ok(self.buffer)
        }
    }
}
