use std::fmt::Display;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use super::frame::{parse_event_line, EventFrame};
use super::lines::LineReassembler;
use super::NormalizedEvent;
use crate::protocol::DeltaAdapter;
use crate::util::truncate_for_log;

const LOG_FRAGMENT_MAX_CHARS: usize = 200;

/// Lifecycle of one transcoding operation. `Done` and `Errored` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Streaming,
    Done,
    Errored,
}

/// Counters reported when a stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub chunks: u64,
    pub bytes: u64,
    pub events: u64,
    pub skipped_lines: u64,
}

/// Converts upstream body chunks into normalized events.
///
/// Per chunk the pipeline is: line reassembly, frame recognition, delta
/// extraction. The transcoder guarantees exactly one terminal event (`Done`
/// or `Error`) per instance; once it has been pushed every further call is
/// a no-op.
pub struct StreamTranscoder {
    lines: LineReassembler,
    adapter: &'static dyn DeltaAdapter,
    state: TranscodeState,
    stats: TranscodeStats,
}

impl StreamTranscoder {
    #[must_use]
    pub fn new(adapter: &'static dyn DeltaAdapter) -> Self {
        Self {
            lines: LineReassembler::new(),
            adapter,
            state: TranscodeState::Streaming,
            stats: TranscodeStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TranscodeState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state != TranscodeState::Streaming
    }

    #[must_use]
    pub fn stats(&self) -> TranscodeStats {
        self.stats
    }

    /// Feed one upstream chunk and append the resulting events to `out`.
    ///
    /// A `[DONE]` line pushes `Done` and ends the stream; lines after it in
    /// the same chunk are ignored. Undecodable bytes push `Error`.
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<NormalizedEvent>) {
        if self.is_finished() {
            return;
        }
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len() as u64;

        let adapter = self.adapter;
        let stats = &mut self.stats;
        let start_len = out.len();
        let mut terminated = false;
        let decoded = self.lines.feed_with(chunk, |line| {
            if terminated {
                return;
            }
            match parse_event_line(line) {
                None => {}
                Some(EventFrame::Terminator) => {
                    out.push(NormalizedEvent::Done);
                    terminated = true;
                }
                Some(EventFrame::Data(payload)) => {
                    if let Err(err) = adapter.extract_deltas(payload, out) {
                        stats.skipped_lines += 1;
                        tracing::warn!(
                            adapter = adapter.name(),
                            "skipping malformed stream payload: {err}; data: {}",
                            truncate_for_log(payload, LOG_FRAGMENT_MAX_CHARS)
                        );
                    }
                }
            }
        });
        self.stats.events += (out.len() - start_len) as u64;

        if terminated {
            self.state = TranscodeState::Done;
            return;
        }
        if let Err(err) = decoded {
            self.fail(&err, out);
        }
    }

    /// Upstream closed. Pushes a synthetic `Done` unless the stream already
    /// ended; an unterminated trailing line is dropped.
    pub fn finish(&mut self, out: &mut Vec<NormalizedEvent>) {
        if self.is_finished() {
            return;
        }
        if let Some(residual) = self.lines.finish() {
            tracing::debug!(
                "discarding unterminated trailing line: {}",
                truncate_for_log(&residual, LOG_FRAGMENT_MAX_CHARS)
            );
        }
        self.state = TranscodeState::Done;
        self.stats.events += 1;
        out.push(NormalizedEvent::Done);
    }

    /// An unrecoverable read or decode failure. Pushes one `Error` event
    /// unless the stream already ended.
    pub fn fail(&mut self, err: &dyn Display, out: &mut Vec<NormalizedEvent>) {
        if self.is_finished() {
            return;
        }
        tracing::error!("upstream stream failed: {err}");
        self.state = TranscodeState::Errored;
        self.stats.events += 1;
        out.push(NormalizedEvent::error(err.to_string()));
    }
}

struct PendingEvents {
    events: SmallVec<[NormalizedEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<NormalizedEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::replace(&mut self.events[self.head], NormalizedEvent::Done);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<NormalizedEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.reserve(parsed.len());
        self.events.extend(parsed.drain(..));
    }
}

type UpstreamBody<S> = Option<Pin<Box<S>>>;

/// Drive a [`StreamTranscoder`] over an upstream byte stream.
///
/// The returned stream yields events strictly in upstream order and always
/// ends with exactly one terminal event. The upstream stream is dropped as
/// soon as the terminal event is produced, and also when the returned
/// stream itself is dropped early (downstream disconnect), so the body
/// reader is released exactly once on every path.
pub fn transcode_stream<S, E>(
    byte_stream: S,
    adapter: &'static dyn DeltaAdapter,
) -> impl Stream<Item = NormalizedEvent> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let upstream: UpstreamBody<S> = Some(Box::pin(byte_stream));
    futures_util::stream::unfold(
        (
            upstream,
            StreamTranscoder::new(adapter),
            Vec::<NormalizedEvent>::with_capacity(8),
            PendingEvents::new(),
        ),
        |(mut upstream, mut transcoder, mut parsed, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (upstream, transcoder, parsed, pending)));
                }
                if transcoder.is_finished() {
                    let stats = transcoder.stats();
                    tracing::debug!(
                        chunks = stats.chunks,
                        bytes = stats.bytes,
                        events = stats.events,
                        skipped_lines = stats.skipped_lines,
                        "upstream stream transcoded"
                    );
                    return None;
                }

                let Some(body) = upstream.as_mut() else {
                    transcoder.finish(&mut parsed);
                    pending.extend_from_vec(&mut parsed);
                    continue;
                };
                match body.as_mut().next().await {
                    Some(Ok(bytes)) => transcoder.push_chunk(&bytes, &mut parsed),
                    Some(Err(err)) => transcoder.fail(&err, &mut parsed),
                    None => transcoder.finish(&mut parsed),
                }
                if transcoder.is_finished() {
                    upstream = None;
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}
