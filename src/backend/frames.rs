use super::{AssistantChunk, BackendError, ChunkStream};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

/// What one decoded frame of a response body means for the turn.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
    Chunk(AssistantChunk),
    /// The server reported a failure mid-stream.
    Error(String),
    /// End of stream marker.
    Done,
}

/// Splits a raw response body into frames and interprets them.
pub trait FrameDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem>;

    /// Called once the body ends, for a trailing unterminated frame.
    fn finish(&mut self) -> Vec<StreamItem>;
}

/// Split complete `\n`-terminated lines off the front of `buffer`.
///
/// Works on bytes so a multi-byte character split across network chunks is
/// decoded only once both halves are in.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

struct FrameState<S, D> {
    body: S,
    decoder: D,
    pending: VecDeque<StreamItem>,
    done: bool,
}

/// Turn a response body into a chunk stream. The stream ends at the first
/// `Done` marker, error, or the end of the body.
pub fn into_chunk_stream<S, B, E, D>(body: S, decoder: D) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]>,
    E: Into<BackendError>,
    D: FrameDecoder + Send + 'static,
{
    let state = FrameState {
        body,
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                match item {
                    StreamItem::Chunk(chunk) => return Some((Ok(chunk), state)),
                    StreamItem::Error(message) => {
                        state.pending.clear();
                        state.done = true;
                        return Some((Err(BackendError::Stream(message)), state));
                    }
                    StreamItem::Done => {
                        state.pending.clear();
                        state.done = true;
                        return None;
                    }
                }
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let items = state.decoder.push(bytes.as_ref());
                    state.pending.extend(items);
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    let items = state.decoder.finish();
                    state.pending.extend(items);
                    state.pending.push_back(StreamItem::Done);
                }
            }
        }
    })
    .boxed()
}
