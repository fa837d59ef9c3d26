//! Newline-delimited JSON line buffering
//!
//! Backends stream one JSON document per line, but the network is free to split a line across
//! several chunks or pack several lines into one. This wrapper accumulates bytes and only yields
//! complete lines, without their trailing `\n`.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream wrapper that yields one complete line per item.
///
/// Blank lines are skipped. Whatever is left in the buffer when the inner stream ends is
/// yielded as a final line even without a terminating newline, which is how a backend answers
/// a request with `"stream": false`.
pub struct NdjsonStream<S> {
    inner: S,
    buffer: BytesMut,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            while let Some(pos) = this.buffer.iter().position(|b| *b == b'\n') {
                let mut line = this.buffer.split_to(pos + 1);
                line.truncate(pos);
                if !is_blank(&line) {
                    return Poll::Ready(Some(Ok(line.freeze())));
                }
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    let remaining = this.buffer.split().freeze();
                    if !is_blank(&remaining) {
                        return Poll::Ready(Some(Ok(remaining)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::convert::Infallible;

    fn chunks_to_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    async fn lines(chunks: Vec<&'static [u8]>) -> Vec<Bytes> {
        NdjsonStream::new(chunks_to_stream(chunks))
            .map(|line| line.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_complete_line_passes_through() {
        let lines = lines(vec![b"{\"status\":\"success\"}\n".as_slice()]).await;
        assert_eq!(lines, vec![Bytes::from_static(b"{\"status\":\"success\"}")]);
    }

    #[tokio::test]
    async fn test_split_line_is_buffered() {
        let lines = lines(vec![
            b"{\"response\":\"hel".as_slice(),
            b"lo\",\"done\":false}\n".as_slice(),
        ])
        .await;
        assert_eq!(
            lines,
            vec![Bytes::from_static(b"{\"response\":\"hello\",\"done\":false}")]
        );
    }

    #[tokio::test]
    async fn test_multiple_lines_across_chunks() {
        let lines = lines(vec![
            b"{\"n\":1}\n{\"n\"".as_slice(),
            b":2}\n{\"n\":3}\n".as_slice(),
        ])
        .await;
        assert_eq!(
            lines,
            vec![
                Bytes::from_static(b"{\"n\":1}"),
                Bytes::from_static(b"{\"n\":2}"),
                Bytes::from_static(b"{\"n\":3}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_flushed() {
        let lines = lines(vec![b"{\"done\":true}".as_slice()]).await;
        assert_eq!(lines, vec![Bytes::from_static(b"{\"done\":true}")]);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let lines = lines(vec![b"\n{\"n\":1}\n\r\n\n".as_slice(), b"  ".as_slice()]).await;
        assert_eq!(lines, vec![Bytes::from_static(b"{\"n\":1}")]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        assert!(lines(vec![]).await.is_empty());
    }
}
