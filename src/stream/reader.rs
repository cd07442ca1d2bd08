use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::stream::cancel::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("failed to read response body: {0}")]
    Read(String),
}

/// Raw response body, one item per network read.
pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Decoded text in read order. Ends after the source closes, after the first
/// read error, or as soon as the reader is cancelled.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

pub struct ConvertedStream {
    pub output: TextStream,
    pub cancel: CancellationToken,
}

pub fn convert(source: ByteSource) -> ConvertedStream {
    let cancel = CancellationToken::new();
    let output = Box::pin(read_loop(source, cancel.clone()));
    ConvertedStream { output, cancel }
}

fn read_loop(
    mut source: ByteSource,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, StreamError>> + Send {
    async_stream::stream! {
        let mut decoder = Utf8Decoder::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("byte stream reader cancelled");
                    break;
                }
                next = source.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Some(Err(err)) => {
                    log::error!("byte stream read failed: {}", err);
                    yield Err(err);
                    break;
                }
                None => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        yield Ok(tail);
                    }
                    break;
                }
            }
        }
        drop(source);
    }
}

// ============================================================================
// UTF-8 decoding across read boundaries
// ============================================================================

/// Holds back the bytes of a character split between two reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    fn source(items: Vec<Result<&'static str, StreamError>>) -> ByteSource {
        Box::pin(stream::iter(
            items
                .into_iter()
                .map(|item| item.map(|text| Bytes::from_static(text.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn test_emits_text_in_read_order() {
        let ConvertedStream { output, .. } =
            convert(source(vec![Ok("one "), Ok("two "), Ok("three")]));
        let texts: Vec<_> = output.collect().await;
        assert_eq!(
            texts,
            vec![Ok("one ".to_string()), Ok("two ".to_string()), Ok("three".to_string())]
        );
    }

    #[tokio::test]
    async fn test_multibyte_character_split_between_reads() {
        let bytes = "héllo".as_bytes();
        let ConvertedStream { output, .. } = convert(Box::pin(stream::iter(vec![
            Ok::<_, StreamError>(Bytes::copy_from_slice(&bytes[..2])),
            Ok(Bytes::copy_from_slice(&bytes[2..])),
        ])));
        let text: String = output.map(|t| t.unwrap()).collect::<Vec<_>>().await.concat();
        assert_eq!(text, "héllo");
    }

    #[tokio::test]
    async fn test_read_error_ends_output() {
        let ConvertedStream { output, .. } = convert(source(vec![
            Ok("before"),
            Err(StreamError::Read("connection reset".into())),
            Ok("after"),
        ]));
        let items: Vec<_> = output.collect().await;
        assert_eq!(
            items,
            vec![
                Ok("before".to_string()),
                Err(StreamError::Read("connection reset".into())),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_while_read_is_pending() {
        let ConvertedStream { mut output, cancel } =
            convert(Box::pin(stream::pending::<Result<Bytes, StreamError>>()));
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let next = tokio::time::timeout(Duration::from_secs(1), output.next())
            .await
            .expect("cancel must end the output");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_cancel_twice_and_after_completion() {
        let ConvertedStream { mut output, cancel } = convert(source(vec![Ok("done")]));
        assert_eq!(output.next().await, Some(Ok("done".to_string())));
        assert_eq!(output.next().await, None);

        cancel.cancel();
        cancel.cancel();
        assert_eq!(output.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_before_first_read() {
        let ConvertedStream { mut output, cancel } = convert(source(vec![Ok("never")]));
        cancel.cancel();
        cancel.cancel();
        assert_eq!(output.next().await, None);
        assert_eq!(output.next().await, None);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(&[0xe2, 0x82]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
