//! Streaming body helpers shared by the client (`Dispatch`) and server
//! (`BindDispatch`) sides of [`crate::transport::NatsTransport`].
//!
//! Bodies cross the bus as a sequence of `BodyChunkFrame`s published to a
//! dedicated subject. The writer side re-chunks whatever sizes its input
//! stream happens to produce into fixed `chunk_size` pieces (mirroring the
//! fixed-size read buffer the rest of this protocol was ported from); the
//! reader side decodes chunks back into a [`BodyStream`] as they arrive.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use zephyr_kernel::error::{BodyError, TransportError, WireError};
use zephyr_kernel::transport::BodyStream;
use zephyr_kernel::wire::{self, BodyChunkFrame};

/// Drain `body`, splitting it into `chunk_size`-sized `BodyChunkFrame`s
/// published to `subject`. If the stream yields an error, the error is
/// carried on the terminal chunk and any bytes already buffered are still
/// flushed first.
pub async fn publish_body_stream(
    client: &async_nats::Client,
    subject: &str,
    chunk_size: usize,
    mut body: BodyStream,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::new();
    let mut index: u64 = 0;

    while let Some(item) = body.next().await {
        match item {
            Ok(bytes) => {
                buf.extend_from_slice(&bytes);
                while buf.len() >= chunk_size {
                    let chunk = buf.split_to(chunk_size);
                    publish_chunk(client, subject, index, chunk.to_vec(), false, None).await?;
                    index += 1;
                }
            }
            Err(err) => {
                if !buf.is_empty() {
                    publish_chunk(client, subject, index, buf.to_vec(), false, None).await?;
                    index += 1;
                }
                publish_chunk(client, subject, index, Vec::new(), true, Some(err.to_string()))
                    .await?;
                return Ok(());
            }
        }
    }

    if !buf.is_empty() {
        publish_chunk(client, subject, index, buf.to_vec(), false, None).await?;
        index += 1;
    }
    publish_chunk(client, subject, index, Vec::new(), true, None).await
}

async fn publish_chunk(
    client: &async_nats::Client,
    subject: &str,
    index: u64,
    data: Vec<u8>,
    done: bool,
    error: Option<String>,
) -> Result<(), TransportError> {
    let frame = BodyChunkFrame {
        index,
        data,
        done,
        error,
    };
    let bytes = wire::encode(&frame).map_err(TransportError::Wire)?;
    client
        .publish(subject.to_string(), bytes.into())
        .await
        .map_err(|source| TransportError::Publish {
            subject: subject.to_string(),
            source: Box::new(source),
        })
}

/// Subscribe-and-decode the reverse direction: turn a subject carrying
/// `BodyChunkFrame`s into a [`BodyStream`].
///
/// Spawns a background task that owns the subscription for as long as the
/// returned stream is polled; dropping the stream before it completes
/// leaves the task to exit on its next timeout or `None` poll.
pub fn body_stream_from_subject(
    mut subscriber: async_nats::Subscriber,
    timeout: Duration,
    subject_for_errors: String,
) -> BodyStream {
    let (tx, rx) = tokio::sync::mpsc::channel(8);

    tokio::spawn(async move {
        loop {
            let next = tokio::time::timeout(timeout, subscriber.next()).await;
            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    let _ = tx
                        .send(Err(BodyError::Transport(format!(
                            "timed out waiting for a body chunk on '{subject_for_errors}'"
                        ))))
                        .await;
                    break;
                }
            };

            let chunk: BodyChunkFrame = match wire::decode(&message.payload) {
                Ok(chunk) => chunk,
                Err(WireError::Decode(err)) => {
                    let _ = tx
                        .send(Err(BodyError::Transport(format!(
                            "malformed body chunk on '{subject_for_errors}': {err}"
                        ))))
                        .await;
                    break;
                }
                Err(err) => {
                    let _ = tx
                        .send(Err(BodyError::Transport(err.to_string())))
                        .await;
                    break;
                }
            };

            if !chunk.data.is_empty() && tx.send(Ok(Bytes::from(chunk.data))).await.is_err() {
                break;
            }

            if chunk.done {
                if let Some(message) = chunk.error {
                    let _ = tx.send(Err(BodyError::Handler(message))).await;
                }
                break;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
