//! Transport seam between sessions and the completion backend.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::errors::ConnectError;
use crate::request::CompletionRequest;

/// Raw byte stream of a streaming completion response.
///
/// Chunk boundaries carry no meaning; the event decoder reassembles frames
/// from whatever the transport delivers.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ConnectError>> + Send + 'static>>;

/// Opens streaming completion responses.
///
/// Sessions hold the connector behind `Arc<dyn Connector>`, so tests swap in
/// scripted byte streams without touching the network.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Starts one streaming completion and returns its response bytes.
    ///
    /// An error here means the stream never started; failures after the
    /// stream is open surface as `Err` items on the returned stream.
    async fn connect(&self, request: &CompletionRequest) -> Result<ByteStream, ConnectError>;
}
