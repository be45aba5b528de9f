//! Postcard codec for length-delimited framing with serde serialization
//!
//! [`PostcardCodec`] turns any byte stream into a stream of protocol values:
//! each frame is a 4-byte big-endian length followed by the postcard encoding.

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::messages::Envelope;

/// Largest accepted frame.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Codec for peer-to-peer traffic.
pub type EnvelopeCodec = PostcardCodec<Envelope>;

/// Length-delimited framing plus postcard serialization.
///
/// ```ignore
/// use tokio_util::codec::Framed;
/// use multipaxos::codec::EnvelopeCodec;
///
/// let framed = Framed::new(tcp_stream, EnvelopeCodec::new());
/// let (sink, stream) = framed.split();
/// ```
#[derive(Debug)]
pub struct PostcardCodec<T> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<T>,
}

impl<T> Clone for PostcardCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Default for PostcardCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PostcardCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Decoder for PostcardCodec<T>
where
    T: for<'de> Deserialize<'de>,
{
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        postcard::from_bytes(&frame)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T> Encoder<T> for PostcardCodec<T>
where
    T: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = postcard::to_allocvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(bytes), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::ballot::{Ballot, PeerId};
    use crate::messages::Message;

    fn promise() -> Envelope {
        Envelope::new(
            PeerId::new("a1"),
            Message::Promise {
                round: 3,
                ballot: Ballot::new(9, "p1"),
                accepted: Some((Ballot::new(4, "p2"), Bytes::from_static(b"value"))),
                later_accepted: Some(5),
            },
        )
    }

    #[tokio::test]
    async fn test_envelopes_cross_a_byte_stream() {
        let (left, right) = tokio::io::duplex(1024);
        let mut writer = Framed::new(left, EnvelopeCodec::new());
        let mut reader = Framed::new(right, EnvelopeCodec::new());

        let nack = Envelope::new(
            PeerId::new("a2"),
            Message::Nack {
                round: 3,
                ballot: Ballot::new(10, "p3"),
            },
        );
        writer.send(promise()).await.unwrap();
        writer.send(nack.clone()).await.unwrap();

        assert_eq!(reader.next().await.unwrap().unwrap(), promise());
        assert_eq!(reader.next().await.unwrap().unwrap(), nack);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = EnvelopeCodec::new();
        let mut full = BytesMut::new();
        codec.encode(promise(), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(full);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(promise()));
    }

    #[test]
    fn test_garbage_frame_is_invalid_data() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        LengthDelimitedCodec::new()
            .encode(Bytes::from_static(&[0xff, 0xff, 0xff]), &mut buf)
            .unwrap();
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
