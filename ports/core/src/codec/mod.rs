//! Codec Seam
//!
//! Protocol ports do not know any message format. They are handed:
//! - a [`ParserFactory`] that builds the parsers for each new connection
//!   (every parser sees every inbound byte)
//! - an ordered list of [`RouteFilter`]s consulted for every inbound and
//!   outbound message
//!
//! Outbound messages serialize themselves through [`ProtocolMessage::encode`].
//!
//! A length-prefixed JSON frame codec ships in [`frame`] as the default.

pub mod frame;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::CodecError;

pub use frame::{FrameMessage, FrameParser, FRAME_PROTOCOL};

/// A decoded or outbound protocol message
pub trait ProtocolMessage: fmt::Debug + Send + Sync + 'static {
    /// Protocol family (`frame`, ...)
    fn protocol(&self) -> &str;

    /// Message name, used in logs
    fn name(&self) -> &str;

    /// Serialize onto `out`
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` when the message cannot be represented on the
    /// wire.
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Downcast support for typed consumers
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a message; messages are immutable once built
pub type MessageRef = Arc<dyn ProtocolMessage>;

/// Streaming decoder for one protocol on one connection
pub trait MessageParser: Send {
    /// Protocol family this parser decodes
    fn protocol(&self) -> &str;

    /// Append inbound bytes
    fn push(&mut self, data: &[u8]);

    /// Try to decode the next message
    ///
    /// `Ok(None)` means more bytes are needed. After an error the parser must
    /// have skipped past the bad input so that decoding can continue.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` for corrupted or oversized input.
    fn decode(&mut self) -> Result<Option<MessageRef>, CodecError>;
}

/// Builds the parsers of a new connection
pub trait ParserFactory: Send + Sync {
    /// One or more fresh parsers
    fn create(&self) -> Vec<Box<dyn MessageParser>>;
}

impl<F> ParserFactory for F
where
    F: Fn() -> Vec<Box<dyn MessageParser>> + Send + Sync,
{
    fn create(&self) -> Vec<Box<dyn MessageParser>> {
        self()
    }
}

/// Inspects, rewrites or drops messages crossing a connection
///
/// Both directions default to pass-through. Returning `None` drops the
/// message and stops the rest of the chain.
pub trait RouteFilter: Send + Sync {
    /// Filter name, used in logs
    fn name(&self) -> &str;

    /// Called for every decoded inbound message
    fn inbound(&self, _connection: &str, message: MessageRef) -> Option<MessageRef> {
        Some(message)
    }

    /// Called for every message about to be sent
    fn outbound(&self, _connection: &str, message: MessageRef) -> Option<MessageRef> {
        Some(message)
    }
}

/// Direction a filter chain is applied in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Peer to port
    Inbound,
    /// Port to peer
    Outbound,
}

/// Run `message` through `filters` in order
///
/// Returns `None` as soon as one filter drops it.
#[must_use]
pub fn apply_filters(
    filters: &[Arc<dyn RouteFilter>],
    direction: Direction,
    connection: &str,
    message: MessageRef,
) -> Option<MessageRef> {
    filters.iter().try_fold(message, |message, filter| {
        let out = match direction {
            Direction::Inbound => filter.inbound(connection, message),
            Direction::Outbound => filter.outbound(connection, message),
        };
        if out.is_none() {
            tracing::trace!(
                filter = filter.name(),
                connection,
                ?direction,
                "Message dropped by route filter"
            );
        }
        out
    })
}
