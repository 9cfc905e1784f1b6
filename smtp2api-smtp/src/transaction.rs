//! The seam between the SMTP protocol and whatever consumes the accepted mail.

use std::borrow::Cow;

use async_trait::async_trait;
use smtp2api_common::{envelope::Envelope, status::Status};

/// A single line SMTP reply, without the trailing CRLF
pub type Reply = (Status, Cow<'static, str>);

/// Receives each message once its data has been fully read.
///
/// The session replies to the client with whatever [`handle`](Self::handle)
/// returns. The call runs in its own task, so it is not cancelled when the
/// client goes away mid-dispatch.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    /// `data` is the dot-unstuffed message without the terminating `.` line
    async fn handle(&self, data: Vec<u8>, envelope: Envelope) -> Reply;
}
