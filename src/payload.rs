use derive_more::Display;

/// Kind of a [`StreamPayload`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// A full flag configuration snapshot.
    #[display(fmt = "DATA")]
    Data,
    /// Notice that the connection failed and the connector is reconnecting.
    #[display(fmt = "ERROR")]
    Error,
}

/// A payload handed to consumers of the sync stream.
///
/// Payloads are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPayload {
    kind: PayloadType,
    content: String,
}

impl StreamPayload {
    /// Create a payload carrying a full flag configuration.
    pub fn data(content: impl Into<String>) -> StreamPayload {
        StreamPayload {
            kind: PayloadType::Data,
            content: content.into(),
        }
    }

    /// Create an error notice with a human-readable `message`.
    pub fn error(message: impl Into<String>) -> StreamPayload {
        StreamPayload {
            kind: PayloadType::Error,
            content: message.into(),
        }
    }

    /// Kind of the payload.
    pub fn kind(&self) -> PayloadType {
        self.kind
    }

    /// Flag configuration for [`PayloadType::Data`], or the error notice for
    /// [`PayloadType::Error`].
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume the payload, returning its content.
    pub fn into_content(self) -> String {
        self.content
    }
}
