//! Well-known transport header names.

pub const TIME_SENT: &str = "TimeSent";
pub const PROCESSING_STARTED: &str = "ProcessingStarted";
pub const PROCESSING_ENDED: &str = "ProcessingEnded";

pub const ORIGINATING_ENDPOINT: &str = "OriginatingEndpoint";
pub const ORIGINATING_HOST_ID: &str = "OriginatingHostId";
pub const PROCESSING_ENDPOINT: &str = "ProcessingEndpoint";
pub const PROCESSING_HOST_ID: &str = "ProcessingHostId";

/// Semicolon-separated `sagaId:Status` change markers.
pub const SAGA_STATE_CHANGES: &str = "SagaStateChanges";

pub const CONVERSATION_ID: &str = "ConversationId";
pub const CORRELATION_ID: &str = "CorrelationId";
pub const RELATED_TO: &str = "RelatedTo";

/// Comma-separated fully-qualified message type names.
pub const ENCLOSED_MESSAGE_TYPES: &str = "EnclosedMessageTypes";
