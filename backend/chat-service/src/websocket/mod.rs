pub mod hub;
pub mod message_types;
pub mod session;
pub mod streams;
pub mod transport;

pub use hub::{Hub, HubConfig, HubError, Registration, SessionId};
pub use message_types::{ClientMessage, OutboundFrame, Presence, PresenceStatus, WsEnvelope};
pub use session::{Control, ReadPump, SessionGuard, WritePump, CONTROL_CAPACITY};
pub use streams::ChatListener;
pub use transport::{ActixSink, FrameSink, TransportError, WireFrame};
