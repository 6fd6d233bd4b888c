//! Wire types shared between the classdeck server and its endpoints.
//!
//! The realtime protocol is message-framed JSON: clients submit [`ClientOp`]
//! values and receive [`ServerEvent`] values. The session document types in
//! [`model`] double as the persisted representation.

mod model;
mod protocol;

pub use model::CodeLanguage;
pub use model::EndpointId;
pub use model::ExecutionRecord;
pub use model::InvalidSessionCode;
pub use model::ProgressLabel;
pub use model::SessionCode;
pub use model::SessionDoc;
pub use model::Slide;
pub use model::Student;
pub use model::Summary;
pub use model::generate_reconnect_token;
pub use protocol::ClientOp;
pub use protocol::CodeRestoreEvent;
pub use protocol::ErrorEvent;
pub use protocol::ExecutionResultEvent;
pub use protocol::ServerEvent;
pub use protocol::SessionDataEvent;
pub use protocol::SlideChangeEvent;
pub use protocol::StudentCodeUpdateEvent;
pub use protocol::StudentExecutionResultEvent;
pub use protocol::StudentSummaryUpdateEvent;
pub use protocol::UserJoinedEvent;
pub use protocol::UserLeftEvent;
