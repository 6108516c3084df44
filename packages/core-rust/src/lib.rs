//! `opdispatch` core: execution identity, opaque task token codec, and
//! operation history event schema.

pub mod clock;
pub mod history;
pub mod identity;
pub mod token;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use history::{EventAttributes, EventType, HistoryEvent, OperationFailure};
pub use identity::{EndpointTarget, ExecutionId};
pub use token::{TaskToken, TokenError};
