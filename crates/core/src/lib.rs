//! Core types for the mesh provisioning client: the `Event`/`Action`
//! boundary between the deterministic client and its runners.

mod action;
mod event;
mod message;
mod notification;
mod request;
mod timer;
mod traits;

pub use action::{Action, ConnectTarget};
pub use event::Event;
pub use message::{OutboundMessage, SecurityKey};
pub use notification::{
    ComponentInfo, ElementInfo, NodeConnectState, Notification, ProvisionState,
};
pub use request::RequestId;
pub use timer::TimerId;
pub use traits::StateMachine;
