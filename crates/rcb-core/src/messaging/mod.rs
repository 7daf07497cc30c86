//! Messenger abstractions: outbound port and the reply waiter used by
//! multi-step conversations.

pub mod port;
pub mod replies;
pub mod types;
