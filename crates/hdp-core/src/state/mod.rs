//! Response state machine.

pub mod handlers;
pub mod machine;

pub use handlers::handle;
pub use machine::{Action, SessionState, Transition};
