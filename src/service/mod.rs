pub mod chat_controller;
pub mod events;

pub use chat_controller::{ChatController, ControllerState, InitMode, Turn, TurnStep};
pub use events::{apply_event, TurnFlow, TurnOutcome};
