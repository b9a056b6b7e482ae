//! Event types published by the engine to its host.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON (the terminal host prints them; a GUI host would
//! relay them over its own event bus).

pub mod events;
