//! `spindle-middleware` – The Network Edge
//!
//! Moves bytes between the controller and the outside world without knowing
//! how a command is carried out.
//!
//! # Modules
//!
//! - [`cipher`] – [`CommandToken`] wire parsing and the [`Cipher`] trait
//!   for the decryption collaborator, plus the shipped [`ShiftCipher`].
//! - [`command`] – [`CommandListener`]: UDP intake loop that decodes,
//!   validates and dispatches one datagram at a time to a
//!   [`CommandHandler`].
//! - [`feedback`] – [`FeedbackPublisher`]: long-lived WebSocket client that
//!   authenticates once and streams the current angle at a fixed rate,
//!   reconnecting on any failure.

pub mod cipher;
pub mod command;
pub mod feedback;

pub use cipher::{Cipher, CommandToken, ShiftCipher};
pub use command::{CommandHandler, CommandListener, Outcome};
pub use feedback::{FeedbackPublisher, FeedbackSettings};
