//! Administrative control surface
//!
//! - [`command`] - Command model, keyword table and text parser
//! - [`surface`] - Authorization, execution and replies
//! - [`error`] - Validation and execution errors

pub mod command;
pub mod error;
pub mod surface;

pub use command::{parse, Command, CommandEntry, CommandTag, Mutation, Query, Transfer, COMMANDS};
pub use error::{ControlError, ControlResult, ValidationError};
pub use surface::{apply, ControlSurface, AUTO_REPLY, DEFAULT_IMPORT_TIMEOUT};
