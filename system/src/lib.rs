mod audio;
mod canvas;
mod error;
mod message;
mod session;
mod types;
mod undo_redo;

pub use audio::*;
pub use canvas::*;
pub use error::*;
pub use message::*;
pub use session::*;
pub use types::*;
pub use undo_redo::*;

pub extern crate serde_json;
