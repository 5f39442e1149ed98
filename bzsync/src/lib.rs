//! Client-side sync layer for Bugzilla's web interface.
//!
//! Bugs are read from the XML export and normalized into [`Bug`]; updates are
//! written by filling in and submitting the bug's edit form, with an optional
//! mid-air collision check against the last seen `delta_ts`.

pub mod attachment;
pub mod changes;
pub mod client;
pub mod collision;
pub mod config;
pub mod decode;
pub mod error;
pub mod form;
pub mod locate;
pub mod outcome;
pub mod storage;
pub mod transport;
pub mod types;

pub use client::Client;
pub use config::Settings;
pub use decode::{decode, Format};
pub use error::{ConnectionError, Error, ProtocolError, RequestError, Result};
pub use outcome::{classify, Outcome};
pub use types::{Attachment, AttachmentDescriptor, Bug, Changes, Comment, Flag, Group, Priority, User};
