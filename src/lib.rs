//! Drive the `gpsbabel` command-line converter and read the GPX it produces.
//!
//! A [`GpsBabel`] session validates every action against the converter's own
//! capability tables before anything runs, renders the chain into an argument
//! vector and executes it, either to completion or in the background. GPX on
//! stdout is parsed into the typed entities in [`gpx_types`].
//!
//! ```no_run
//! use gpsbabel::{BabelConfig, GpsBabel};
//!
//! let mut babel = GpsBabel::discover(BabelConfig::default())?;
//! let output = babel.read("trip.kml", "kml", true, true, true, true)?;
//! let doc = output.into_document().unwrap_or_default();
//! println!("{} waypoints", doc.waypoints.len());
//! # Ok::<(), gpsbabel::Error>(())
//! ```

pub mod babel;
pub mod capabilities;
pub mod chain;
pub mod command;
pub mod error;
pub mod gpx_types;
pub mod options;
pub mod parser;
pub mod process;

pub use babel::{GpsBabel, PendingRun, RunOutput, RunResult};
pub use capabilities::{Capabilities, guess_format};
pub use chain::{Action, ActionChain, ActionKind, ActionOptions, action_options};
pub use command::GlobalFlags;
pub use error::{Error, Result};
pub use gpx_types::{FixType, GpxDocument, Route, Track, TrackSegment, Waypoint};
pub use options::BabelConfig;
pub use parser::{GpxParser, ParseState, parse_gpx};
pub use process::ProcessStatus;
