//! Client core for drift: the session lifecycle state machine, the
//! signaling channel it searches over, the narrow media-transport contract
//! it drives, and the fallback simulator that stands in for the pier when
//! signaling is unreachable.

pub mod cli;
pub mod config;
pub mod media;
pub mod prefs;
pub mod session;
pub mod signaling;
