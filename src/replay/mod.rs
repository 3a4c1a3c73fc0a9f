//! Replay buffering
//!
//! While a replay session runs, every encoded packet lands in a
//! [`ReplayBuffer`] that keeps the last `buffer_second` seconds. Capturing a
//! replay copies a window of it into a file and can keep following the
//! buffer forward until stopped.

mod capture;
mod ring;

pub use capture::{ActiveReplay, ReplayCallback};
pub(crate) use capture::{spawn_capture, CallbackSlot, ReplayControl, ReplayOutcome, ReplayRequest};
pub use ring::{ReplayBuffer, ReplaySlice};
