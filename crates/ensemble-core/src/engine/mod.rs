//! Audio engine: stem graph, transport, effects rack, and the lock-free
//! command/event plumbing between the control and audio threads.

mod command;
mod controller;
#[allow(clippy::module_inception)]
mod engine;
pub mod gc;
mod graph;
mod transport;

pub use command::{
    command_channel, event_channel, CommandSender, EngineCommand, EngineEvent, EventReceiver,
};
pub use controller::{PlaybackController, PlaybackEvent};
pub use engine::PlayerEngine;
pub use graph::{compute_audibility, LaneInit, StemGraph, StemUserState, GAIN_MAX};
pub use transport::{LoopRegion, Transport, TransportAtomics};
