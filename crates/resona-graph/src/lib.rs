//! resona-graph: dataflow kernel for the Resona binaural renderer
//!
//! Processing nodes expose named, typed *exit points* (publishers) and
//! *entry points* (subscribers). A `GraphManager` owns the nodes, drives
//! one frame at a time by ticking every source node, and cascades each
//! published packet synchronously to its subscribers in attach order.
//! Per-frame barriers make a node execute only once all of its expected
//! inputs have arrived, and a manager-wide command channel broadcasts
//! JSON commands to every node between frames.

mod barrier;
mod command;
mod manager;
mod node;
mod port;

pub use barrier::{WaitingItem, WaitingList};
pub use command::Command;
pub use manager::{GraphManager, GraphState, NodeId};
pub use node::{DspNode, NodeContext, NodeSpec};
pub use port::{service_ref, EntryPoint, ExitPoint, PortKind, PortValue, ServiceRef};
