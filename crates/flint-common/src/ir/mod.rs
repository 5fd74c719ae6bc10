pub use block::{Block, BlockId};
pub use dom::{reverse_postorder, DomTree};
pub use frame::{EntityId, FrameEntity, FrameLayout};
pub use graph::{Graph, Use};
pub use info::{NodeFlags, NodeInfo};
pub use node::{Mode, Node, NodeId, Op};
pub use schedule::Schedule;

mod block;
mod dom;
mod frame;
mod graph;
mod info;
mod node;
mod schedule;
