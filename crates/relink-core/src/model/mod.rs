//! Data model shared by every engine component.

pub mod edge;
pub mod entity;
pub mod stage;

pub use edge::{ArchivedEdge, Edge, EdgeKind, EdgeMetadata, NewEdge};
pub use entity::{EdgeId, EntityId, EntitySide, GroupId, InvalidEntityId, Side};
pub use stage::{ParseStageError, Stage};
