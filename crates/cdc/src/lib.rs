mod apply;
mod checkpoint;
mod event;
mod position;
mod source;
mod transform;

pub use apply::{Applier, ApplyOptions};
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use event::{data_columns, parse_event, CdcEvent, CdcOperation, METADATA_FIELDS};
pub use position::{PositionKind, PositionToken};
pub use source::{CdcSource, SourceConfig, SourceState};
pub use transform::{
    apply_transformations, TransformRule, TransformationService, TransformationType,
};
