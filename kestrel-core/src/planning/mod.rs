//! Encoding plan construction: path routing and source segmentation.

pub mod router;
pub mod segmenter;

pub use router::{route, EncodingPlan, PlanMode};
pub use segmenter::{build_chunk_plan, ChunkPlan, Segment};
