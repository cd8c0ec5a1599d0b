pub mod result;
pub mod state;

pub use result::{
    AnalysisResult, DiagnosticCommand, DocReference, Issue, PartialAnalysis, ResultMetadata,
    Severity,
};
pub use state::{
    content_digest, Category, Chunk, ChunkId, ChunkOutcome, Feature, InteractiveRecord,
    MemoryRecord, RunFailure, RunId, RunPhase, RunState, ValidationStatus,
};
