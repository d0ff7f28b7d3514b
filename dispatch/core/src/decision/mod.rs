//! Agent Decisions
//!
//! Turns batches of agent observations into decisions with as few backend
//! calls as possible.
//!
//! ```text
//! observations ──► fingerprint ──► DecisionCache ──hit──► decision
//!                                       │ miss
//!                                       ▼
//!                      PromptBuilder ──► Router ──► parse_reply ──► cache
//! ```

pub mod batch;
pub mod cache;
pub mod fingerprint;
pub mod observation;
pub mod prompt;

pub use batch::{BatchAggregator, BatchConfig, BatchError, BatchStats, DEFAULT_CALL_TIMEOUT};
pub use cache::{CacheStats, DecisionCache, DEFAULT_MAX_SIZE, DEFAULT_TTL};
pub use fingerprint::{FingerprintPolicy, DEFAULT_GRID_SIZE};
pub use observation::{
    validate_batch, BatchResult, Decision, Observation, ObservationError, PointOfInterest,
    VisiblePeer, DEFAULT_ACTION, DEFAULT_REASON,
};
pub use prompt::{parse_reply, ActionSpec, ActionVocabulary, ParsedReply, PromptBuilder};
