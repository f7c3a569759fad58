//! Stream supervision.
//!
//! One worker thread per camera runs the capture → sample → recognize → dedup →
//! notify loop and survives feed interruptions. The registry enforces a single
//! running worker per camera id and is the only state shared across workers.

mod callback;
mod config;
mod dedup;
mod registry;
mod sampler;
mod stop;
mod worker;

pub use callback::{
    CallbackDispatcher, CallbackPayload, CallbackSink, DeliveryOutcome, UreqSink,
    API_SECRET_HEADER, DEFAULT_CALLBACK_TIMEOUT,
};
pub use config::{StreamConfig, DEFAULT_FRAME_INTERVAL};
pub use dedup::{Clock, Deduplicator, ManualClock, SystemClock, DEDUP_WINDOW};
pub use registry::{StreamRegistry, StreamStatus};
pub use sampler::FrameSampler;
pub use stop::StopToken;
pub use worker::{
    Collaborators, FrameOutcome, WorkerExit, WorkerSettings, WorkerState,
    DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_BACKOFF, DEFAULT_STOP_TIMEOUT,
};
