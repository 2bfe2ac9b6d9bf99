//! prwatch Agent - the tool surface the LLM client drives
//!
//! Three operations addressed by a monitor identifier: `start`,
//! `next_step`, and `stop`. The registry, the heartbeat, and the
//! auto-execute loop live here; everything deterministic below them lives
//! in `prwatch-core`.

pub mod heartbeat;
pub mod registry;
pub mod tools;

pub use heartbeat::{Heartbeat, ProgressSink, TracingSink};
pub use registry::{monitor_id, MonitorRegistry};
pub use tools::{NextStepParams, StartParams, ToolSurface};
