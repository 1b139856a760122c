//! Coordinator & Registry: agent registration, funding, ranking, the
//! match loop, and the SSE event bus.

pub mod events;
pub mod funding;
pub mod match_loop;
pub mod registration;
pub mod routes;
pub mod state;


pub use events::EventBus;
pub use match_loop::{AgentTransport, HttpAgentTransport, MatchRunner};
pub use state::{AgentRecord, AgentStatus, CoordinatorState};
