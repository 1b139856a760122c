//! Wire types shared between the Coordinator and the Agents.

mod game;
mod wire;

pub use game::{GameCommand, GameResult, GameRole, PlayAck};
pub use wire::{
    AgentMessage, AttestationView, CollectReceipt, DonationNotice, HealthView, RegisterRequest,
    RegisterResponse, TopupRequest,
};
