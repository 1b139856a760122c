//! The periodic match loop.
//!
//! Every tick: re-rank the pool, pick two active agents uniformly at
//! random, probe both for liveness, flip one CSPRNG bit, dispatch the
//! winner first and the loser second, then settle the books and broadcast.
//! Only one tick is ever in flight - a tick that overruns the interval
//! simply delays the next one.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use super::events::event_types;
use super::state::{AgentStatus, CoordinatorState};
use crate::config::{self, GAME_STAKE, HEALTH_TIMEOUT_SECS, PLAY_TIMEOUT_SECS};
use crate::model::{GameCommand, GameRole, HealthView, PlayAck};

/// HTTP reach into an agent: the liveness probe and the `/play` dispatch.
/// A trait seam so the match loop is testable without sockets.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn health(&self, endpoint: &str) -> Result<HealthView, String>;

    /// POST a game command. `Ok` means the agent answered with a parseable
    /// ack (including `payment_failed`); `Err` means it was unreachable.
    async fn play(&self, endpoint: &str, command: &GameCommand) -> Result<PlayAck, String>;
}

pub struct HttpAgentTransport {
    client: reqwest::Client,
}

impl HttpAgentTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAgentTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn health(&self, endpoint: &str) -> Result<HealthView, String> {
        let resp = self
            .client
            .get(format!("{}/health", endpoint))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("health probe failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("health probe returned {}", resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| format!("health body invalid: {}", e))
    }

    async fn play(&self, endpoint: &str, command: &GameCommand) -> Result<PlayAck, String> {
        let resp = self
            .client
            .post(format!("{}/play", endpoint))
            .timeout(Duration::from_secs(PLAY_TIMEOUT_SECS))
            .json(command)
            .send()
            .await
            .map_err(|e| format!("play dispatch failed: {}", e))?;

        // A 500 with a parseable ack is an alive agent reporting a payment
        // failure, not a dead one
        resp.json()
            .await
            .map_err(|e| format!("play ack invalid: {}", e))
    }
}

/// Out-of-band check whether the VM behind an offline agent still exists;
/// when it does not, the agent is downgraded `offline -> deleted`.
#[async_trait]
pub trait VmInventory: Send + Sync {
    async fn exists(&self, agent_name: &str) -> bool;
}

/// No inventory configured: agents stay `offline` forever.
pub struct NoInventory;

#[async_trait]
impl VmInventory for NoInventory {
    async fn exists(&self, _agent_name: &str) -> bool {
        true
    }
}

/// Runs the configured shell command and looks for the agent name in its
/// output. Command failures count as "exists" - never delete on a flaky
/// inventory.
pub struct CommandVmInventory {
    command: String,
}

impl CommandVmInventory {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl VmInventory for CommandVmInventory {
    async fn exists(&self, agent_name: &str) -> bool {
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(agent_name),
            Err(e) => {
                log::warn!("[MATCH] VM inventory command failed: {}", e);
                true
            }
        }
    }
}

pub fn create_vm_inventory() -> Arc<dyn VmInventory> {
    match std::env::var(config::env_vars::VM_INVENTORY_CMD) {
        Ok(cmd) if !cmd.trim().is_empty() => Arc::new(CommandVmInventory::new(cmd)),
        _ => Arc::new(NoInventory),
    }
}

/// A contestant picked for this tick.
#[derive(Debug, Clone)]
struct Contestant {
    name: String,
    wallet: String,
    endpoint: String,
}

pub struct MatchRunner {
    state: Arc<CoordinatorState>,
    transport: Arc<dyn AgentTransport>,
    inventory: Arc<dyn VmInventory>,
    interval_ms: u64,
}

impl MatchRunner {
    pub fn new(
        state: Arc<CoordinatorState>,
        transport: Arc<dyn AgentTransport>,
        inventory: Arc<dyn VmInventory>,
        interval_ms: u64,
    ) -> Self {
        Self {
            state,
            transport,
            inventory,
            interval_ms,
        }
    }

    /// Run ticks forever. One tick at a time; overruns delay, never stack.
    pub async fn run(self: Arc<Self>) {
        log::info!("[MATCH] Match loop started (interval {}ms)", self.interval_ms);
        let mut ticker = interval(Duration::from_millis(self.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One pass: re-rank, pick, probe, flip, dispatch, settle.
    pub async fn tick(&self) {
        let changes = self.state.rerank();
        self.state.broadcast_rank_changes(&changes);

        let Some((a, b)) = self.pick_pair() else {
            log::debug!("[MATCH] Fewer than two active agents, skipping tick");
            return;
        };

        // Pre-flight: both must answer /health within the probe timeout
        let (health_a, health_b) =
            tokio::join!(self.transport.health(&a.endpoint), self.transport.health(&b.endpoint));
        let mut dead = false;
        if let Err(e) = health_a {
            log::warn!("[MATCH] {} failed liveness: {}", a.name, e);
            self.evict_offline(&a);
            dead = true;
        }
        if let Err(e) = health_b {
            log::warn!("[MATCH] {} failed liveness: {}", b.name, e);
            self.evict_offline(&b);
            dead = true;
        }
        if dead {
            return;
        }

        // The fairness contract: one unbiased CSPRNG bit, nothing else
        let a_wins: bool = OsRng.gen();
        let (winner, loser) = if a_wins { (a, b) } else { (b, a) };
        log::info!(
            "[MATCH] Coin flip: {} beats {} for {} base units",
            winner.name,
            loser.name,
            GAME_STAKE
        );

        self.run_match(&winner, &loser).await;
    }

    /// Run one match with a decided outcome, by wallet key. The coin flip
    /// in `tick` funnels through here; harness tests drive it directly.
    pub async fn run_match_between(&self, winner_wallet: &str, loser_wallet: &str) {
        let (winner, loser) = {
            let pool = self.state.pool.lock().expect("pool lock poisoned");
            let contestant = |wallet: &str| {
                pool.get(wallet).map(|r| Contestant {
                    name: r.name.clone(),
                    wallet: r.wallet_address.clone(),
                    endpoint: r.endpoint.clone(),
                })
            };
            match (contestant(winner_wallet), contestant(loser_wallet)) {
                (Some(w), Some(l)) => (w, l),
                _ => return,
            }
        };
        self.run_match(&winner, &loser).await;
    }

    /// Uniformly random pair of active agents, without replacement.
    fn pick_pair(&self) -> Option<(Contestant, Contestant)> {
        let pool = self.state.pool.lock().expect("pool lock poisoned");
        let active: Vec<Contestant> = pool
            .values()
            .filter(|r| r.status == AgentStatus::Active)
            .map(|r| Contestant {
                name: r.name.clone(),
                wallet: r.wallet_address.clone(),
                endpoint: r.endpoint.clone(),
            })
            .collect();
        if active.len() < 2 {
            return None;
        }
        let picked = rand::seq::index::sample(&mut OsRng, active.len(), 2);
        Some((active[picked.index(0)].clone(), active[picked.index(1)].clone()))
    }

    /// Dispatch winner first (so it is ready to collect), then loser, then
    /// settle. Winner unreachable aborts the match entirely; loser
    /// unreachable still records the result.
    async fn run_match(&self, winner: &Contestant, loser: &Contestant) {
        let game_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        let winner_command = GameCommand {
            game_id: game_id.clone(),
            role: GameRole::Winner,
            opponent_name: loser.name.clone(),
            opponent_endpoint: loser.endpoint.clone(),
            opponent_wallet: loser.wallet.clone(),
            stake_amount: GAME_STAKE,
            timestamp: now,
        };

        match self.transport.play(&winner.endpoint, &winner_command).await {
            Ok(ack) if ack.status == "acknowledged" => {}
            Ok(ack) => {
                log::warn!(
                    "[MATCH] Winner {} gave unexpected ack '{}', aborting match",
                    winner.name,
                    ack.status
                );
                self.evict_offline(winner);
                return;
            }
            Err(e) => {
                log::warn!("[MATCH] Winner {} unreachable ({}), aborting match", winner.name, e);
                self.evict_offline(winner);
                return;
            }
        }

        let loser_command = GameCommand {
            game_id: game_id.clone(),
            role: GameRole::Loser,
            opponent_name: winner.name.clone(),
            opponent_endpoint: winner.endpoint.clone(),
            opponent_wallet: winner.wallet.clone(),
            stake_amount: GAME_STAKE,
            timestamp: now,
        };

        let tx_signature = match self.transport.play(&loser.endpoint, &loser_command).await {
            Ok(ack) => {
                if ack.status == "payment_failed" {
                    // The result stands; reconciliation is out of scope
                    log::warn!(
                        "[MATCH] Loser {} reported payment failure: {:?}",
                        loser.name,
                        ack.error
                    );
                }
                ack.tx_signature
            }
            Err(e) => {
                log::warn!(
                    "[MATCH] Loser {} unreachable after winner ack ({}), recording anyway",
                    loser.name,
                    e
                );
                self.evict_offline(loser);
                None
            }
        };

        let Some(result) =
            self.state
                .apply_game_result(&game_id, &winner.wallet, &loser.wallet, tx_signature)
        else {
            log::warn!("[MATCH] Game {} dropped: a party left the pool", game_id);
            return;
        };

        log::info!(
            "[MATCH] Game {}: {} beat {} ({:?})",
            result.game_id,
            result.winner,
            result.loser,
            result.tx_signature
        );
        self.state
            .events
            .broadcast(event_types::GAME_RESULT, serde_json::json!(result));
    }

    /// Mark a contestant offline, broadcast the eviction, and kick off the
    /// async inventory check that may downgrade it to deleted.
    fn evict_offline(&self, contestant: &Contestant) {
        if !self.state.mark_offline(&contestant.wallet) {
            return;
        }
        self.state.events.broadcast(
            event_types::AGENT_EVICTED,
            serde_json::json!({
                "agentName": contestant.name,
                "walletAddress": contestant.wallet,
                "status": AgentStatus::Offline,
            }),
        );

        let state = self.state.clone();
        let inventory = self.inventory.clone();
        let name = contestant.name.clone();
        let wallet = contestant.wallet.clone();
        tokio::spawn(async move {
            if !inventory.exists(&name).await {
                state.mark_deleted(&wallet);
            }
        });
    }
}
