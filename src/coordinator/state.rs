//! Authoritative in-memory registry.
//!
//! The pool is a map keyed by wallet address behind one coarse mutex -
//! write rates are O(1/min), so contention is a non-issue and every
//! handler sees a consistent snapshot. Never hold the lock across an
//! await point.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::events::{event_types, EventBus};
use crate::chain::ChainClient;
use crate::config::{self, GAME_STAKE, MIN_STAKE};
use crate::identity::BirthCertificate;
use crate::model::GameResult;
use crate::tee::TeeProvider;
use crate::verifier::AttestationVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Benched,
    Broke,
    Offline,
    Deleted,
}

/// Mutable record the Coordinator keeps per admitted agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub name: String,
    pub wallet_address: String,
    pub endpoint: String,
    pub birth_cert: BirthCertificate,
    /// ms since epoch
    pub registered_at: i64,
    /// USDC base units
    pub balance: u64,
    pub wins: u32,
    pub losses: u32,
    /// >0 win streak, <0 loss streak
    pub current_streak: i64,
    /// longest win streak seen
    pub longest_streak: i64,
    /// USDC base units
    pub total_donations: u64,
    pub status: AgentStatus,
}

impl AgentRecord {
    pub fn new(
        birth_cert: BirthCertificate,
        endpoint: String,
        balance: u64,
    ) -> Self {
        Self {
            name: birth_cert.agent_name.clone(),
            wallet_address: birth_cert.wallet_address.clone(),
            endpoint,
            birth_cert,
            registered_at: chrono::Utc::now().timestamp_millis(),
            balance,
            wins: 0,
            losses: 0,
            current_streak: 0,
            longest_streak: 0,
            total_donations: 0,
            status: AgentStatus::Active,
        }
    }

    pub fn record_win(&mut self, stake: u64) {
        self.wins += 1;
        self.balance += stake;
        self.current_streak = if self.current_streak >= 0 {
            self.current_streak + 1
        } else {
            1
        };
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }

    pub fn record_loss(&mut self, stake: u64) {
        self.losses += 1;
        self.balance = self.balance.saturating_sub(stake);
        self.current_streak = if self.current_streak <= 0 {
            self.current_streak - 1
        } else {
            -1
        };
    }

    pub fn in_play(&self) -> bool {
        !matches!(self.status, AgentStatus::Offline | AgentStatus::Deleted)
    }

    pub fn view(&self) -> AgentView {
        AgentView {
            agent_name: self.name.clone(),
            wallet_address: self.wallet_address.clone(),
            endpoint: self.endpoint.clone(),
            registered_at: self.registered_at,
            balance: config::to_ui_amount(self.balance),
            wins: self.wins,
            losses: self.losses,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            total_donations: config::to_ui_amount(self.total_donations),
            status: self.status,
        }
    }
}

/// JSON view of an agent (balances in UI units).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub agent_name: String,
    pub wallet_address: String,
    pub endpoint: String,
    pub registered_at: i64,
    pub balance: f64,
    pub wins: u32,
    pub losses: u32,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub total_donations: f64,
    pub status: AgentStatus,
}

/// One status transition produced by a re-rank pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankChange {
    pub name: String,
    pub wallet_address: String,
    pub from: AgentStatus,
    pub to: AgentStatus,
}

pub struct CoordinatorState {
    pub pool: Mutex<HashMap<String, AgentRecord>>,
    pub funded_wallets: Mutex<HashSet<String>>,
    pub games: Mutex<Vec<GameResult>>,
    pub topups: Mutex<HashMap<String, Instant>>,
    pub events: Arc<EventBus>,
    pub verifier: AttestationVerifier,
    pub chain: Arc<dyn ChainClient>,
    pub wallet: Arc<Keypair>,
    pub birth_cert: BirthCertificate,
    pub tee: Arc<dyn TeeProvider>,
    pub started_at: Instant,
    pub max_active: usize,
}

impl CoordinatorState {
    pub fn new(
        verifier: AttestationVerifier,
        chain: Arc<dyn ChainClient>,
        wallet: Arc<Keypair>,
        birth_cert: BirthCertificate,
        tee: Arc<dyn TeeProvider>,
        max_active: usize,
    ) -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            funded_wallets: Mutex::new(HashSet::new()),
            games: Mutex::new(Vec::new()),
            topups: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new()),
            verifier,
            chain,
            wallet,
            birth_cert,
            tee,
            started_at: Instant::now(),
            max_active,
        }
    }

    /// Re-rank the pool: among non-offline agents sorted by descending
    /// balance, the top `max_active` with at least one stake are `active`,
    /// the rest above the stake are `benched`, the rest `broke`. Returns
    /// the transitions that occurred.
    pub fn rerank(&self) -> Vec<RankChange> {
        let mut pool = self.pool.lock().expect("pool lock poisoned");

        let mut ranked: Vec<String> = pool
            .values()
            .filter(|a| a.in_play())
            .map(|a| a.wallet_address.clone())
            .collect();
        ranked.sort_by(|a, b| {
            let ba = pool.get(a).map(|r| r.balance).unwrap_or(0);
            let bb = pool.get(b).map(|r| r.balance).unwrap_or(0);
            bb.cmp(&ba)
        });

        let mut changes = Vec::new();
        for (idx, wallet) in ranked.iter().enumerate() {
            let record = pool.get_mut(wallet).expect("ranked wallet in pool");
            let new_status = if record.balance < MIN_STAKE {
                AgentStatus::Broke
            } else if idx < self.max_active {
                AgentStatus::Active
            } else {
                AgentStatus::Benched
            };
            if record.status != new_status {
                changes.push(RankChange {
                    name: record.name.clone(),
                    wallet_address: record.wallet_address.clone(),
                    from: record.status,
                    to: new_status,
                });
                record.status = new_status;
            }
        }
        changes
    }

    /// Broadcast rank transitions: promotions into `active` as
    /// `agent_joined`, demotions out of it as `agent_evicted`.
    pub fn broadcast_rank_changes(&self, changes: &[RankChange]) {
        for change in changes {
            let data = serde_json::json!({
                "agentName": change.name,
                "walletAddress": change.wallet_address,
                "status": change.to,
            });
            if change.to == AgentStatus::Active {
                self.events.broadcast(event_types::AGENT_JOINED, data);
            } else if change.from == AgentStatus::Active {
                self.events.broadcast(event_types::AGENT_EVICTED, data);
            }
        }
    }

    /// Mark an agent offline (failed liveness or dispatch). Returns false
    /// when the wallet is unknown or already offline.
    pub fn mark_offline(&self, wallet: &str) -> bool {
        let mut pool = self.pool.lock().expect("pool lock poisoned");
        match pool.get_mut(wallet) {
            Some(record) if record.in_play() => {
                log::warn!("[MATCH] {} ({}) marked offline", record.name, wallet);
                record.status = AgentStatus::Offline;
                true
            }
            _ => false,
        }
    }

    /// Downgrade an offline agent whose VM no longer exists.
    pub fn mark_deleted(&self, wallet: &str) {
        let mut pool = self.pool.lock().expect("pool lock poisoned");
        if let Some(record) = pool.get_mut(wallet) {
            if record.status == AgentStatus::Offline {
                log::warn!("[MATCH] {} ({}) downgraded to deleted", record.name, wallet);
                record.status = AgentStatus::Deleted;
            }
        }
    }

    /// Apply a decided match: credit the winner, debit the loser, update
    /// streaks, append to the game log. `None` when either party left the
    /// pool in the meantime.
    pub fn apply_game_result(
        &self,
        game_id: &str,
        winner_wallet: &str,
        loser_wallet: &str,
        tx_signature: Option<String>,
    ) -> Option<GameResult> {
        let mut pool = self.pool.lock().expect("pool lock poisoned");
        if !pool.contains_key(winner_wallet) || !pool.contains_key(loser_wallet) {
            return None;
        }

        let (winner_name, loser_name) = {
            let winner = pool.get_mut(winner_wallet).expect("winner in pool");
            winner.record_win(GAME_STAKE);
            let winner_name = winner.name.clone();
            let loser = pool.get_mut(loser_wallet).expect("loser in pool");
            loser.record_loss(GAME_STAKE);
            (winner_name, loser.name.clone())
        };

        let result = GameResult {
            game_id: game_id.to_string(),
            winner: winner_name,
            loser: loser_name,
            winner_wallet: winner_wallet.to_string(),
            loser_wallet: loser_wallet.to_string(),
            stake_amount: GAME_STAKE,
            tx_signature,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        self.games
            .lock()
            .expect("games lock poisoned")
            .push(result.clone());
        Some(result)
    }

    /// Leaderboard order: balance desc, then net wins desc.
    pub fn leaderboard(&self) -> Vec<AgentView> {
        let pool = self.pool.lock().expect("pool lock poisoned");
        let mut views: Vec<&AgentRecord> = pool.values().collect();
        views.sort_by(|a, b| {
            b.balance.cmp(&a.balance).then_with(|| {
                let net_a = a.wins as i64 - a.losses as i64;
                let net_b = b.wins as i64 - b.losses as i64;
                net_b.cmp(&net_a)
            })
        });
        views.into_iter().map(|a| a.view()).collect()
    }

    pub fn stats(&self) -> serde_json::Value {
        let pool = self.pool.lock().expect("pool lock poisoned");
        let games = self.games.lock().expect("games lock poisoned");

        let count = |status: AgentStatus| pool.values().filter(|a| a.status == status).count();
        let volume: u64 = games.iter().map(|g| g.stake_amount).sum();
        let donations: u64 = pool.values().map(|a| a.total_donations).sum();

        serde_json::json!({
            "agents": {
                "total": pool.len(),
                "active": count(AgentStatus::Active),
                "benched": count(AgentStatus::Benched),
                "broke": count(AgentStatus::Broke),
                "offline": count(AgentStatus::Offline),
                "deleted": count(AgentStatus::Deleted),
            },
            "totalGames": games.len(),
            "totalVolume": config::to_ui_amount(volume),
            "totalDonations": config::to_ui_amount(donations),
            "uptimeSecs": self.started_at.elapsed().as_secs(),
        })
    }
}

#[cfg(test)]
pub mod test_support {
    //! Shared constructors for coordinator tests: mock chain, mock TEE,
    //! open allowlist.

    use super::*;
    use crate::chain::MockChain;
    use crate::identity::build_birth_certificate;
    use crate::tee::quote::QuoteParser;
    use crate::tee::MockTeeProvider;
    use crate::verifier::Rtmr3Allowlist;

    pub async fn mock_state() -> (Arc<CoordinatorState>, Arc<MockChain>) {
        mock_state_with_cap(crate::config::defaults::MAX_ACTIVE).await
    }

    pub async fn mock_state_with_cap(
        max_active: usize,
    ) -> (Arc<CoordinatorState>, Arc<MockChain>) {
        let chain = Arc::new(MockChain::new());
        let wallet = Arc::new(Keypair::new());
        let tee = Arc::new(MockTeeProvider::new("dashboard"));
        let cert = build_birth_certificate("dashboard", &wallet, tee.as_ref(), "img:test")
            .await
            .unwrap();
        let state = CoordinatorState::new(
            AttestationVerifier::new(QuoteParser::local_only(), Rtmr3Allowlist::open()),
            chain.clone(),
            wallet,
            cert,
            tee,
            max_active,
        );
        (Arc::new(state), chain)
    }

    /// Insert an agent directly into the pool with the given balance.
    pub async fn seed_agent(
        state: &CoordinatorState,
        name: &str,
        balance: u64,
    ) -> (String, Keypair) {
        let wallet = Keypair::new();
        let tee = MockTeeProvider::new(name);
        let cert = build_birth_certificate(name, &wallet, &tee, "img:test")
            .await
            .unwrap();
        let wallet_address = cert.wallet_address.clone();
        let record = AgentRecord::new(cert, format!("http://{}.test", name), balance);
        state
            .pool
            .lock()
            .unwrap()
            .insert(wallet_address.clone(), record);
        (wallet_address, wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::{GAME_STAKE, MIN_STAKE};

    #[tokio::test]
    async fn win_loss_conserves_balance() {
        let (state, _) = mock_state().await;
        let (alice, _) = seed_agent(&state, "alice", 1_000_000).await;
        let (bob, _) = seed_agent(&state, "bob", 1_000_000).await;

        let before: u64 = {
            let pool = state.pool.lock().unwrap();
            pool.values().map(|a| a.balance).sum()
        };

        let result = state
            .apply_game_result("g1", &alice, &bob, Some("tx1".to_string()))
            .unwrap();
        assert_eq!(result.stake_amount, GAME_STAKE);
        assert_ne!(result.winner, result.loser);

        let pool = state.pool.lock().unwrap();
        let after: u64 = pool.values().map(|a| a.balance).sum();
        assert_eq!(before, after);
        assert_eq!(pool[&alice].balance, 1_010_000);
        assert_eq!(pool[&bob].balance, 990_000);
        assert_eq!(pool[&alice].wins, 1);
        assert_eq!(pool[&bob].losses, 1);
    }

    #[tokio::test]
    async fn streaks_flip_sign_on_transition() {
        let (state, _) = mock_state().await;
        let (alice, _) = seed_agent(&state, "alice", 1_000_000).await;
        let (bob, _) = seed_agent(&state, "bob", 1_000_000).await;

        state.apply_game_result("g1", &alice, &bob, None).unwrap();
        state.apply_game_result("g2", &alice, &bob, None).unwrap();
        state.apply_game_result("g3", &bob, &alice, None).unwrap();

        let pool = state.pool.lock().unwrap();
        assert_eq!(pool[&alice].current_streak, -1);
        assert_eq!(pool[&alice].longest_streak, 2);
        assert_eq!(pool[&bob].current_streak, 1);
    }

    #[tokio::test]
    async fn rerank_enforces_cap_and_min_stake() {
        let (state, _) = mock_state().await;
        // max_active defaults to 8; rebuild a tighter state inline
        let (alice, _) = seed_agent(&state, "alice", 1_000_000).await;
        let (bob, _) = seed_agent(&state, "bob", 500_000).await;
        let (carol, _) = seed_agent(&state, "carol", MIN_STAKE - 1).await;

        let changes = state.rerank();
        // carol drops to broke; alice and bob stay active
        assert!(changes
            .iter()
            .any(|c| c.wallet_address == carol && c.to == AgentStatus::Broke));

        let pool = state.pool.lock().unwrap();
        assert_eq!(pool[&alice].status, AgentStatus::Active);
        assert_eq!(pool[&bob].status, AgentStatus::Active);
        assert_eq!(pool[&carol].status, AgentStatus::Broke);

        // Invariant: every active agent holds at least one stake
        assert!(pool
            .values()
            .filter(|a| a.status == AgentStatus::Active)
            .all(|a| a.balance >= MIN_STAKE));
    }

    #[tokio::test]
    async fn offline_agents_are_not_reranked() {
        let (state, _) = mock_state().await;
        let (alice, _) = seed_agent(&state, "alice", 1_000_000).await;
        assert!(state.mark_offline(&alice));

        let changes = state.rerank();
        assert!(changes.is_empty());
        assert_eq!(
            state.pool.lock().unwrap()[&alice].status,
            AgentStatus::Offline
        );
    }

    #[tokio::test]
    async fn deleted_requires_offline_first(){
        let (state, _) = mock_state().await;
        let (alice, _) = seed_agent(&state, "alice", 1_000_000).await;

        // Active agents are never deleted directly
        state.mark_deleted(&alice);
        assert_eq!(
            state.pool.lock().unwrap()[&alice].status,
            AgentStatus::Active
        );

        state.mark_offline(&alice);
        state.mark_deleted(&alice);
        assert_eq!(
            state.pool.lock().unwrap()[&alice].status,
            AgentStatus::Deleted
        );
    }

    #[tokio::test]
    async fn leaderboard_breaks_balance_ties_by_net_wins() {
        let (state, _) = mock_state().await;
        let (alice, _) = seed_agent(&state, "alice", 500_000).await;
        let (bob, _) = seed_agent(&state, "bob", 500_000).await;
        {
            let mut pool = state.pool.lock().unwrap();
            pool.get_mut(&alice).unwrap().wins = 3;
            pool.get_mut(&bob).unwrap().wins = 1;
        }

        let board = state.leaderboard();
        assert_eq!(board[0].agent_name, "alice");
        assert_eq!(board[1].agent_name, "bob");
    }
}
