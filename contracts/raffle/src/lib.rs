//! Automated Raffle Contract
//!
//! A repeating lottery settled with verifiable randomness. Players pay at
//! least the entrance fee to enter; once the round has been open for
//! `interval` seconds and holds funds, an automation keeper triggers upkeep,
//! the contract asks the coordinator for one random word, and the coordinator's
//! callback picks and pays the winner.
//!
//! ## Round Flow
//! 1. `enter_raffle` → fee transfers in, player appended. Round is `Open`.
//! 2. Keeper polls `check_upkeep`; when eligible calls `perform_upkeep` →
//!    randomness requested, round moves to `Calculating`.
//! 3. Coordinator calls `fulfill_random_words` with the request id → winner
//!    is `players[word mod players.len()]`, pool paid out, round reset to
//!    `Open`.
//!
//! ## Custody
//! The whole pool is paid to the winner in one transfer. If the transfer
//! fails the invocation fails: the round stays `Calculating` with its pool,
//! players and pending request intact, so the coordinator can redeliver.
//!
//! ## Storage Strategy
//! - `instance()`: RaffleConfig. Written once by `init`.
//! - `persistent()`: Round. One entry, TTL bumped on every write.
//!
//! ## Invariant
//! `round.pool == token.balance(contract_address)` as long as every token
//! inflow goes through `enter_raffle`.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contractclient, contracterror, contractevent, contractimpl, contracttype, log,
    token::TokenClient, Address, Bytes, BytesN, Env, Vec, U256,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

/// Confirmations the coordinator waits before answering.
pub const REQUEST_CONFIRMATIONS: u32 = 3;
/// Random words requested per round.
pub const NUM_WORDS: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized      = 1,
    NotInitialized          = 2,
    InvalidAmount           = 3,
    /// Paid amount is below the entrance fee.
    InsufficientPayment     = 4,
    /// Entries are closed while a winner is being calculated.
    RoundNotOpen            = 5,
    /// Upkeep conditions not met. The `(pool, players, state)` triple is
    /// written with `log!`, which the host only records when diagnostics are
    /// enabled; `upkeep_status` returns the same triple in any environment.
    UpkeepNotNeeded         = 6,
    /// Fulfillment does not match the outstanding request.
    UnknownRequest          = 7,
    /// Payout to the winner failed; the round was left `Calculating`.
    TransferFailed          = 8,
    IndexOutOfRange         = 9,
    /// A `Calculating` round with no players.
    NoPlayers               = 10,
    MissingRandomWords      = 11,
    RandomnessRequestFailed = 12,
    Overflow                = 13,
}

// ---------------------------------------------------------------------------
// Storage types
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Config,
    Round,
}

/// Construction parameters. Never mutated after `init`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaffleConfig {
    pub coordinator: Address,
    pub token: Address,
    pub entrance_fee: i128,
    /// Coordinator gas lane.
    pub key_hash: BytesN<32>,
    pub subscription_id: u64,
    pub callback_gas_limit: u32,
    /// Minimum seconds between settlements.
    pub interval: u64,
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum RaffleState {
    Open = 0,
    Calculating = 1,
}

/// The single active round, reset in place after each settlement.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Round {
    pub state: RaffleState,
    /// One element per paid entry; the same address may repeat.
    pub players: Vec<Address>,
    /// Sum of every amount paid into this round.
    pub pool: i128,
    /// Ledger timestamp of initialization or of the last settlement.
    pub last_timestamp: u64,
    /// `Some` exactly while `state == Calculating`.
    pub pending_request_id: Option<u64>,
    /// Survives resets; `None` until the first settlement.
    pub recent_winner: Option<Address>,
}

/// Upkeep evaluation broken down by condition.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpkeepStatus {
    pub upkeep_needed: bool,
    pub is_open: bool,
    pub time_passed: bool,
    pub has_players: bool,
    pub has_balance: bool,
    pub pool: i128,
    pub num_players: u32,
    pub state: RaffleState,
}

/// An upkeep refused because the round was not eligible.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UpkeepNotNeeded {
    pub pool: i128,
    pub num_players: u32,
    pub state: RaffleState,
}

impl From<UpkeepNotNeeded> for Error {
    fn from(_: UpkeepNotNeeded) -> Self {
        Error::UpkeepNotNeeded
    }
}

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

/// What the raffle needs from a randomness coordinator. The coordinator later
/// calls `fulfill_random_words` on the raffle with the returned id.
#[contractclient(name = "VrfCoordinatorClient")]
pub trait VrfCoordinatorInterface {
    fn request_random_words(
        env: Env,
        consumer: Address,
        key_hash: BytesN<32>,
        subscription_id: u64,
        request_confirmations: u32,
        callback_gas_limit: u32,
        num_words: u32,
    ) -> u64;
}

/// Entry points an automation keeper polls and triggers.
#[contractclient(name = "AutomationClient")]
pub trait AutomationCompatible {
    fn check_upkeep(env: Env, check_data: Bytes) -> (bool, Bytes);
    fn perform_upkeep(env: Env, perform_data: Bytes) -> u64;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct Initialized {
    pub coordinator: Address,
    pub token: Address,
    pub entrance_fee: i128,
    pub interval: u64,
}

#[contractevent]
pub struct EntryRecorded {
    #[topic]
    pub participant: Address,
    pub amount: i128,
}

#[contractevent]
pub struct RandomWordsRequested {
    #[topic]
    pub request_id: u64,
}

#[contractevent]
pub struct WinnerPicked {
    #[topic]
    pub winner: Address,
    pub prize: i128,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct Raffle;

#[contractimpl]
impl Raffle {
    /// Initialize the raffle. May only be called once.
    ///
    /// `token` is the SEP-41 asset entrance fees are paid in. The round starts
    /// `Open` with `last_timestamp` set to the current ledger time.
    pub fn init(
        env: Env,
        coordinator: Address,
        token: Address,
        entrance_fee: i128,
        key_hash: BytesN<32>,
        subscription_id: u64,
        callback_gas_limit: u32,
        interval: u64,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(Error::AlreadyInitialized);
        }
        if entrance_fee <= 0 {
            return Err(Error::InvalidAmount);
        }

        let config = RaffleConfig {
            coordinator: coordinator.clone(),
            token: token.clone(),
            entrance_fee,
            key_hash,
            subscription_id,
            callback_gas_limit,
            interval,
        };
        env.storage().instance().set(&DataKey::Config, &config);
        set_round(&env, &Round::new(&env, env.ledger().timestamp()));

        Initialized {
            coordinator,
            token,
            entrance_fee,
            interval,
        }
        .publish(&env);

        Ok(())
    }

    // -----------------------------------------------------------------------
    // enter_raffle
    // -----------------------------------------------------------------------

    /// Buy one entry for `amount` (at least the entrance fee).
    ///
    /// The whole amount joins the pool. The same player may enter repeatedly;
    /// each entry is one more chance to win.
    pub fn enter_raffle(env: Env, player: Address, amount: i128) -> Result<(), Error> {
        let config = get_config(&env)?;
        player.require_auth();

        let mut round = get_round(&env)?;
        round.enter(player.clone(), amount, config.entrance_fee)?;

        TokenClient::new(&env, &config.token).transfer(
            &player,
            &env.current_contract_address(),
            &amount,
        );
        set_round(&env, &round);

        EntryRecorded {
            participant: player,
            amount,
        }
        .publish(&env);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // upkeep
    // -----------------------------------------------------------------------

    /// Keeper probe. Read-only; the check data is ignored and the returned
    /// perform data is empty.
    pub fn check_upkeep(env: Env, _check_data: Bytes) -> Result<(bool, Bytes), Error> {
        let status = Self::upkeep_status(env.clone())?;
        Ok((status.upkeep_needed, Bytes::new(&env)))
    }

    /// Per-condition view of upkeep eligibility.
    pub fn upkeep_status(env: Env) -> Result<UpkeepStatus, Error> {
        let config = get_config(&env)?;
        let round = get_round(&env)?;
        Ok(round.upkeep_status(env.ledger().timestamp(), config.interval))
    }

    /// Close the round and request randomness. Returns the request id.
    ///
    /// Anyone may call this; it only proceeds when `check_upkeep` would
    /// report `true`. A second call while `Calculating` is rejected by the
    /// same check.
    pub fn perform_upkeep(env: Env, _perform_data: Bytes) -> Result<u64, Error> {
        let config = get_config(&env)?;
        let mut round = get_round(&env)?;

        if let Err(rejected) = round.ensure_upkeep_needed(env.ledger().timestamp(), config.interval) {
            log!(
                &env,
                "upkeep not needed: pool {}, players {}, state {}",
                rejected.pool,
                rejected.num_players,
                rejected.state
            );
            return Err(rejected.into());
        }

        let request_id = request_randomness(&env, &config)?;
        round.begin_calculating(request_id);
        set_round(&env, &round);

        RandomWordsRequested { request_id }.publish(&env);
        Ok(request_id)
    }

    // -----------------------------------------------------------------------
    // fulfill_random_words
    // -----------------------------------------------------------------------

    /// Coordinator callback. Picks the winner, pays the pool and reopens.
    ///
    /// Only the configured coordinator may call this, and only with the id of
    /// the outstanding request. Stale, replayed or forged ids fail with
    /// `UnknownRequest` and change nothing.
    pub fn fulfill_random_words(
        env: Env,
        request_id: u64,
        random_words: Vec<U256>,
    ) -> Result<(), Error> {
        let config = get_config(&env)?;
        config.coordinator.require_auth();

        let mut round = get_round(&env)?;
        let winner = round.pick_winner(&env, request_id, &random_words)?;

        // Reset before paying out; a failed payout fails the whole call.
        let prize = round.settle(&env, winner.clone(), env.ledger().timestamp());
        set_round(&env, &round);

        let paid = TokenClient::new(&env, &config.token).try_transfer(
            &env.current_contract_address(),
            &winner,
            &prize,
        );
        if !matches!(paid, Ok(Ok(()))) {
            log!(&env, "payout failed: request {}, prize {}", request_id, prize);
            return Err(Error::TransferFailed);
        }

        WinnerPicked { winner, prize }.publish(&env);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn get_raffle_state(env: Env) -> Result<RaffleState, Error> {
        Ok(get_round(&env)?.state)
    }

    pub fn get_entrance_fee(env: Env) -> Result<i128, Error> {
        Ok(get_config(&env)?.entrance_fee)
    }

    pub fn get_interval(env: Env) -> Result<u64, Error> {
        Ok(get_config(&env)?.interval)
    }

    pub fn get_player(env: Env, index: u32) -> Result<Address, Error> {
        get_round(&env)?
            .players
            .get(index)
            .ok_or(Error::IndexOutOfRange)
    }

    pub fn get_number_of_players(env: Env) -> Result<u32, Error> {
        Ok(get_round(&env)?.num_players())
    }

    /// `None` until the first round settles.
    pub fn get_recent_winner(env: Env) -> Result<Option<Address>, Error> {
        Ok(get_round(&env)?.recent_winner)
    }

    pub fn get_last_time_stamp(env: Env) -> Result<u64, Error> {
        Ok(get_round(&env)?.last_timestamp)
    }

    pub fn get_pool(env: Env) -> Result<i128, Error> {
        Ok(get_round(&env)?.pool)
    }

    pub fn get_pending_request_id(env: Env) -> Result<Option<u64>, Error> {
        Ok(get_round(&env)?.pending_request_id)
    }

    pub fn get_config(env: Env) -> Result<RaffleConfig, Error> {
        get_config(&env)
    }

    pub fn get_num_words() -> u32 {
        NUM_WORDS
    }

    pub fn get_request_confirmations() -> u32 {
        REQUEST_CONFIRMATIONS
    }
}

// ---------------------------------------------------------------------------
// Round transitions
// ---------------------------------------------------------------------------

// Pure transitions over a loaded `Round`. Entry points load the round, apply
// one transition and write it back in the same invocation.

impl Round {
    pub fn new(env: &Env, now: u64) -> Self {
        Round {
            state: RaffleState::Open,
            players: Vec::new(env),
            pool: 0,
            last_timestamp: now,
            pending_request_id: None,
            recent_winner: None,
        }
    }

    pub fn num_players(&self) -> u32 {
        self.players.len()
    }

    pub fn upkeep_status(&self, now: u64, interval: u64) -> UpkeepStatus {
        let is_open = self.state == RaffleState::Open;
        let time_passed = now.saturating_sub(self.last_timestamp) >= interval;
        let has_players = !self.players.is_empty();
        let has_balance = self.pool > 0;

        UpkeepStatus {
            upkeep_needed: is_open && time_passed && has_players && has_balance,
            is_open,
            time_passed,
            has_players,
            has_balance,
            pool: self.pool,
            num_players: self.num_players(),
            state: self.state,
        }
    }

    pub fn ensure_upkeep_needed(&self, now: u64, interval: u64) -> Result<(), UpkeepNotNeeded> {
        let status = self.upkeep_status(now, interval);
        if !status.upkeep_needed {
            return Err(UpkeepNotNeeded {
                pool: status.pool,
                num_players: status.num_players,
                state: status.state,
            });
        }
        Ok(())
    }

    /// Record a paid entry. The payment check runs before the state gate so
    /// an underpaid entry is reported as such in any state.
    pub fn enter(&mut self, player: Address, amount: i128, entrance_fee: i128) -> Result<(), Error> {
        if amount < entrance_fee {
            return Err(Error::InsufficientPayment);
        }
        if self.state != RaffleState::Open {
            return Err(Error::RoundNotOpen);
        }

        self.pool = self.pool.checked_add(amount).ok_or(Error::Overflow)?;
        self.players.push_back(player);
        Ok(())
    }

    /// Close the round to entries while `request_id` is outstanding.
    pub fn begin_calculating(&mut self, request_id: u64) {
        self.state = RaffleState::Calculating;
        self.pending_request_id = Some(request_id);
    }

    /// Resolve the winner for a delivery of `random_words` against `request_id`.
    pub fn pick_winner(
        &self,
        env: &Env,
        request_id: u64,
        random_words: &Vec<U256>,
    ) -> Result<Address, Error> {
        if self.state != RaffleState::Calculating || self.pending_request_id != Some(request_id) {
            return Err(Error::UnknownRequest);
        }

        let word = random_words.get(0).ok_or(Error::MissingRandomWords)?;
        let index = winner_index(env, &word, self.num_players())?;
        self.players.get(index).ok_or(Error::NoPlayers)
    }

    /// Record `winner`, drain the pool and start the next round at `now`.
    /// Returns the prize owed to the winner.
    pub fn settle(&mut self, env: &Env, winner: Address, now: u64) -> i128 {
        let prize = self.pool;

        self.recent_winner = Some(winner);
        self.players = Vec::new(env);
        self.pool = 0;
        self.state = RaffleState::Open;
        self.last_timestamp = now;
        self.pending_request_id = None;

        prize
    }
}

/// `word mod num_players`.
///
/// An empty round has no valid index and is reported as `NoPlayers`.
pub fn winner_index(env: &Env, word: &U256, num_players: u32) -> Result<u32, Error> {
    if num_players == 0 {
        return Err(Error::NoPlayers);
    }

    let index = word
        .rem_euclid(&U256::from_u32(env, num_players))
        .to_u128()
        .ok_or(Error::Overflow)?;
    u32::try_from(index).map_err(|_| Error::Overflow)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn get_config(env: &Env) -> Result<RaffleConfig, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(Error::NotInitialized)
}

fn get_round(env: &Env) -> Result<Round, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Round)
        .ok_or(Error::NotInitialized)
}

fn set_round(env: &Env, round: &Round) {
    env.storage().persistent().set(&DataKey::Round, round);
    env.storage()
        .persistent()
        .extend_ttl(&DataKey::Round, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

/// Ask the configured coordinator for this round's randomness.
fn request_randomness(env: &Env, config: &RaffleConfig) -> Result<u64, Error> {
    let result = VrfCoordinatorClient::new(env, &config.coordinator).try_request_random_words(
        &env.current_contract_address(),
        &config.key_hash,
        &config.subscription_id,
        &REQUEST_CONFIRMATIONS,
        &config.callback_gas_limit,
        &NUM_WORDS,
    );
    match result {
        Ok(Ok(request_id)) => Ok(request_id),
        _ => Err(Error::RandomnessRequestFailed),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
