//! Raffle VRF Coordinator Mock
//!
//! Development stand-in for a verifiable-randomness coordinator. Consumers
//! register a request against a funded subscription; a later call delivers
//! random words back to the consumer through its `fulfill_random_words`
//! callback.
//!
//! ## Request / Fulfill Model
//! 1. A consumer contract calls `request_random_words`, naming itself as
//!    `consumer`. The call returns a request id synchronously.
//! 2. Anyone calls `fulfill_random_words` (derived words) or
//!    `fulfill_random_words_override` (caller-chosen words). The coordinator
//!    invokes the consumer callback fallibly.
//!
//! Derived words are
//!
//!   `word_i = keccak256(request_id_be_bytes || i_be_bytes)`
//!
//! read as a big-endian `U256`.
//!
//! ## Billing
//! A successful delivery debits `base_fee + gas_price_link * callback_gas_limit`
//! from the subscription. Balances are bookkeeping only; no token moves.
//! A failed callback is not billed and the request stays pending so it can be
//! delivered again.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contractclient, contracterror, contractevent, contractimpl, contracttype, Address,
    Bytes, BytesN, Env, Vec, U256,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

/// Upper bound on words per request.
pub const MAX_NUM_WORDS: u32 = 500;

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized  = 1,
    NotInitialized      = 2,
    InvalidAmount       = 3,
    InvalidSubscription = 4,
    /// `num_words` is zero or above `MAX_NUM_WORDS`.
    InvalidNumWords     = 5,
    /// No pending request with this id (never issued, or already delivered).
    NonexistentRequest  = 6,
    /// The consumer passed to a fulfill call is not the one that requested.
    InvalidConsumer     = 7,
    /// Override words do not match the requested word count.
    InvalidRandomWords  = 8,
    InsufficientBalance = 9,
    Overflow            = 10,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

/// Instance keys (BaseFee, GasPriceLink, counters): coordinator config.
/// Persistent keys: per-subscription and per-request entries.
#[contracttype]
pub enum DataKey {
    // --- instance() ---
    BaseFee,
    GasPriceLink,
    NextSubscriptionId,
    NextRequestId,
    // --- persistent() ---
    Subscription(u64),
    Request(u64),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscription {
    pub owner: Address,
    pub balance: i128,
}

/// A request waiting for delivery.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingRequest {
    pub consumer: Address,
    pub subscription_id: u64,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

// ---------------------------------------------------------------------------
// Consumer interface
// ---------------------------------------------------------------------------

/// Callback every consumer contract exposes.
#[contractclient(name = "VrfConsumerClient")]
pub trait VrfConsumer {
    fn fulfill_random_words(env: Env, request_id: u64, random_words: Vec<U256>);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct SubscriptionCreated {
    #[topic]
    pub subscription_id: u64,
    pub owner: Address,
}

#[contractevent]
pub struct SubscriptionFunded {
    #[topic]
    pub subscription_id: u64,
    pub old_balance: i128,
    pub new_balance: i128,
}

#[contractevent]
pub struct RandomWordsRequested {
    #[topic]
    pub request_id: u64,
    #[topic]
    pub consumer: Address,
    pub key_hash: BytesN<32>,
    pub subscription_id: u64,
    pub num_words: u32,
}

#[contractevent]
pub struct RandomWordsFulfilled {
    #[topic]
    pub request_id: u64,
    pub payment: i128,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct VrfCoordinatorMock;

#[contractimpl]
impl VrfCoordinatorMock {
    /// Initialize billing parameters. May only be called once.
    pub fn init(env: Env, base_fee: i128, gas_price_link: i128) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::BaseFee) {
            return Err(Error::AlreadyInitialized);
        }
        if base_fee < 0 || gas_price_link < 0 {
            return Err(Error::InvalidAmount);
        }

        env.storage().instance().set(&DataKey::BaseFee, &base_fee);
        env.storage().instance().set(&DataKey::GasPriceLink, &gas_price_link);
        env.storage().instance().set(&DataKey::NextSubscriptionId, &1u64);
        env.storage().instance().set(&DataKey::NextRequestId, &1u64);

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Open an empty subscription owned by `owner`. Ids start at 1.
    pub fn create_subscription(env: Env, owner: Address) -> Result<u64, Error> {
        require_initialized(&env)?;
        owner.require_auth();

        let subscription_id = next_id(&env, DataKey::NextSubscriptionId)?;
        let key = DataKey::Subscription(subscription_id);
        env.storage().persistent().set(
            &key,
            &Subscription {
                owner: owner.clone(),
                balance: 0,
            },
        );
        extend_persistent_ttl(&env, &key);

        SubscriptionCreated { subscription_id, owner }.publish(&env);

        Ok(subscription_id)
    }

    pub fn fund_subscription(env: Env, subscription_id: u64, amount: i128) -> Result<(), Error> {
        require_initialized(&env)?;

        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let key = DataKey::Subscription(subscription_id);
        let mut subscription = get_subscription(&env, subscription_id)?;
        let old_balance = subscription.balance;
        subscription.balance = old_balance.checked_add(amount).ok_or(Error::Overflow)?;

        env.storage().persistent().set(&key, &subscription);
        extend_persistent_ttl(&env, &key);

        SubscriptionFunded {
            subscription_id,
            old_balance,
            new_balance: subscription.balance,
        }
        .publish(&env);

        Ok(())
    }

    pub fn get_subscription(env: Env, subscription_id: u64) -> Result<Subscription, Error> {
        require_initialized(&env)?;
        get_subscription(&env, subscription_id)
    }

    // -----------------------------------------------------------------------
    // request_random_words
    // -----------------------------------------------------------------------

    /// Register a randomness request and return its id.
    ///
    /// `consumer` must authorize the call; a contract naming its own address
    /// satisfies this as the direct invoker. `_request_confirmations` is
    /// accepted for interface compatibility and has no effect here.
    pub fn request_random_words(
        env: Env,
        consumer: Address,
        key_hash: BytesN<32>,
        subscription_id: u64,
        _request_confirmations: u32,
        callback_gas_limit: u32,
        num_words: u32,
    ) -> Result<u64, Error> {
        require_initialized(&env)?;
        consumer.require_auth();

        if !env
            .storage()
            .persistent()
            .has(&DataKey::Subscription(subscription_id))
        {
            return Err(Error::InvalidSubscription);
        }
        if num_words == 0 || num_words > MAX_NUM_WORDS {
            return Err(Error::InvalidNumWords);
        }

        let request_id = next_id(&env, DataKey::NextRequestId)?;
        let key = DataKey::Request(request_id);
        env.storage().persistent().set(
            &key,
            &PendingRequest {
                consumer: consumer.clone(),
                subscription_id,
                callback_gas_limit,
                num_words,
            },
        );
        extend_persistent_ttl(&env, &key);

        RandomWordsRequested {
            request_id,
            consumer,
            key_hash,
            subscription_id,
            num_words,
        }
        .publish(&env);

        Ok(request_id)
    }

    // -----------------------------------------------------------------------
    // fulfill
    // -----------------------------------------------------------------------

    /// Deliver derived random words to `consumer`.
    ///
    /// Returns whether the consumer accepted them. A rejected delivery leaves
    /// the request pending.
    pub fn fulfill_random_words(env: Env, request_id: u64, consumer: Address) -> Result<bool, Error> {
        let request = load_request(&env, request_id, &consumer)?;
        let words = derive_words(&env, request_id, request.num_words);
        deliver(&env, request_id, request, words)
    }

    /// Deliver caller-chosen words to `consumer`.
    pub fn fulfill_random_words_override(
        env: Env,
        request_id: u64,
        consumer: Address,
        words: Vec<U256>,
    ) -> Result<bool, Error> {
        let request = load_request(&env, request_id, &consumer)?;
        if words.len() != request.num_words {
            return Err(Error::InvalidRandomWords);
        }
        deliver(&env, request_id, request, words)
    }

    /// Return a request that has not been delivered yet.
    pub fn get_request(env: Env, request_id: u64) -> Result<PendingRequest, Error> {
        require_initialized(&env)?;
        env.storage()
            .persistent()
            .get(&DataKey::Request(request_id))
            .ok_or(Error::NonexistentRequest)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn require_initialized(env: &Env) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::BaseFee) {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

fn next_id(env: &Env, key: DataKey) -> Result<u64, Error> {
    let id: u64 = env
        .storage()
        .instance()
        .get(&key)
        .ok_or(Error::NotInitialized)?;
    let next = id.checked_add(1).ok_or(Error::Overflow)?;
    env.storage().instance().set(&key, &next);
    Ok(id)
}

fn get_subscription(env: &Env, subscription_id: u64) -> Result<Subscription, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Subscription(subscription_id))
        .ok_or(Error::InvalidSubscription)
}

fn load_request(env: &Env, request_id: u64, consumer: &Address) -> Result<PendingRequest, Error> {
    require_initialized(env)?;
    let request: PendingRequest = env
        .storage()
        .persistent()
        .get(&DataKey::Request(request_id))
        .ok_or(Error::NonexistentRequest)?;
    if &request.consumer != consumer {
        return Err(Error::InvalidConsumer);
    }
    Ok(request)
}

fn payment_for(env: &Env, callback_gas_limit: u32) -> Result<i128, Error> {
    let base_fee: i128 = env
        .storage()
        .instance()
        .get(&DataKey::BaseFee)
        .ok_or(Error::NotInitialized)?;
    let gas_price_link: i128 = env
        .storage()
        .instance()
        .get(&DataKey::GasPriceLink)
        .ok_or(Error::NotInitialized)?;
    gas_price_link
        .checked_mul(callback_gas_limit as i128)
        .and_then(|v| v.checked_add(base_fee))
        .ok_or(Error::Overflow)
}

/// Bill the subscription and invoke the consumer callback.
///
/// The subscription is checked before the callback and debited only when the
/// consumer accepts the words.
fn deliver(
    env: &Env,
    request_id: u64,
    request: PendingRequest,
    words: Vec<U256>,
) -> Result<bool, Error> {
    let payment = payment_for(env, request.callback_gas_limit)?;
    let mut subscription = get_subscription(env, request.subscription_id)?;
    if subscription.balance < payment {
        return Err(Error::InsufficientBalance);
    }

    let success = matches!(
        VrfConsumerClient::new(env, &request.consumer).try_fulfill_random_words(&request_id, &words),
        Ok(Ok(()))
    );

    if success {
        env.storage()
            .persistent()
            .remove(&DataKey::Request(request_id));

        subscription.balance -= payment;
        let key = DataKey::Subscription(request.subscription_id);
        env.storage().persistent().set(&key, &subscription);
        extend_persistent_ttl(env, &key);
    }

    RandomWordsFulfilled {
        request_id,
        payment: if success { payment } else { 0 },
        success,
    }
    .publish(env);

    Ok(success)
}

/// Derive `num_words` words from the request id.
///
/// Preimage is 12 bytes: request_id (8 bytes BE) || word index (4 bytes BE).
fn derive_words(env: &Env, request_id: u64, num_words: u32) -> Vec<U256> {
    let mut words = Vec::new(env);
    for i in 0..num_words {
        words.push_back(derive_word(env, request_id, i));
    }
    words
}

pub fn derive_word(env: &Env, request_id: u64, index: u32) -> U256 {
    let mut preimage = [0u8; 12];
    preimage[..8].copy_from_slice(&request_id.to_be_bytes());
    preimage[8..].copy_from_slice(&index.to_be_bytes());

    let digest: BytesN<32> = env
        .crypto()
        .keccak256(&Bytes::from_slice(env, &preimage))
        .into();
    U256::from_be_bytes(env, &Bytes::from_array(env, &digest.to_array()))
}

fn extend_persistent_ttl(env: &Env, key: &DataKey) {
    env.storage()
        .persistent()
        .extend_ttl(key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test;
