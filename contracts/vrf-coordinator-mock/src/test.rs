#![cfg(test)]

use super::*;
use soroban_sdk::{testutils::Address as _, vec, Address, BytesN, Env, Vec, U256};

// -------------------------------------------------------------------
// Test consumers
// -------------------------------------------------------------------

mod recording {
    use soroban_sdk::{contract, contractimpl, Env, Vec, U256};

    /// Stores every delivery keyed by request id.
    #[contract]
    pub struct RecordingConsumer;

    #[contractimpl]
    impl RecordingConsumer {
        pub fn fulfill_random_words(env: Env, request_id: u64, random_words: Vec<U256>) {
            env.storage().instance().set(&request_id, &random_words);
        }

        pub fn words(env: Env, request_id: u64) -> Option<Vec<U256>> {
            env.storage().instance().get(&request_id)
        }
    }
}

mod rejecting {
    use soroban_sdk::{contract, contracterror, contractimpl, Env, Vec, U256};

    #[contracterror]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(u32)]
    pub enum ConsumerError {
        Rejected = 1,
    }

    /// Refuses every delivery.
    #[contract]
    pub struct RejectingConsumer;

    #[contractimpl]
    impl RejectingConsumer {
        pub fn fulfill_random_words(
            _env: Env,
            _request_id: u64,
            _random_words: Vec<U256>,
        ) -> Result<(), ConsumerError> {
            Err(ConsumerError::Rejected)
        }
    }
}

use recording::{RecordingConsumer, RecordingConsumerClient};
use rejecting::RejectingConsumer;

// -------------------------------------------------------------------
// Helpers
// -------------------------------------------------------------------

const BASE_FEE: i128 = 100;
const GAS_PRICE_LINK: i128 = 2;
const GAS_LIMIT: u32 = 1_000;
/// BASE_FEE + GAS_PRICE_LINK * GAS_LIMIT
const PAYMENT: i128 = 2_100;

struct Setup<'a> {
    client: VrfCoordinatorMockClient<'a>,
    owner: Address,
    subscription_id: u64,
    consumer: Address,
    consumer_client: RecordingConsumerClient<'a>,
}

fn setup(env: &Env) -> Setup<'_> {
    let owner = Address::generate(env);

    let coordinator_id = env.register(VrfCoordinatorMock, ());
    let client = VrfCoordinatorMockClient::new(env, &coordinator_id);

    let consumer = env.register(RecordingConsumer, ());
    let consumer_client = RecordingConsumerClient::new(env, &consumer);

    env.mock_all_auths();

    client.init(&BASE_FEE, &GAS_PRICE_LINK);
    let subscription_id = client.create_subscription(&owner);
    client.fund_subscription(&subscription_id, &10_000);

    Setup {
        client,
        owner,
        subscription_id,
        consumer,
        consumer_client,
    }
}

fn key_hash(env: &Env) -> BytesN<32> {
    BytesN::from_array(env, &[7u8; 32])
}

fn request(env: &Env, s: &Setup, num_words: u32) -> u64 {
    s.client.request_random_words(
        &s.consumer,
        &key_hash(env),
        &s.subscription_id,
        &3u32,
        &GAS_LIMIT,
        &num_words,
    )
}

// -------------------------------------------------------------------
// 1. Initialization and subscriptions
// -------------------------------------------------------------------

#[test]
fn test_init_rejects_reinit() {
    let env = Env::default();
    let s = setup(&env);

    let result = s.client.try_init(&BASE_FEE, &GAS_PRICE_LINK);
    assert_eq!(result, Err(Ok(Error::AlreadyInitialized)));
}

#[test]
fn test_subscription_ids_are_sequential_from_one() {
    let env = Env::default();
    let s = setup(&env);

    assert_eq!(s.subscription_id, 1);
    let second = s.client.create_subscription(&s.owner);
    assert_eq!(second, 2);
}

#[test]
fn test_fund_subscription_accumulates() {
    let env = Env::default();
    let s = setup(&env);

    s.client.fund_subscription(&s.subscription_id, &500);

    let subscription = s.client.get_subscription(&s.subscription_id);
    assert_eq!(subscription.owner, s.owner);
    assert_eq!(subscription.balance, 10_500);
}

#[test]
fn test_fund_subscription_rejects_bad_input() {
    let env = Env::default();
    let s = setup(&env);

    assert_eq!(
        s.client.try_fund_subscription(&s.subscription_id, &0),
        Err(Ok(Error::InvalidAmount))
    );
    assert_eq!(
        s.client.try_fund_subscription(&99u64, &10),
        Err(Ok(Error::InvalidSubscription))
    );
}

// -------------------------------------------------------------------
// 2. Requests
// -------------------------------------------------------------------

#[test]
fn test_request_ids_start_at_one_and_are_pending() {
    let env = Env::default();
    let s = setup(&env);

    let first = request(&env, &s, 1);
    let second = request(&env, &s, 2);
    assert_eq!(first, 1);
    assert_eq!(second, 2);

    let pending = s.client.get_request(&second);
    assert_eq!(pending.consumer, s.consumer);
    assert_eq!(pending.subscription_id, s.subscription_id);
    assert_eq!(pending.callback_gas_limit, GAS_LIMIT);
    assert_eq!(pending.num_words, 2);
}

#[test]
fn test_request_unknown_subscription_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let result = s.client.try_request_random_words(
        &s.consumer,
        &key_hash(&env),
        &42u64,
        &3u32,
        &GAS_LIMIT,
        &1u32,
    );
    assert_eq!(result, Err(Ok(Error::InvalidSubscription)));
}

#[test]
fn test_request_word_count_bounds() {
    let env = Env::default();
    let s = setup(&env);

    for num_words in [0u32, MAX_NUM_WORDS + 1] {
        let result = s.client.try_request_random_words(
            &s.consumer,
            &key_hash(&env),
            &s.subscription_id,
            &3u32,
            &GAS_LIMIT,
            &num_words,
        );
        assert_eq!(result, Err(Ok(Error::InvalidNumWords)));
    }
}

// -------------------------------------------------------------------
// 3. Fulfillment
// -------------------------------------------------------------------

#[test]
fn test_fulfill_delivers_derived_words_and_bills() {
    let env = Env::default();
    let s = setup(&env);

    let request_id = request(&env, &s, 2);
    assert!(s.client.fulfill_random_words(&request_id, &s.consumer));

    let delivered = s.consumer_client.words(&request_id).unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered.get(0).unwrap(), derive_word(&env, request_id, 0));
    assert_eq!(delivered.get(1).unwrap(), derive_word(&env, request_id, 1));
    assert_ne!(delivered.get(0).unwrap(), delivered.get(1).unwrap());

    let subscription = s.client.get_subscription(&s.subscription_id);
    assert_eq!(subscription.balance, 10_000 - PAYMENT);

    assert_eq!(
        s.client.try_get_request(&request_id),
        Err(Ok(Error::NonexistentRequest))
    );
}

#[test]
fn test_fulfill_nonexistent_request_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let result = s.client.try_fulfill_random_words(&0u64, &s.consumer);
    assert_eq!(result, Err(Ok(Error::NonexistentRequest)));
}

#[test]
fn test_replay_fulfillment_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let request_id = request(&env, &s, 1);
    s.client.fulfill_random_words(&request_id, &s.consumer);

    let result = s.client.try_fulfill_random_words(&request_id, &s.consumer);
    assert_eq!(result, Err(Ok(Error::NonexistentRequest)));
}

#[test]
fn test_fulfill_for_wrong_consumer_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let request_id = request(&env, &s, 1);
    let other = env.register(RecordingConsumer, ());

    let result = s.client.try_fulfill_random_words(&request_id, &other);
    assert_eq!(result, Err(Ok(Error::InvalidConsumer)));
}

#[test]
fn test_override_delivers_exact_words() {
    let env = Env::default();
    let s = setup(&env);

    let request_id = request(&env, &s, 1);
    let words: Vec<U256> = vec![&env, U256::from_u32(&env, 7)];
    assert!(s
        .client
        .fulfill_random_words_override(&request_id, &s.consumer, &words));

    assert_eq!(s.consumer_client.words(&request_id), Some(words));
}

#[test]
fn test_override_word_count_mismatch_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let request_id = request(&env, &s, 1);
    let words: Vec<U256> = vec![&env, U256::from_u32(&env, 1), U256::from_u32(&env, 2)];

    let result = s
        .client
        .try_fulfill_random_words_override(&request_id, &s.consumer, &words);
    assert_eq!(result, Err(Ok(Error::InvalidRandomWords)));
    // Still pending.
    assert_eq!(s.client.get_request(&request_id).num_words, 1);
}

#[test]
fn test_rejected_callback_keeps_request_and_balance() {
    let env = Env::default();
    let s = setup(&env);

    let rejecting = env.register(RejectingConsumer, ());
    let request_id = s.client.request_random_words(
        &rejecting,
        &key_hash(&env),
        &s.subscription_id,
        &3u32,
        &GAS_LIMIT,
        &1u32,
    );

    assert!(!s.client.fulfill_random_words(&request_id, &rejecting));

    assert_eq!(s.client.get_request(&request_id).consumer, rejecting);
    assert_eq!(s.client.get_subscription(&s.subscription_id).balance, 10_000);

    // Redelivery is allowed and fails the same way.
    assert!(!s.client.fulfill_random_words(&request_id, &rejecting));
}

#[test]
fn test_underfunded_subscription_rejected() {
    let env = Env::default();
    let s = setup(&env);

    let poor = s.client.create_subscription(&s.owner);
    s.client.fund_subscription(&poor, &(PAYMENT - 1));
    let request_id = s.client.request_random_words(
        &s.consumer,
        &key_hash(&env),
        &poor,
        &3u32,
        &GAS_LIMIT,
        &1u32,
    );

    let result = s.client.try_fulfill_random_words(&request_id, &s.consumer);
    assert_eq!(result, Err(Ok(Error::InsufficientBalance)));
    assert_eq!(s.consumer_client.words(&request_id), None);
}

#[test]
fn test_derived_words_differ_across_requests() {
    let env = Env::default();

    let a = derive_word(&env, 1, 0);
    let b = derive_word(&env, 2, 0);
    let c = derive_word(&env, 1, 1);
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
    assert_eq!(a, derive_word(&env, 1, 0));
}
