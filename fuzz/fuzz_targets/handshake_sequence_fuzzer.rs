//! Fuzz target for handshake state transitions
//!
//! Drives a processor with an arbitrary interleaving of well-formed client
//! actions and raw garbage across a handful of clear channels.
//!
//! # Invariants
//!
//! - NEVER panic, whatever order requests arrive in
//! - A closed clear channel leaves no active or pending key behind
//! - Activation only happens for a client that holds a pending key
//! - When client and server both hold an active key, it is the same key

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use otpgate_core::{
    ClearOutcome, HandshakeConfig, HandshakeProcessor, KeyRegistry, PendingKeyRegistry, Transport,
};
use otpgate_harness::{MemoryTransport, SimClient, SimEnv};
use otpgate_proto::JsonCodec;

const CLIENTS: usize = 4;

#[derive(Debug, Arbitrary)]
enum Action {
    RequestKey { client: u8, size_exponent: u8 },
    Ack { client: u8 },
    Delete { client: u8, encrypted: bool },
    Garbage { client: u8, encrypted: bool, bytes: Vec<u8> },
    Close { client: u8 },
}

struct Slot {
    clear: Arc<MemoryTransport>,
    client: SimClient<JsonCodec>,
}

fuzz_target!(|actions: Vec<Action>| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_time().build() else {
        return;
    };
    let _guard = runtime.enter();

    let env = SimEnv::with_seed(0);
    let Ok(policy) = HandshakeConfig::default().validate() else {
        return;
    };
    let Ok(pending) = PendingKeyRegistry::new(env.clone(), Duration::from_secs(30)) else {
        return;
    };
    let processor = HandshakeProcessor::new(env, JsonCodec, policy, KeyRegistry::new(), pending);

    let mut slots: Vec<Slot> = (1..=CLIENTS as u64)
        .map(|id| {
            let clear = MemoryTransport::clear(id);
            processor.attach_clear(&clear);
            let welcome = clear.take_sent().remove(0);
            let client = SimClient::from_welcome(JsonCodec, &welcome).unwrap();
            Slot { clear, client }
        })
        .collect();

    let mut next_encrypted = 1_000u64;
    let mut encrypted = || {
        next_encrypted += 1;
        MemoryTransport::secure(next_encrypted)
    };

    for action in actions.into_iter().take(64) {
        match action {
            Action::RequestKey { client, size_exponent } => {
                let slot = &mut slots[client as usize % CLIENTS];
                let size = (size_exponent < 24).then(|| 1u32 << size_exponent);
                let Ok(request) = slot.client.new_key_request(size) else { continue };
                let channel = encrypted();
                processor.handle_encrypted(&channel, &request);
                if let Some(reply) = channel.last_sent() {
                    let _ = slot.client.accept_key_response(&reply);
                }
            },
            Action::Ack { client } => {
                let slot = &mut slots[client as usize % CLIENTS];
                let had_pending = slot.client.pending_key().is_some();
                let Ok(ack) = slot.client.ack() else { continue };
                let outcome = processor.handle_clear(&slot.clear, &ack);
                if outcome == ClearOutcome::Activated {
                    assert!(had_pending);
                } else if slot.clear.is_open() {
                    slot.client.forget_key();
                }
            },
            Action::Delete { client, encrypted: over_tls } => {
                let slot = &mut slots[client as usize % CLIENTS];
                let Ok(request) = slot.client.delete_request() else { continue };
                let outcome = if over_tls {
                    let channel = encrypted();
                    processor.handle_encrypted(&channel, &request);
                    None
                } else {
                    Some(processor.handle_clear(&slot.clear, &slot.client.seal_bytes(&request)))
                };
                if outcome.is_none() || outcome == Some(ClearOutcome::Deleted) {
                    slot.client.forget_key();
                }
            },
            Action::Garbage { client, encrypted: over_tls, bytes } => {
                let slot = &slots[client as usize % CLIENTS];
                if over_tls {
                    processor.handle_encrypted(&encrypted(), &bytes);
                } else {
                    processor.handle_clear(&slot.clear, &bytes);
                }
            },
            Action::Close { client } => {
                slots[client as usize % CLIENTS].clear.peer_close();
            },
        }

        for slot in &slots {
            let identity = slot.clear.id();
            if !slot.clear.is_open() {
                assert!(!processor.keys().contains(identity));
                assert!(!processor.pending().contains(identity));
            } else if let Some(active) = processor.keys().get(identity) {
                if slot.client.active_key().is_some() {
                    assert_eq!(slot.client.active_key(), Some(active.as_ref()));
                }
            }
        }
    }

    processor.shutdown();
});
