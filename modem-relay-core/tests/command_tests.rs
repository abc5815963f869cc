//! Command Dispatcher Tests
//!
//! Drives chat commands end to end against a simulated modem:
//! - Authorization of admin-only commands
//! - The list then delete flow through the per-chat reference cache
//! - Usage errors and failed engine calls rendered as replies
//! - eSIM commands with and without the capability

mod common;

use std::sync::Arc;

use common::{simulated_engine, ADMIN, MODEM};
use modem_relay_core::bus::BusCall;
use modem_relay_core::engine::ModemManagerEngine;
use modem_relay_core::{
    ChatId, CommandRequest, CommandTable, Dispatcher, Engine, MemoryBus, ModemBus,
    SmsReferenceCache,
};

const STRANGER: ChatId = ChatId(7);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("modem_relay_core=debug")
        .with_test_writer()
        .try_init();
}

async fn dispatcher() -> (Dispatcher, Arc<MemoryBus>, Arc<SmsReferenceCache>) {
    init_tracing();
    let (engine, bus) = simulated_engine().await;
    let cache = Arc::new(SmsReferenceCache::new());
    let dispatcher = Dispatcher::new(
        Arc::new(engine),
        Arc::clone(&cache),
        CommandTable::standard().unwrap(),
        ADMIN,
    );
    (dispatcher, bus, cache)
}

async fn run(dispatcher: &Dispatcher, chat: ChatId, text: &str) -> String {
    let request = CommandRequest::parse(text, chat).expect("text is a command");
    dispatcher
        .dispatch(&request)
        .await
        .expect("command is known")
}

/// Public commands answer everyone
#[tokio::test]
async fn test_getid_is_public() {
    let (dispatcher, _, _) = dispatcher().await;
    assert_eq!(run(&dispatcher, STRANGER, "/getid").await, "Your chat id: 7");
}

/// Admin commands refuse other chats without touching the modem
#[tokio::test]
async fn test_admin_commands_refuse_strangers() {
    let (dispatcher, bus, _) = dispatcher().await;

    for text in ["/status", "/sms", "/data on", "/sendsms +1555 hi", "/esim info"] {
        assert_eq!(run(&dispatcher, STRANGER, text).await, "Not authorized.");
    }
    assert!(!bus
        .calls()
        .iter()
        .any(|c| matches!(c, BusCall::SimpleConnect { .. } | BusCall::MessagingCreate { .. })));
}

/// Help lists admin commands only for the admin chat
#[tokio::test]
async fn test_help_depends_on_chat() {
    let (dispatcher, _, _) = dispatcher().await;

    let public = run(&dispatcher, STRANGER, "/help").await;
    assert!(public.contains("/getid"));
    assert!(!public.contains("/sendsms"));

    let admin = run(&dispatcher, ADMIN, "/help").await;
    assert!(admin.contains("/sendsms <number> <text>"));
    assert!(admin.contains("/esim info|power|on|off"));
}

/// Unknown commands get no reply at all
#[tokio::test]
async fn test_unknown_command_is_ignored() {
    let (dispatcher, _, _) = dispatcher().await;
    let request = CommandRequest::parse("/reboot", ADMIN).unwrap();
    assert!(dispatcher.dispatch(&request).await.is_none());
}

#[tokio::test]
async fn test_status_reply() {
    let (dispatcher, _, _) = dispatcher().await;
    let reply = run(&dispatcher, ADMIN, "/status").await;
    assert!(reply.contains("State: Registered"));
    assert!(reply.contains("Technology: LTE"));
    assert!(reply.contains("Quality: 72%"));
    assert!(reply.contains("SNR: 12.4 dB"));
}

/// Listing fills the cache, deleting consumes the ID
#[tokio::test]
async fn test_list_then_delete() {
    let (dispatcher, bus, cache) = dispatcher().await;

    let listing = run(&dispatcher, ADMIN, "/sms").await;
    assert!(listing.starts_with("2 message(s):"));
    assert!(listing.contains("[0] From: +15550100"));
    assert!(listing.contains("Your code is 4711"));
    assert_eq!(cache.len(ADMIN), 2);

    assert_eq!(run(&dispatcher, ADMIN, "/deletesms 1").await, "Message 1 deleted.");
    assert!(bus.calls().contains(&BusCall::MessagingDelete {
        modem: MODEM.to_string(),
        sms: "/org/freedesktop/ModemManager1/SMS/1".to_string(),
    }));
    assert_eq!(cache.len(ADMIN), 1);

    let again = run(&dispatcher, ADMIN, "/deletesms 1").await;
    assert!(again.starts_with("/deletesms failed:"));
    assert!(again.contains("Unknown message id '1'"));
}

/// Deleting before any listing points the user at /sms
#[tokio::test]
async fn test_delete_without_listing() {
    let (dispatcher, bus, _) = dispatcher().await;
    let reply = run(&dispatcher, ADMIN, "/deletesms 0").await;
    assert_eq!(
        reply,
        "/deletesms failed: No messages listed yet. Run /sms first."
    );
    assert!(bus.has_object("/org/freedesktop/ModemManager1/SMS/0"));
}

/// A failed bus delete keeps the cache entry so the user can retry
#[tokio::test]
async fn test_failed_delete_keeps_reference() {
    let (dispatcher, bus, cache) = dispatcher().await;
    run(&dispatcher, ADMIN, "/sms").await;

    bus.fail("Delete", "modem busy");
    let reply = run(&dispatcher, ADMIN, "/deletesms 0").await;
    assert!(reply.starts_with("/deletesms failed:"));
    assert_eq!(cache.len(ADMIN), 2);

    bus.clear_failures();
    assert_eq!(run(&dispatcher, ADMIN, "/deletesms 0").await, "Message 0 deleted.");
}

#[tokio::test]
async fn test_sendsms() {
    let (dispatcher, bus, _) = dispatcher().await;

    let reply = run(&dispatcher, ADMIN, "/sendsms +15550111 running late, sorry").await;
    assert_eq!(reply, "SMS sent to +15550111.");
    assert!(bus.calls().contains(&BusCall::MessagingCreate {
        modem: MODEM.to_string(),
        number: "+15550111".to_string(),
        text: "running late, sorry".to_string(),
    }));
}

#[tokio::test]
async fn test_usage_errors() {
    let (dispatcher, bus, _) = dispatcher().await;

    let reply = run(&dispatcher, ADMIN, "/sendsms +15550111").await;
    assert!(reply.contains("usage: /sendsms <number> <text>"));

    let reply = run(&dispatcher, ADMIN, "/data maybe").await;
    assert!(reply.contains("usage: /data on|off"));

    let reply = run(&dispatcher, ADMIN, "/deletesms").await;
    assert!(reply.contains("usage: /deletesms <id>"));

    let reply = run(&dispatcher, ADMIN, "/switchsim two").await;
    assert!(reply.contains("'two' is not a slot number"));

    assert!(bus.calls().iter().all(|c| matches!(c, BusCall::SignalSetup { .. })));
}

/// Turning data on twice connects once and reports success both times
#[tokio::test]
async fn test_data_on_twice() {
    let (dispatcher, bus, _) = dispatcher().await;

    assert_eq!(run(&dispatcher, ADMIN, "/data on").await, "Mobile data enabled.");
    assert_eq!(run(&dispatcher, ADMIN, "/data ON").await, "Mobile data enabled.");
    let connects = bus
        .calls()
        .iter()
        .filter(|c| matches!(c, BusCall::SimpleConnect { .. }))
        .count();
    assert_eq!(connects, 1);

    assert_eq!(run(&dispatcher, ADMIN, "/data off").await, "Mobile data disabled.");
}

#[tokio::test]
async fn test_switchsim() {
    let (dispatcher, bus, _) = dispatcher().await;
    assert_eq!(
        run(&dispatcher, ADMIN, "/switchsim 2").await,
        "Requested switch to SIM slot 2."
    );
    assert!(bus.calls().contains(&BusCall::SetCurrentSlots {
        modem: MODEM.to_string(),
        slot: 2,
    }));
}

#[tokio::test]
async fn test_esim_commands() {
    let (dispatcher, _, _) = dispatcher().await;

    let info = run(&dispatcher, ADMIN, "/esim").await;
    assert!(info.contains("ICCID: 8944500000000000001"));
    assert!(info.contains("eSIM state: enabled"));
    assert!(info.contains("EID: 89049032000000000000000000000001"));

    assert_eq!(run(&dispatcher, ADMIN, "/esim off").await, "eSIM module disabled.");
    assert!(run(&dispatcher, ADMIN, "/esim power")
        .await
        .starts_with("eSIM module disabled"));

    let reply = run(&dispatcher, ADMIN, "/esim reset").await;
    assert!(reply.contains("unknown esim subcommand 'reset'"));
}

/// Without a serial channel the eSIM commands report the missing capability
#[tokio::test]
async fn test_esim_without_capability() {
    init_tracing();
    let bus = Arc::new(MemoryBus::simulated());
    let dyn_bus: Arc<dyn ModemBus> = bus.clone();
    let mut engine = ModemManagerEngine::new(dyn_bus, None);
    engine.init().await.unwrap();
    assert!(engine.esim().is_none());

    let dispatcher = Dispatcher::new(
        Arc::new(engine),
        Arc::new(SmsReferenceCache::new()),
        CommandTable::standard().unwrap(),
        ADMIN,
    );
    let reply = run(&dispatcher, ADMIN, "/esim info").await;
    assert!(reply.starts_with("/esim failed:"));
    assert!(reply.contains("eSIM management"));
}

/// Each chat has its own listing
#[tokio::test]
async fn test_listings_are_per_chat() {
    let (engine, _bus) = simulated_engine().await;
    let cache = Arc::new(SmsReferenceCache::new());
    let second_admin = ChatId(ADMIN.0 + 1);
    let dispatcher = Dispatcher::new(
        Arc::new(engine),
        Arc::clone(&cache),
        CommandTable::standard().unwrap(),
        ADMIN,
    );

    run(&dispatcher, ADMIN, "/sms").await;
    assert_eq!(cache.len(ADMIN), 2);
    assert_eq!(cache.len(second_admin), 0);
}
