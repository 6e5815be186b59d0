use chrono::{DateTime, TimeZone, Utc};
use creditgate::{
    BackendKind, DeviceId, EntitlementConfig, EntitlementError, EntitlementEvent,
    EntitlementService, EntitlementState, EntitlementStore, Feature, GrantChannel, Identity,
    InMemoryRemoteStore, LocalStore, ManualClock, MemoryLocalStore, RemoteStore, SpendChannel,
    StoreContext, Tier, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 9, 30, 0).unwrap()
}

fn context(
    clock: &ManualClock,
    local: &Arc<MemoryLocalStore>,
    remote: &InMemoryRemoteStore,
) -> StoreContext {
    StoreContext::new(
        EntitlementConfig::default(),
        Arc::new(clock.clone()),
        local.clone(),
        Arc::new(remote.clone()),
    )
}

fn anonymous() -> Identity {
    Identity::Anonymous(DeviceId::generate())
}

fn user(id: &str) -> Identity {
    Identity::User(UserId::new(id))
}

#[tokio::test]
async fn new_anonymous_identity_spends_down_to_upsell() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let service = EntitlementService::new(context(&clock, &local, &InMemoryRemoteStore::default()));
    service.bind(anonymous()).await.unwrap();

    assert_eq!(
        service.state(),
        EntitlementState {
            tier: Tier::Free,
            fuel_credits: 10,
            power_credits: 0,
            search_queries: 0,
            last_reset_date: at(2026, 5, 10),
        }
    );

    assert!(service.check_allowance(1, Feature::Doc));
    assert!(service.spend(1, SpendChannel::Fuel).await.unwrap());
    assert_eq!(service.state().fuel_credits, 9);

    for _ in 0..9 {
        assert!(service.check_allowance(1, Feature::Doc));
        assert!(service.spend(1, SpendChannel::Fuel).await.unwrap());
    }
    assert_eq!(service.state().fuel_credits, 0);
    assert!(!service.upsell().is_open());

    assert!(!service.check_allowance(1, Feature::Doc));
    assert!(service.upsell().is_open());
    assert!(!service.spend(1, SpendChannel::Fuel).await.unwrap());

    // The device slot and the mirror never diverge on the anonymous path.
    assert_eq!(local.get().unwrap(), Some(service.state()));
}

#[tokio::test]
async fn anonymous_record_is_reloaded_from_device_slot() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let remote = InMemoryRemoteStore::default();

    let first = EntitlementStore::bind(anonymous(), &context(&clock, &local, &remote))
        .await
        .unwrap();
    assert_eq!(first.backend_kind(), BackendKind::Local);
    first.grant(25, GrantChannel::Power).await.unwrap();
    drop(first);

    let second = EntitlementStore::bind(anonymous(), &context(&clock, &local, &remote))
        .await
        .unwrap();
    assert_eq!(second.power_credits(), 25);
    assert_eq!(remote.write_count().await, 0);
}

#[tokio::test]
async fn spend_priority_search_then_power_then_fuel() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();

    store.upgrade_tier(Tier::Scholar).await.unwrap();
    store.grant(5, GrantChannel::Power).await.unwrap();
    assert_eq!(store.search_queries(), 10);
    assert_eq!(store.fuel_credits(), 300);

    // Search allowance: exactly one query, whatever the cost.
    assert!(store.spend(50, SpendChannel::Search).await.unwrap());
    assert_eq!(store.search_queries(), 9);
    assert_eq!(store.power_credits(), 5);
    assert_eq!(store.fuel_credits(), 300);

    // Power before fuel.
    assert!(store.spend(3, SpendChannel::Fuel).await.unwrap());
    assert_eq!(store.power_credits(), 2);
    assert_eq!(store.fuel_credits(), 300);

    // Power can't cover it on its own, so fuel pays in full.
    assert!(store.spend(3, SpendChannel::Power).await.unwrap());
    assert_eq!(store.power_credits(), 2);
    assert_eq!(store.fuel_credits(), 297);
}

#[tokio::test]
async fn insufficient_spend_leaves_record_untouched() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();
    store.grant(4, GrantChannel::Power).await.unwrap();

    let before = store.state();
    for channel in [SpendChannel::Fuel, SpendChannel::Power, SpendChannel::Search] {
        assert!(!store.spend(11, channel).await.unwrap());
    }
    assert_eq!(store.state(), before);
    assert_eq!(local.get().unwrap(), Some(before));
}

#[tokio::test]
async fn zero_amounts_are_rejected() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();

    assert!(matches!(
        store.spend(0, SpendChannel::Fuel).await,
        Err(EntitlementError::InvalidAmount(_))
    ));
    assert!(matches!(
        store.grant(0, GrantChannel::Fuel).await,
        Err(EntitlementError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn upgrade_takes_max_with_baseline() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();
    let mut events = store.events();

    store.grant(1490, GrantChannel::Fuel).await.unwrap();
    assert_eq!(store.fuel_credits(), 1500);

    store.upgrade_tier(Tier::Pro).await.unwrap();
    assert_eq!(store.tier(), Tier::Pro);
    assert_eq!(store.fuel_credits(), 1500);

    assert_eq!(
        events.recv().await.unwrap(),
        EntitlementEvent::CreditsGranted {
            channel: GrantChannel::Fuel,
            amount: 1490
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        EntitlementEvent::TierUpgraded { tier: Tier::Pro }
    );
}

#[tokio::test]
async fn monthly_reset_is_hard_and_keeps_power() {
    let clock = ManualClock::new(at(2026, 1, 15));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();

    store.upgrade_tier(Tier::Scholar).await.unwrap();
    store.grant(7, GrantChannel::Power).await.unwrap();
    store.grant(50, GrantChannel::Fuel).await.unwrap();
    assert!(store.spend(1, SpendChannel::Search).await.unwrap());

    clock.set(at(2026, 1, 31));
    assert!(!store.check_reset().await.unwrap());
    assert_eq!(store.fuel_credits(), 350);

    clock.set(at(2026, 2, 1));
    assert!(store.check_reset().await.unwrap());
    assert_eq!(store.fuel_credits(), 300);
    assert_eq!(store.search_queries(), 10);
    assert_eq!(store.power_credits(), 7);
    assert_eq!(store.last_reset_date(), at(2026, 2, 1));

    assert!(!store.check_reset().await.unwrap());
}

#[tokio::test]
async fn stale_month_resets_before_spend_is_evaluated() {
    let clock = ManualClock::new(at(2026, 3, 20));
    let local = Arc::new(MemoryLocalStore::new());
    let ctx = context(&clock, &local, &InMemoryRemoteStore::default());
    let store = EntitlementStore::bind(anonymous(), &ctx).await.unwrap();

    store.upgrade_tier(Tier::Scholar).await.unwrap();
    for _ in 0..10 {
        assert!(store.spend(1, SpendChannel::Search).await.unwrap());
    }
    assert!(store.spend(300, SpendChannel::Fuel).await.unwrap());
    assert_eq!(store.search_queries(), 0);
    assert_eq!(store.fuel_credits(), 0);

    clock.set(at(2026, 4, 2));
    assert!(store.spend(1, SpendChannel::Search).await.unwrap());
    assert_eq!(store.search_queries(), 9);
    assert_eq!(store.fuel_credits(), 300);
    assert_eq!(store.last_reset_date(), at(2026, 4, 2));
}

#[tokio::test]
async fn stale_record_is_reset_on_bind() {
    let clock = ManualClock::new(at(2026, 6, 1));
    let mut stale = EntitlementState::initial(&EntitlementConfig::default(), at(2026, 4, 3));
    stale.tier = Tier::Pro;
    stale.fuel_credits = 12;
    stale.power_credits = 3;
    let local = Arc::new(MemoryLocalStore::new());
    local.set(&stale).unwrap();

    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();
    assert_eq!(store.fuel_credits(), 1000);
    assert_eq!(store.power_credits(), 3);
    assert_eq!(store.last_reset_date(), at(2026, 6, 1));
    assert!(store.reset_on_bind());

    // Already reset this month: a second session reports nothing new.
    drop(store);
    let again = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();
    assert!(!again.reset_on_bind());
    assert!(!again.check_reset().await.unwrap());
}

#[tokio::test]
async fn authenticated_identity_initializes_remote_record() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let remote = InMemoryRemoteStore::default();
    let store = EntitlementStore::bind(user("u1"), &context(&clock, &local, &remote))
        .await
        .unwrap();

    assert_eq!(store.backend_kind(), BackendKind::Remote);
    let stored = remote.get(&UserId::new("u1")).await.unwrap().unwrap();
    assert_eq!(stored, store.state());
    assert_eq!(stored.fuel_credits, 10);
    assert!(local.get().unwrap().is_none());
}

#[tokio::test]
async fn remote_failure_surfaces_and_keeps_mirror() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let remote = InMemoryRemoteStore::default();
    let id = UserId::new("u1");
    let store = EntitlementStore::bind(user("u1"), &context(&clock, &local, &remote))
        .await
        .unwrap();

    remote.set_available(false).await;
    let err = store.spend(1, SpendChannel::Fuel).await.unwrap_err();
    assert!(err.is_transient());
    assert!(store.grant(5, GrantChannel::Power).await.is_err());
    assert!(store.upgrade_tier(Tier::Pro).await.is_err());
    assert_eq!(store.fuel_credits(), 10);
    assert_eq!(store.power_credits(), 0);
    assert_eq!(store.tier(), Tier::Free);

    remote.set_available(true).await;
    assert!(store.spend(1, SpendChannel::Fuel).await.unwrap());
    assert_eq!(store.fuel_credits(), 9);
    assert_eq!(remote.get(&id).await.unwrap().unwrap().fuel_credits, 9);
}

#[tokio::test]
async fn remote_writes_send_only_changed_fields() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let remote = InMemoryRemoteStore::default();
    let id = UserId::new("u1");
    let store = EntitlementStore::bind(user("u1"), &context(&clock, &local, &remote))
        .await
        .unwrap();

    // Another writer bumps power behind this store's back.
    let mut document = remote.document(&id).await.unwrap();
    document["powerCredits"] = serde_json::json!(40);
    remote.put_raw(&id, document).await;

    assert!(store.spend(1, SpendChannel::Search).await.unwrap());
    let stored = remote.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.power_credits, 40);
    assert_eq!(stored.fuel_credits, 9);
}

#[tokio::test]
async fn other_device_changes_reach_the_mirror() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let remote = InMemoryRemoteStore::default();
    let laptop_slot = Arc::new(MemoryLocalStore::new());
    let phone_slot = Arc::new(MemoryLocalStore::new());

    let laptop = EntitlementStore::bind(user("u1"), &context(&clock, &laptop_slot, &remote))
        .await
        .unwrap();
    let phone = EntitlementStore::bind(user("u1"), &context(&clock, &phone_slot, &remote))
        .await
        .unwrap();
    let mut phone_view = phone.watch();
    let mut phone_events = phone.events();

    laptop.grant(30, GrantChannel::Power).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while phone_view.borrow_and_update().power_credits != 30 {
            phone_view.changed().await.unwrap();
        }
    })
    .await
    .expect("phone mirror never caught up");

    let event = timeout(Duration::from_secs(2), phone_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, EntitlementEvent::RemoteSync);

    // Once synced, the phone spends from the shared balance.
    assert!(phone.spend(30, SpendChannel::Power).await.unwrap());
    assert_eq!(remote.get(&UserId::new("u1")).await.unwrap().unwrap().power_credits, 0);
}

#[tokio::test]
async fn removed_remote_record_is_recreated_with_defaults() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let remote = InMemoryRemoteStore::default();
    let id = UserId::new("u1");
    let store = EntitlementStore::bind(user("u1"), &context(&clock, &local, &remote))
        .await
        .unwrap();
    store.grant(99, GrantChannel::Power).await.unwrap();
    let mut events = store.events();

    assert!(remote.remove(&id).await);

    timeout(Duration::from_secs(2), async {
        loop {
            if events.recv().await.unwrap() == EntitlementEvent::Reinitialized {
                break;
            }
        }
    })
    .await
    .expect("record was not re-created");

    assert_eq!(store.power_credits(), 0);
    assert_eq!(store.fuel_credits(), 10);
    assert_eq!(remote.get(&id).await.unwrap().unwrap().power_credits, 0);
}

#[tokio::test]
async fn closed_store_refuses_operations() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();

    store.close();
    assert!(store.is_closed());
    assert!(matches!(
        store.spend(1, SpendChannel::Fuel).await,
        Err(EntitlementError::StoreClosed)
    ));
    assert!(matches!(
        store.check_reset().await,
        Err(EntitlementError::StoreClosed)
    ));
    assert_eq!(store.fuel_credits(), 10);
}

#[tokio::test]
async fn mixed_operation_sequence_matches_model() {
    let clock = ManualClock::new(at(2026, 5, 10));
    let local = Arc::new(MemoryLocalStore::new());
    let store = EntitlementStore::bind(
        anonymous(),
        &context(&clock, &local, &InMemoryRemoteStore::default()),
    )
    .await
    .unwrap();
    store.upgrade_tier(Tier::Scholar).await.unwrap();

    let mut model = store.state();
    let mut seed: u64 = 0x5eed;
    for _ in 0..400 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let amount = (seed >> 33) % 40 + 1;
        match (seed >> 20) % 5 {
            0 => {
                store.grant(amount, GrantChannel::Power).await.unwrap();
                model = model.grant(amount, GrantChannel::Power);
            }
            1 => {
                let spent = store.spend(amount, SpendChannel::Search).await.unwrap();
                let expected = model.spend(amount, SpendChannel::Search);
                assert_eq!(spent, expected.is_some());
                if let Some((next, _)) = expected {
                    model = next;
                }
            }
            _ => {
                let spent = store.spend(amount, SpendChannel::Fuel).await.unwrap();
                let expected = model.spend(amount, SpendChannel::Fuel);
                assert_eq!(spent, expected.is_some());
                if let Some((next, _)) = expected {
                    model = next;
                }
            }
        }
        assert_eq!(store.state(), model);
    }
    assert_eq!(local.get().unwrap(), Some(model));
}
