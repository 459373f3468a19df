mod common;

use chrono::Utc;
use fediref_db::DataStore;
use fediref_models::{Account, Status};
use serde_json::json;

use common::*;

const ALICE: &str = "https://example.org/users/alice";
const FEATURED: &str = "https://example.org/users/alice/collections/featured";

fn status_uri(n: u32) -> String {
    format!("{ALICE}/statuses/{n}")
}

async fn alice(h: &Harness) -> Account {
    let mut account = stored_account(1, ALICE, "alice", "example.org", chrono::Duration::minutes(1));
    account.featured_collection_uri = Some(FEATURED.to_string());
    h.store.put_account(&account).await.expect("account");
    account
}

async fn stored_status(h: &Harness, account: &Account, n: u32, pinned: bool) -> Status {
    let now = Utc::now();
    let status = Status {
        id: 100 + i64::from(n),
        uri: status_uri(n),
        account_id: account.id,
        account_uri: account.uri.clone(),
        content: Some(format!("<p>status {n}</p>")),
        pinned_at: pinned.then(|| now - chrono::Duration::days(1)),
        created_at: Some(now - chrono::Duration::days(2)),
        updated_at: Some(now),
        fetched_at: Some(now),
        ..Default::default()
    };
    h.store.inner().put_status(&status).await.expect("status");
    status
}

#[tokio::test]
async fn pinned_set_follows_the_featured_collection() {
    let h = Harness::new().await;
    let account = alice(&h).await;
    stored_status(&h, &account, 1, true).await;
    stored_status(&h, &account, 2, true).await;
    h.transport.serve(&status_uri(3), note(&status_uri(3), ALICE));
    h.transport.serve(
        FEATURED,
        ordered_collection(FEATURED, &[status_uri(2).as_str(), status_uri(3).as_str()]),
    );

    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect("featured");

    let pinned: Vec<String> = h
        .store
        .get_account_pinned_statuses(account.id)
        .await
        .expect("pinned")
        .into_iter()
        .map(|s| s.uri)
        .collect();
    assert_eq!(pinned.len(), 2);
    assert!(pinned.contains(&status_uri(2)));
    assert!(pinned.contains(&status_uri(3)));

    let s1 = h.store.get_status_by_uri(&status_uri(1)).await.expect("s1");
    assert!(s1.pinned_at.is_none());
    assert_eq!(
        h.store.status_updates_of(&status_uri(1)),
        vec![vec!["pinned_at".to_string()]]
    );
    // Already pinned and still listed: untouched.
    assert!(h.store.status_updates_of(&status_uri(2)).is_empty());
    assert_eq!(
        h.store.status_updates_of(&status_uri(3)),
        vec![vec!["pinned_at".to_string()]]
    );
    assert_eq!(h.store.status_puts(), vec![status_uri(3)]);
}

#[tokio::test]
async fn foreign_and_unresolvable_items_are_skipped() {
    const FOREIGN: &str = "https://elsewhere.example/users/eve/statuses/1";
    let h = Harness::new().await;
    let account = alice(&h).await;

    // Same host, different author.
    const CAROL: &str = "https://example.org/users/carol";
    let carol = stored_account(2, CAROL, "carol", "example.org", chrono::Duration::minutes(1));
    h.store.put_account(&carol).await.expect("carol");
    let carols = "https://example.org/users/carol/statuses/9";
    h.transport.serve(carols, note(carols, CAROL));

    let missing = status_uri(404);
    h.transport.fail(&missing, 404);
    h.transport.serve(&status_uri(5), note(&status_uri(5), ALICE));
    h.transport.serve(
        FEATURED,
        ordered_collection(FEATURED, &[FOREIGN, carols, missing.as_str(), status_uri(5).as_str()]),
    );

    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect("featured");

    assert_eq!(h.transport.dereferences_of(FOREIGN), 0);
    let pinned: Vec<String> = h
        .store
        .get_account_pinned_statuses(account.id)
        .await
        .expect("pinned")
        .into_iter()
        .map(|s| s.uri)
        .collect();
    assert_eq!(pinned, vec![status_uri(5)]);

    let carols = h.store.get_status_by_uri(carols).await.expect("stored");
    assert!(carols.pinned_at.is_none());
}

#[tokio::test]
async fn pinned_boosts_are_skipped() {
    let h = Harness::new().await;
    let account = alice(&h).await;
    let boosted = stored_status(&h, &account, 1, false).await;
    let boost = format!("{ALICE}/statuses/2/activity");
    h.transport.serve(
        &boost,
        json!({
            "id": boost,
            "type": "Announce",
            "actor": ALICE,
            "object": boosted.uri,
        }),
    );
    h.transport
        .serve(FEATURED, ordered_collection(FEATURED, &[boost.as_str()]));

    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect("featured");

    let stored = h.store.get_status_by_uri(&boost).await.expect("boost stored");
    assert_eq!(stored.boost_of_id, Some(boosted.id));
    assert!(stored.pinned_at.is_none());
    assert!(h
        .store
        .get_account_pinned_statuses(account.id)
        .await
        .expect("pinned")
        .is_empty());
}

#[tokio::test]
async fn paged_collection_is_walked_to_the_end() {
    let h = Harness::new().await;
    let account = alice(&h).await;
    let page1 = format!("{FEATURED}?page=1");
    let page2 = format!("{FEATURED}?page=2");
    h.transport.serve(
        FEATURED,
        json!({
            "id": FEATURED,
            "type": "OrderedCollection",
            "totalItems": 2,
            "first": page1,
        }),
    );
    h.transport.serve(
        &page1,
        json!({
            "id": page1,
            "type": "OrderedCollectionPage",
            "orderedItems": [status_uri(1)],
            "next": page2,
        }),
    );
    h.transport.serve(
        &page2,
        json!({
            "id": page2,
            "type": "OrderedCollectionPage",
            "orderedItems": [status_uri(2)],
        }),
    );
    h.transport.serve(&status_uri(1), note(&status_uri(1), ALICE));
    h.transport.serve(&status_uri(2), note(&status_uri(2), ALICE));

    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect("featured");

    assert_eq!(h.transport.dereferences_of(&page1), 1);
    assert_eq!(h.transport.dereferences_of(&page2), 1);
    let pinned = h
        .store
        .get_account_pinned_statuses(account.id)
        .await
        .expect("pinned");
    assert_eq!(pinned.len(), 2);
}

#[tokio::test]
async fn local_and_suspended_accounts_are_skipped() {
    let h = Harness::new().await;
    let mut account = alice(&h).await;
    account.suspended_at = Some(Utc::now());
    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect("suspended");

    account.suspended_at = None;
    account.domain = None;
    h.deref
        .dereference_account_featured(REQUESTER.to_string(), account)
        .await
        .expect("local");
    assert_eq!(h.transport.total_calls(), 0);
}

#[tokio::test]
async fn unreachable_collection_is_an_error_and_keeps_pins() {
    let h = Harness::new().await;
    let account = alice(&h).await;
    stored_status(&h, &account, 1, true).await;
    h.transport.fail(FEATURED, 503);

    let err = h
        .deref
        .dereference_account_featured(REQUESTER.to_string(), account.clone())
        .await
        .expect_err("unreachable");
    assert!(err.is_unretrievable());
    let pinned = h
        .store
        .get_account_pinned_statuses(account.id)
        .await
        .expect("pinned");
    assert_eq!(pinned.len(), 1);
}
