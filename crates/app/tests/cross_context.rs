//! Two contexts sharing one bus, the way two open tabs share a channel

use std::time::Duration;

use common::broadcast::LocalBus;
use common::ids::{DishId, ImageId, RestaurantId};
use common::invalidation::{full_menu_key, QueryKey, SnapshotStore};
use common::menu::{Dish, FullMenu, MenuUpdate};
use menuboard::{Config, MenuTarget, SyncContext};

fn menu(restaurant: &str) -> FullMenu {
    let mut menu = FullMenu::empty(RestaurantId::new(restaurant));
    menu.upsert_dish(Dish {
        id: DishId::new("d1"),
        category_id: "mains".into(),
        name: "Gnocchi".into(),
        description: None,
        price_cents: 1500,
        image_id: None,
        is_available: true,
        position: 0,
    });
    menu
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

async fn pair(bus: &LocalBus) -> (SyncContext, SyncContext) {
    let config = Config::default();
    let editor = SyncContext::builder(&config).bus(bus).build().await.unwrap();
    let viewer = SyncContext::builder(&config).bus(bus).build().await.unwrap();
    (editor, viewer)
}

#[tokio::test]
async fn test_saved_dish_evicts_other_context_menu() {
    let bus = LocalBus::new();
    let (editor, viewer) = pair(&bus).await;
    let r1 = RestaurantId::new("r1");
    viewer.store_menu(&menu("r1")).unwrap();
    viewer.store_menu(&menu("r2")).unwrap();
    viewer
        .queries()
        .insert(QueryKey::Restaurants, serde_json::json!([]));

    let target = MenuTarget::new("r1");
    let result: Result<(), String> = editor
        .mutate_dish(
            &target,
            &DishId::new("d1"),
            Some(MenuUpdate::remove_dish(DishId::new("d1"))),
            async { Ok(()) },
        )
        .await;
    assert!(result.is_ok());

    let full_menu = QueryKey::full_menu("r1");
    assert!(wait_until(|| !viewer.queries().contains(&full_menu)).await);
    assert_eq!(viewer.snapshots().get(&full_menu_key(&r1)).unwrap(), None);

    // unrelated entries survive
    assert!(viewer.queries().contains(&QueryKey::full_menu("r2")));
    assert!(viewer.queries().contains(&QueryKey::Restaurants));

    editor.shutdown().await;
    viewer.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_broadcasts_nothing() {
    let bus = LocalBus::new();
    let (editor, viewer) = pair(&bus).await;
    viewer.store_menu(&menu("r1")).unwrap();

    let result: Result<(), String> = editor
        .upload_image(&MenuTarget::new("r1"), &ImageId::new("img-1"), async {
            Err("upload rejected".into())
        })
        .await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(viewer.queries().contains(&QueryKey::full_menu("r1")));

    editor.shutdown().await;
    viewer.shutdown().await;
}

#[tokio::test]
async fn test_restaurant_update_evicts_listing_and_slug() {
    let bus = LocalBus::new();
    let (editor, viewer) = pair(&bus).await;
    for key in [
        QueryKey::Restaurants,
        QueryKey::restaurant("r1"),
        QueryKey::restaurant("chez-r1"),
        QueryKey::full_menu("r1"),
    ] {
        viewer.queries().insert(key, serde_json::json!({}));
    }

    let target = MenuTarget::new("r1").with_slug("chez-r1");
    let result: Result<(), String> = editor.update_restaurant(&target, async { Ok(()) }).await;
    assert!(result.is_ok());

    assert!(wait_until(|| !viewer.queries().contains(&QueryKey::Restaurants)).await);
    assert!(!viewer.queries().contains(&QueryKey::restaurant("r1")));
    assert!(!viewer.queries().contains(&QueryKey::restaurant("chez-r1")));
    assert!(viewer.queries().contains(&QueryKey::full_menu("r1")));

    editor.shutdown().await;
    viewer.shutdown().await;
}

#[tokio::test]
async fn test_sender_hears_its_own_invalidation() {
    let bus = LocalBus::new();
    let config = Config::default();
    let solo = SyncContext::builder(&config).bus(&bus).build().await.unwrap();
    solo.store_menu(&menu("r1")).unwrap();

    solo.broadcaster()
        .broadcast_menu_invalidation(&RestaurantId::new("r1"), None);

    let key = QueryKey::full_menu("r1");
    assert!(wait_until(|| !solo.queries().contains(&key)).await);
    solo.shutdown().await;
}

#[tokio::test]
async fn test_isolated_context_keeps_working_without_bus() {
    let isolated = SyncContext::builder(&Config::default()).build().await.unwrap();
    let dish = DishId::new("d1");

    let result: Result<u32, String> = isolated
        .mutate_dish(&MenuTarget::new("r1"), &dish, None, async { Ok(7) })
        .await;

    assert_eq!(result, Ok(7));
    assert!(!isolated.tracker().is_dish_syncing(&dish));
    isolated.shutdown().await;
}
