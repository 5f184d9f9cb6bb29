use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use owo_colors::OwoColorize;
use parking_lot::Mutex;

use crate::cli::op::{Op, OpContext};
use common::broadcast::LocalBus;
use common::ids::{DishId, RestaurantId};
use common::invalidation::QueryKey;
use common::menu::{Dish, FullMenu, MenuUpdate};
use common::menu_sync::MenuSyncMessage;
use menuboard::config::SnapshotBackend;
use menuboard::{ContextError, MenuTarget, SyncContext};

/// Simulate an editor and a diner view sharing one channel
#[derive(Args, Debug, Clone)]
pub struct Demo {
    /// Restaurant to edit
    #[arg(long, default_value = "demo-bistro")]
    pub restaurant: String,

    /// Public slug of the restaurant
    #[arg(long)]
    pub slug: Option<String>,

    /// New name for the demo dish
    #[arg(long, default_value = "Roasted tomato soup")]
    pub name: String,

    /// Simulated backend latency in milliseconds
    #[arg(long, default_value = "50")]
    pub latency_ms: u64,

    /// Make the simulated backend write fail
    #[arg(long)]
    pub fail: bool,
}

#[derive(Debug)]
pub struct DemoOutput {
    pub restaurant_id: RestaurantId,
    pub saved: bool,
    pub optimistic_name: Option<String>,
    pub sync_transitions: usize,
    pub refetch_requests: usize,
    pub viewer_evicted: Vec<QueryKey>,
}

#[async_trait::async_trait]
impl Op for Demo {
    type Error = DemoError;
    type Output = DemoOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = ctx.config.clone();
        config.snapshots.backend = SnapshotBackend::Memory;

        let bus = LocalBus::new();
        let editor = SyncContext::builder(&config).bus(&bus).build().await?;
        let viewer = SyncContext::builder(&config).bus(&bus).build().await?;

        let restaurant_id = RestaurantId::new(self.restaurant.as_str());
        let dish_id = DishId::new("d1");
        let menu = seed_menu(&restaurant_id, &dish_id);
        editor.store_menu(&menu)?;
        viewer.store_menu(&menu)?;

        // editor-side view applying optimistic updates to its copy
        let view = Arc::new(Mutex::new(menu));
        let refetches = Arc::new(Mutex::new(0usize));
        let (view_copy, refetch_count) = (view.clone(), refetches.clone());
        let view_sub = editor.emitter().subscribe(&restaurant_id, move |message| match message {
            MenuSyncMessage::Update(update) => update.apply(&mut view_copy.lock()),
            MenuSyncMessage::Refetch => *refetch_count.lock() += 1,
        });

        let transitions = Arc::new(Mutex::new(0usize));
        let transition_count = transitions.clone();
        let tracker_sub = editor.tracker().subscribe(move || *transition_count.lock() += 1);

        let mut target = MenuTarget::new(restaurant_id.clone());
        if let Some(slug) = &self.slug {
            target = target.with_slug(slug.clone());
        }

        let new_name = self.name.clone();
        let renamed_id = dish_id.clone();
        let optimistic = MenuUpdate::new(move |menu| {
            if let Some(dish) = menu.dish_mut(&renamed_id) {
                dish.name = new_name.clone();
            }
        });

        let latency = Duration::from_millis(self.latency_ms);
        let fail = self.fail;
        let optimistic_view = view.clone();
        let observed_name = Arc::new(Mutex::new(None));
        let observed = observed_name.clone();
        let probe_id = dish_id.clone();
        let saved = editor
            .mutate_dish(&target, &dish_id, Some(optimistic), async move {
                // what the editor shows while the write is in flight
                *observed.lock() = optimistic_view
                    .lock()
                    .dish(&probe_id)
                    .map(|dish| dish.name.clone());
                tokio::time::sleep(latency).await;
                if fail {
                    Err("simulated backend failure")
                } else {
                    Ok(())
                }
            })
            .await
            .is_ok();

        let full_menu_key = QueryKey::full_menu(restaurant_id.as_str());
        if saved {
            for _ in 0..100 {
                if !viewer.queries().contains(&full_menu_key) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let mut viewer_evicted: Vec<QueryKey> = Vec::new();
        if !viewer.queries().contains(&full_menu_key) {
            viewer_evicted.push(full_menu_key);
        }

        view_sub.unsubscribe();
        tracker_sub.unsubscribe();
        let sync_transitions = *transitions.lock();
        let refetch_requests = *refetches.lock();
        let optimistic_name = observed_name.lock().clone();
        editor.shutdown().await;
        viewer.shutdown().await;

        Ok(DemoOutput {
            restaurant_id,
            saved,
            optimistic_name,
            sync_transitions,
            refetch_requests,
            viewer_evicted,
        })
    }
}

fn seed_menu(restaurant_id: &RestaurantId, dish_id: &DishId) -> FullMenu {
    let mut menu = FullMenu::empty(restaurant_id.clone());
    menu.upsert_dish(Dish {
        id: dish_id.clone(),
        category_id: "starters".into(),
        name: "Tomato soup".into(),
        description: Some("With basil oil".into()),
        price_cents: 650,
        image_id: None,
        is_available: true,
        position: 0,
    });
    menu
}

impl fmt::Display for DemoOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "Restaurant:".bold(), self.restaurant_id)?;
        if self.saved {
            writeln!(f, "{} {}", "Write:".bold(), "saved".green())?;
        } else {
            writeln!(f, "{} {}", "Write:".bold(), "failed".red())?;
        }
        writeln!(
            f,
            "{} {}",
            "Editor showed while saving:".bold(),
            self.optimistic_name.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "{} {}", "Sync state changes:".bold(), self.sync_transitions)?;
        writeln!(f, "{} {}", "Refetch requests:".bold(), self.refetch_requests)?;
        if self.viewer_evicted.is_empty() {
            write!(f, "{} {}", "Viewer evicted:".bold(), "nothing".dimmed())
        } else {
            let keys: Vec<String> = self.viewer_evicted.iter().map(|k| k.to_string()).collect();
            write!(f, "{} {}", "Viewer evicted:".bold(), keys.join(", ").yellow())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("failed to set up sync context: {0}")]
    Context(#[from] ContextError),
}
