//! Menu data as seen by editor and diner views
//!
//! Views hold a [`FullMenu`] fetched from the backend. Optimistic edits are
//! expressed as [`MenuUpdate`] closures that mutate that copy in place until
//! the authoritative refetch replaces it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{DishId, ImageId, RestaurantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dish {
    pub id: DishId,
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Price in minor currency units
    pub price_cents: i64,
    #[serde(default)]
    pub image_id: Option<ImageId>,
    #[serde(default = "default_available")]
    pub is_available: bool,
    pub position: u32,
}

fn default_available() -> bool {
    true
}

/// Everything a menu view renders for one restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullMenu {
    pub restaurant_id: RestaurantId,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub dishes: Vec<Dish>,
}

impl FullMenu {
    pub fn empty(restaurant_id: RestaurantId) -> Self {
        Self {
            restaurant_id,
            categories: Vec::new(),
            dishes: Vec::new(),
        }
    }

    pub fn dish(&self, id: &DishId) -> Option<&Dish> {
        self.dishes.iter().find(|d| &d.id == id)
    }

    pub fn dish_mut(&mut self, id: &DishId) -> Option<&mut Dish> {
        self.dishes.iter_mut().find(|d| &d.id == id)
    }

    /// Replace the dish with the same id, or append it
    pub fn upsert_dish(&mut self, dish: Dish) {
        match self.dish_mut(&dish.id) {
            Some(existing) => *existing = dish,
            None => self.dishes.push(dish),
        }
    }

    pub fn remove_dish(&mut self, id: &DishId) -> Option<Dish> {
        let index = self.dishes.iter().position(|d| &d.id == id)?;
        Some(self.dishes.remove(index))
    }

    /// Dishes of one category in display order
    pub fn dishes_in(&self, category_id: &str) -> Vec<&Dish> {
        let mut dishes: Vec<&Dish> = self
            .dishes
            .iter()
            .filter(|d| d.category_id == category_id)
            .collect();
        dishes.sort_by_key(|d| d.position);
        dishes
    }
}

/// Optimistic mutation applied to a view's copy of the menu
///
/// Cheap to clone; the same update may be delivered to several views and
/// also parked in a pending queue.
#[derive(Clone)]
pub struct MenuUpdate(Arc<dyn Fn(&mut FullMenu) + Send + Sync>);

impl MenuUpdate {
    pub fn new(f: impl Fn(&mut FullMenu) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, menu: &mut FullMenu) {
        (self.0)(menu)
    }

    pub fn upsert_dish(dish: Dish) -> Self {
        Self::new(move |menu| menu.upsert_dish(dish.clone()))
    }

    pub fn remove_dish(id: DishId) -> Self {
        Self::new(move |menu| {
            menu.remove_dish(&id);
        })
    }

    /// Whether two handles point at the same update
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for MenuUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MenuUpdate")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}
