//! Catalog products and the staff-side commands that maintain them.
//!
//! Products are never hard-deleted: discontinuing one clears its
//! `available` flag, which keeps historical orders and the stock ledger
//! pointing at something real. Every stock-level change carries the
//! previous and resulting values so the product stream doubles as the
//! audit ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::domain::events::ShopEvent;
use crate::domain::ids::{ProductId, UserId};
use crate::domain::money::{DiscountPercent, Money};
use crate::errors::{ResourceKind, WorkflowError, WorkflowResult};
use crate::executor::Command;
use crate::store::{EventStore, ReadOptions, StoredEvent};
use crate::types::StreamId;

/// Product display name.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 120),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct ProductName(String);

/// Manufacturer or brand label.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 60),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct Brand(String);

/// Catalog category, e.g. "brakes" or "filters".
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 60),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct Category(String);

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier.
    pub id: ProductId,
    /// Display name.
    pub name: ProductName,
    /// Brand label.
    pub brand: Brand,
    /// Catalog category.
    pub category: Category,
    /// Current list price per unit.
    pub price: Money,
    /// Units on hand. Zero is valid; negative is unrepresentable.
    pub stock: u32,
    /// Whether the product can be browsed and ordered. Clearing this is
    /// the soft-delete.
    pub available: bool,
    /// Catalog discount applied for display purposes.
    pub discount: DiscountPercent,
    /// Optional image for cart and catalog views.
    pub image_url: Option<String>,
}

impl Product {
    /// List price with the catalog discount applied, for display.
    pub fn effective_price(&self) -> Money {
        self.discount.apply_to(self.price)
    }
}

/// Fold of product streams: everything known about each product.
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    /// Products keyed by id, as of the events folded so far.
    pub products: HashMap<ProductId, Product>,
}

impl CatalogState {
    /// Folds one event. Non-product events are ignored.
    pub fn apply(&mut self, event: &ShopEvent) {
        match event {
            ShopEvent::ProductRegistered { product, .. } => {
                self.products.insert(product.id.clone(), product.clone());
            }
            ShopEvent::ProductPriceChanged {
                product_id, price, ..
            } => {
                if let Some(product) = self.products.get_mut(product_id) {
                    product.price = *price;
                }
            }
            ShopEvent::ProductAvailabilityChanged {
                product_id,
                available,
                ..
            } => {
                if let Some(product) = self.products.get_mut(product_id) {
                    product.available = *available;
                }
            }
            ShopEvent::StockSet {
                product_id, stock, ..
            }
            | ShopEvent::StockDebited {
                product_id, stock, ..
            }
            | ShopEvent::StockRestored {
                product_id, stock, ..
            } => {
                if let Some(product) = self.products.get_mut(product_id) {
                    product.stock = *stock;
                }
            }
            _ => {}
        }
    }

    /// Looks up a product or reports it missing.
    pub fn require(&self, product_id: &ProductId) -> WorkflowResult<&Product> {
        self.products
            .get(product_id)
            .ok_or_else(|| WorkflowError::not_found(ResourceKind::Product, product_id))
    }
}

/// Adds a new product to the catalog with its initial stock level.
#[derive(Debug, Clone)]
pub struct RegisterProduct {
    /// The full catalog entry, including initial stock.
    pub product: Product,
    /// Staff member performing the registration.
    pub actor: UserId,
}

#[async_trait]
impl Command for RegisterProduct {
    type State = CatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "register-product"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.product.id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CatalogState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if state.products.contains_key(&self.product.id) {
            return Err(WorkflowError::Validation(format!(
                "product {} is already registered",
                self.product.id
            )));
        }

        Ok(vec![(
            self.product.id.stream(),
            ShopEvent::ProductRegistered {
                product: self.product.clone(),
                actor: self.actor.clone(),
            },
        )])
    }
}

/// Staff correction of a stock level. This is the only blind overwrite in
/// the system; order fulfillment always moves stock by deltas.
#[derive(Debug, Clone)]
pub struct SetStock {
    /// Product to correct.
    pub product_id: ProductId,
    /// The counted stock level.
    pub stock: u32,
    /// Staff member recording the correction.
    pub actor: UserId,
}

#[async_trait]
impl Command for SetStock {
    type State = CatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "set-stock"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.product_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CatalogState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let product = state.require(&self.product_id)?;

        Ok(vec![(
            self.product_id.stream(),
            ShopEvent::StockSet {
                product_id: self.product_id.clone(),
                previous: product.stock,
                stock: self.stock,
                actor: self.actor.clone(),
            },
        )])
    }
}

/// Discontinues or re-lists a product.
#[derive(Debug, Clone)]
pub struct SetAvailability {
    /// Product to toggle.
    pub product_id: ProductId,
    /// New availability flag.
    pub available: bool,
    /// Staff member making the change.
    pub actor: UserId,
}

#[async_trait]
impl Command for SetAvailability {
    type State = CatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "set-availability"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.product_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CatalogState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let product = state.require(&self.product_id)?;

        if product.available == self.available {
            return Ok(vec![]);
        }

        Ok(vec![(
            self.product_id.stream(),
            ShopEvent::ProductAvailabilityChanged {
                product_id: self.product_id.clone(),
                available: self.available,
                actor: self.actor.clone(),
            },
        )])
    }
}

/// Changes a product's list price. Placed orders are unaffected; their
/// line items froze the price they were sold at.
#[derive(Debug, Clone)]
pub struct UpdatePrice {
    /// Product to reprice.
    pub product_id: ProductId,
    /// New list price.
    pub price: Money,
}

#[async_trait]
impl Command for UpdatePrice {
    type State = CatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "update-price"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.product_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CatalogState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let product = state.require(&self.product_id)?;

        if product.price == self.price {
            return Ok(vec![]);
        }

        Ok(vec![(
            self.product_id.stream(),
            ShopEvent::ProductPriceChanged {
                product_id: self.product_id.clone(),
                previous: product.price,
                price: self.price,
            },
        )])
    }
}

/// Reads the current state of one product.
pub async fn load_product<S>(store: &S, product_id: &ProductId) -> WorkflowResult<Product>
where
    S: EventStore<Event = ShopEvent>,
{
    let data = store
        .read_streams(&[product_id.stream()], &ReadOptions::all())
        .await?;

    let mut state = CatalogState::default();
    for event in &data.events {
        state.apply(&event.payload);
    }

    state.require(product_id).cloned()
}

/// Reads the current state of several products in one store round trip.
pub async fn load_catalog<S>(store: &S, product_ids: &[ProductId]) -> WorkflowResult<CatalogState>
where
    S: EventStore<Event = ShopEvent>,
{
    let streams: Vec<StreamId> = product_ids.iter().map(ProductId::stream).collect();
    let data = store.read_streams(&streams, &ReadOptions::all()).await?;

    let mut state = CatalogState::default();
    for event in &data.events {
        state.apply(&event.payload);
    }
    Ok(state)
}
