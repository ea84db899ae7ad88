//! The cart aggregate: one stream per user, at most one line per product.
//!
//! Cart writes validate against the catalog but never reserve stock; the
//! only stock movements happen at order placement. Cart reads join the
//! *live* catalog, so a price change shows up in the cart immediately —
//! which is exactly why placement re-reads and freezes prices itself.
//!
//! Removal is idempotent by design: removing an absent line succeeds, so
//! retry-safe clients never need a read before a delete. Only a missing
//! cart is an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::events::ShopEvent;
use crate::domain::ids::{ProductId, UserId};
use crate::domain::money::{Money, Quantity};
use crate::domain::product::{Brand, CatalogState, ProductName};
use crate::errors::{insufficient_stock, ResourceKind, WorkflowError, WorkflowResult};
use crate::executor::Command;
use crate::store::{EventStore, ReadOptions, StoredEvent};
use crate::types::StreamId;

/// One line of a cart: product reference and quantity, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Referenced product.
    pub product_id: ProductId,
    /// Units in the cart.
    pub quantity: Quantity,
}

/// Fold of one cart stream.
///
/// `exists` distinguishes "cart was deleted" (order placement or explicit
/// clear) from "cart is empty but alive". Removal semantics depend on it.
#[derive(Debug, Clone, Default)]
pub struct CartState {
    /// Whether the cart currently exists.
    pub exists: bool,
    /// Lines in insertion order.
    pub lines: Vec<CartLine>,
}

impl CartState {
    /// Folds one event. Non-cart events are ignored.
    pub fn apply(&mut self, event: &ShopEvent) {
        match event {
            ShopEvent::CartItemAdded {
                product_id,
                quantity,
            } => {
                self.exists = true;
                match self.line_mut(product_id) {
                    Some(line) => {
                        // Quantities were validated against the per-line cap
                        // before the event was committed.
                        if let Ok(merged) = line.quantity.checked_add(*quantity) {
                            line.quantity = merged;
                        }
                    }
                    None => self.lines.push(CartLine {
                        product_id: product_id.clone(),
                        quantity: *quantity,
                    }),
                }
            }
            ShopEvent::CartItemQuantitySet {
                product_id,
                quantity,
            } => {
                self.exists = true;
                match self.line_mut(product_id) {
                    Some(line) => line.quantity = *quantity,
                    None => self.lines.push(CartLine {
                        product_id: product_id.clone(),
                        quantity: *quantity,
                    }),
                }
            }
            ShopEvent::CartItemRemoved { product_id } => {
                self.lines.retain(|line| &line.product_id != product_id);
            }
            ShopEvent::CartCleared { .. } => {
                self.lines.clear();
                self.exists = false;
            }
            _ => {}
        }
    }

    /// The quantity currently carried for a product (zero when absent).
    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.lines
            .iter()
            .find(|line| &line.product_id == product_id)
            .map_or(0, |line| line.quantity.into_inner())
    }

    fn line_mut(&mut self, product_id: &ProductId) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| &line.product_id == product_id)
    }

    fn has_line(&self, product_id: &ProductId) -> bool {
        self.lines.iter().any(|line| &line.product_id == product_id)
    }
}

/// Combined fold for cart commands that must see the catalog.
#[derive(Debug, Default)]
pub struct CartWithCatalogState {
    /// The cart being mutated.
    pub cart: CartState,
    /// The referenced product.
    pub catalog: CatalogState,
}

impl CartWithCatalogState {
    fn apply(&mut self, event: &ShopEvent) {
        self.cart.apply(event);
        self.catalog.apply(event);
    }
}

/// Adds units of a product to a cart, merging into an existing line.
#[derive(Debug, Clone)]
pub struct AddCartItem {
    /// Cart owner.
    pub owner: UserId,
    /// Product to add.
    pub product_id: ProductId,
    /// Units to add on top of any existing line.
    pub quantity: Quantity,
}

#[async_trait]
impl Command for AddCartItem {
    type State = CartWithCatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "add-cart-item"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.owner.cart_stream(), self.product_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(
        &self,
        state: CartWithCatalogState,
    ) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let product = state.catalog.require(&self.product_id)?;
        if !product.available {
            return Err(WorkflowError::not_found(
                ResourceKind::Product,
                &self.product_id,
            ));
        }

        let merged = state.cart.quantity_of(&self.product_id) + self.quantity.into_inner();
        Quantity::try_new(merged).map_err(|e| WorkflowError::Validation(e.to_string()))?;

        if product.stock < merged {
            return Err(insufficient_stock(
                &self.product_id,
                product.name.as_ref(),
                merged,
                product.stock,
            ));
        }

        Ok(vec![(
            self.owner.cart_stream(),
            ShopEvent::CartItemAdded {
                product_id: self.product_id.clone(),
                quantity: self.quantity,
            },
        )])
    }
}

/// Overwrites a cart line's quantity; zero behaves like removal.
#[derive(Debug, Clone)]
pub struct SetCartItemQuantity {
    /// Cart owner.
    pub owner: UserId,
    /// Product whose line is updated.
    pub product_id: ProductId,
    /// The new quantity. Zero removes the line.
    pub quantity: u32,
}

#[async_trait]
impl Command for SetCartItemQuantity {
    type State = CartWithCatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "set-cart-item-quantity"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.owner.cart_stream(), self.product_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(
        &self,
        state: CartWithCatalogState,
    ) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if !state.cart.exists {
            return Err(WorkflowError::not_found(ResourceKind::Cart, &self.owner));
        }

        if self.quantity == 0 {
            // Same contract as removal: succeed even when the line is gone.
            if state.cart.has_line(&self.product_id) {
                return Ok(vec![(
                    self.owner.cart_stream(),
                    ShopEvent::CartItemRemoved {
                        product_id: self.product_id.clone(),
                    },
                )]);
            }
            return Ok(vec![]);
        }

        if !state.cart.has_line(&self.product_id) {
            return Err(WorkflowError::not_found(
                ResourceKind::CartItem,
                &self.product_id,
            ));
        }

        let product = state.catalog.require(&self.product_id)?;
        if !product.available {
            return Err(WorkflowError::not_found(
                ResourceKind::Product,
                &self.product_id,
            ));
        }

        let quantity = Quantity::try_new(self.quantity)
            .map_err(|e| WorkflowError::Validation(e.to_string()))?;

        if product.stock < self.quantity {
            return Err(insufficient_stock(
                &self.product_id,
                product.name.as_ref(),
                self.quantity,
                product.stock,
            ));
        }

        Ok(vec![(
            self.owner.cart_stream(),
            ShopEvent::CartItemQuantitySet {
                product_id: self.product_id.clone(),
                quantity,
            },
        )])
    }
}

/// Removes a line from a cart. Succeeds when the line is already gone.
#[derive(Debug, Clone)]
pub struct RemoveCartItem {
    /// Cart owner.
    pub owner: UserId,
    /// Product whose line is removed.
    pub product_id: ProductId,
}

#[async_trait]
impl Command for RemoveCartItem {
    type State = CartState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "remove-cart-item"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.owner.cart_stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CartState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if !state.exists {
            return Err(WorkflowError::not_found(ResourceKind::Cart, &self.owner));
        }

        if !state.has_line(&self.product_id) {
            return Ok(vec![]);
        }

        Ok(vec![(
            self.owner.cart_stream(),
            ShopEvent::CartItemRemoved {
                product_id: self.product_id.clone(),
            },
        )])
    }
}

/// Deletes a cart outright. A no-op when there is nothing to delete.
#[derive(Debug, Clone)]
pub struct ClearCart {
    /// Cart owner.
    pub owner: UserId,
}

#[async_trait]
impl Command for ClearCart {
    type State = CartState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "clear-cart"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.owner.cart_stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: CartState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if !state.exists {
            return Ok(vec![]);
        }
        Ok(vec![(
            self.owner.cart_stream(),
            ShopEvent::CartCleared { order_id: None },
        )])
    }
}

/// A cart line joined with the live catalog for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineView {
    /// Referenced product.
    pub product_id: ProductId,
    /// Current product name.
    pub name: ProductName,
    /// Current brand.
    pub brand: Brand,
    /// Current list price (not the price at add time).
    pub price: Money,
    /// Current price with the catalog discount applied.
    pub effective_price: Money,
    /// Current product image.
    pub image_url: Option<String>,
    /// Whether the product is still orderable.
    pub available: bool,
    /// Units currently on hand.
    pub in_stock: u32,
    /// Units in the cart.
    pub quantity: Quantity,
    /// Current list price times quantity.
    pub line_total: Money,
}

/// A cart ready for display. Never an error: a user without a cart gets
/// the empty shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    /// Cart owner.
    pub owner: UserId,
    /// Joined lines.
    pub lines: Vec<CartLineView>,
    /// Sum of line totals at current prices.
    pub subtotal: Money,
}

impl CartView {
    /// The empty cart shape.
    pub fn empty(owner: UserId) -> Self {
        Self {
            owner,
            lines: Vec::new(),
            subtotal: Money::zero(),
        }
    }

    /// Whether there is anything in the cart.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reads a cart and joins each line against the live catalog.
///
/// Lines whose product record has vanished entirely are dropped from the
/// view; discontinued products stay visible with `available == false`.
pub async fn load_cart<S>(store: &S, owner: &UserId) -> WorkflowResult<CartView>
where
    S: EventStore<Event = ShopEvent>,
{
    let data = store
        .read_streams(&[owner.cart_stream()], &ReadOptions::all())
        .await?;

    let mut cart = CartState::default();
    for event in &data.events {
        cart.apply(&event.payload);
    }

    if cart.lines.is_empty() {
        return Ok(CartView::empty(owner.clone()));
    }

    let product_ids: Vec<ProductId> = cart
        .lines
        .iter()
        .map(|line| line.product_id.clone())
        .collect();
    let catalog = crate::domain::product::load_catalog(store, &product_ids).await?;

    let mut lines = Vec::with_capacity(cart.lines.len());
    let mut subtotal = Money::zero();
    for line in &cart.lines {
        let Some(product) = catalog.products.get(&line.product_id) else {
            continue;
        };
        let line_total = product.price.times(line.quantity)?;
        subtotal = subtotal.checked_add(line_total)?;
        lines.push(CartLineView {
            product_id: line.product_id.clone(),
            name: product.name.clone(),
            brand: product.brand.clone(),
            price: product.price,
            effective_price: product.effective_price(),
            image_url: product.image_url.clone(),
            available: product.available,
            in_stock: product.stock,
            quantity: line.quantity,
            line_total,
        });
    }

    Ok(CartView {
        owner: owner.clone(),
        lines,
        subtotal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_id(id: &str) -> ProductId {
        ProductId::try_new(id.to_string()).unwrap()
    }

    fn qty(n: u32) -> Quantity {
        Quantity::try_new(n).unwrap()
    }

    #[test]
    fn adds_merge_into_one_line_per_product() {
        let mut state = CartState::default();
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(2),
        });
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(3),
        });
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-PAD2"),
            quantity: qty(1),
        });

        assert_eq!(state.lines.len(), 2);
        assert_eq!(state.quantity_of(&product_id("PRD-ROTOR7")), 5);
        assert_eq!(state.quantity_of(&product_id("PRD-PAD2")), 1);
    }

    #[test]
    fn quantity_set_overwrites() {
        let mut state = CartState::default();
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(2),
        });
        state.apply(&ShopEvent::CartItemQuantitySet {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(7),
        });
        assert_eq!(state.quantity_of(&product_id("PRD-ROTOR7")), 7);
    }

    #[test]
    fn removal_leaves_the_cart_alive() {
        let mut state = CartState::default();
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(2),
        });
        state.apply(&ShopEvent::CartItemRemoved {
            product_id: product_id("PRD-ROTOR7"),
        });

        assert!(state.exists);
        assert!(state.lines.is_empty());
    }

    #[test]
    fn clearing_deletes_the_cart() {
        let mut state = CartState::default();
        state.apply(&ShopEvent::CartItemAdded {
            product_id: product_id("PRD-ROTOR7"),
            quantity: qty(2),
        });
        state.apply(&ShopEvent::CartCleared { order_id: None });

        assert!(!state.exists);
        assert!(state.lines.is_empty());
    }

    #[test]
    fn empty_view_has_zero_subtotal() {
        let owner = UserId::try_new("user-42".to_string()).unwrap();
        let view = CartView::empty(owner);
        assert!(view.is_empty());
        assert_eq!(view.subtotal, Money::zero());
    }
}
