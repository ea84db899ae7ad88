//! The stock ledger, read side.
//!
//! There is no separate ledger write: every stock-affecting event on a
//! product stream already carries the previous and resulting level, the
//! actor, and the cause, and it was committed in the same atomic append as
//! the mutation it describes. This module projects those events into
//! [`StockLogEntry`] rows, newest first.

use serde::{Deserialize, Serialize};

use crate::domain::events::ShopEvent;
use crate::domain::ids::{OrderId, ProductId, UserId};
use crate::errors::WorkflowResult;
use crate::store::{EventStore, ReadOptions, StoredEvent};
use crate::types::{StreamId, Timestamp};

/// Why a stock level changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockChangeKind {
    /// Initial level recorded at product registration.
    Initial,
    /// Staff manual correction.
    Manual,
    /// Units taken by an order.
    OrderDebit {
        /// The consuming order.
        order_id: OrderId,
    },
    /// Units returned by a cancellation or refund.
    Restoration {
        /// The returning order.
        order_id: OrderId,
    },
}

/// One immutable row of the stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLogEntry {
    /// The product whose level changed.
    pub product_id: ProductId,
    /// Who caused the change.
    pub actor: UserId,
    /// Level before.
    pub previous: u32,
    /// Level after.
    pub stock: u32,
    /// When the change was committed.
    pub recorded_at: Timestamp,
    /// What caused it.
    pub kind: StockChangeKind,
}

fn entry_from(event: &StoredEvent<ShopEvent>) -> Option<StockLogEntry> {
    match &event.payload {
        ShopEvent::ProductRegistered { product, actor } => Some(StockLogEntry {
            product_id: product.id.clone(),
            actor: actor.clone(),
            previous: 0,
            stock: product.stock,
            recorded_at: event.recorded_at,
            kind: StockChangeKind::Initial,
        }),
        ShopEvent::StockSet {
            product_id,
            previous,
            stock,
            actor,
        } => Some(StockLogEntry {
            product_id: product_id.clone(),
            actor: actor.clone(),
            previous: *previous,
            stock: *stock,
            recorded_at: event.recorded_at,
            kind: StockChangeKind::Manual,
        }),
        ShopEvent::StockDebited {
            product_id,
            previous,
            stock,
            order_id,
            actor,
        } => Some(StockLogEntry {
            product_id: product_id.clone(),
            actor: actor.clone(),
            previous: *previous,
            stock: *stock,
            recorded_at: event.recorded_at,
            kind: StockChangeKind::OrderDebit {
                order_id: order_id.clone(),
            },
        }),
        ShopEvent::StockRestored {
            product_id,
            previous,
            stock,
            order_id,
            actor,
        } => Some(StockLogEntry {
            product_id: product_id.clone(),
            actor: actor.clone(),
            previous: *previous,
            stock: *stock,
            recorded_at: event.recorded_at,
            kind: StockChangeKind::Restoration {
                order_id: order_id.clone(),
            },
        }),
        _ => None,
    }
}

/// Recent stock movements for one product, newest first.
pub async fn recent<S>(
    store: &S,
    product_id: &ProductId,
    since: Option<Timestamp>,
    limit: usize,
) -> WorkflowResult<Vec<StockLogEntry>>
where
    S: EventStore<Event = ShopEvent>,
{
    recent_for_products(store, std::slice::from_ref(product_id), since, limit).await
}

/// Recent stock movements across a set of products, merged newest first.
///
/// The ledger lives on per-product streams (a single global ledger stream
/// would serialize orders for unrelated products), so cross-product queries
/// name the products they want.
pub async fn recent_for_products<S>(
    store: &S,
    product_ids: &[ProductId],
    since: Option<Timestamp>,
    limit: usize,
) -> WorkflowResult<Vec<StockLogEntry>>
where
    S: EventStore<Event = ShopEvent>,
{
    let streams: Vec<StreamId> = product_ids.iter().map(ProductId::stream).collect();
    let data = store.read_streams(&streams, &ReadOptions::all()).await?;

    let mut entries: Vec<(Timestamp, crate::types::EventId, StockLogEntry)> = data
        .events
        .iter()
        .filter_map(|event| entry_from(event).map(|entry| (event.recorded_at, event.event_id, entry)))
        .filter(|(recorded_at, _, _)| since.map_or(true, |cutoff| *recorded_at >= cutoff))
        .collect();

    // Event ids are UUIDv7 and break ties between same-instant commits.
    entries.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    entries.truncate(limit);
    Ok(entries.into_iter().map(|(_, _, entry)| entry).collect())
}
