//! The storefront domain: catalog, cart, orders, stock history, payments.
//!
//! Each submodule owns its entity's state fold and the commands that mutate
//! it. Commands from different modules compose inside a single atomic write
//! when an operation spans entities (order placement touches products, the
//! cart, and the order in one commit).

pub mod cart;
pub mod events;
pub mod ids;
pub mod money;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod product;
pub mod stock;

pub use events::ShopEvent;
