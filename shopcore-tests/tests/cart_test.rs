//! Cart aggregate behavior against a live store: merging, validation,
//! idempotent removal, and the live-catalog join.

use shopcore::{Role, WorkflowError};
use shopcore_tests::{address, cents, pid, product, qty, seed_product, setup, user};

#[tokio::test]
async fn adding_an_item_joins_live_product_details() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    let cart = ctx
        .shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();

    assert_eq!(cart.lines.len(), 1);
    let line = &cart.lines[0];
    assert_eq!(line.name.as_ref(), "brake rotor");
    assert_eq!(line.brand.as_ref(), "Bosch");
    assert_eq!(line.price, cents(5000));
    assert_eq!(line.quantity, qty(2));
    assert_eq!(line.line_total, cents(10_000));
    assert_eq!(cart.subtotal, cents(10_000));
}

#[tokio::test]
async fn adding_the_same_product_twice_merges_quantities() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 10)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let cart = ctx
        .shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(3))
        .await
        .unwrap();

    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, qty(5));
}

#[tokio::test]
async fn adding_more_than_stock_fails_and_leaves_the_cart_unchanged() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    let err = ctx
        .shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(10))
        .await
        .unwrap_err();

    match err {
        WorkflowError::InsufficientStock {
            product_id,
            name,
            requested,
            available,
        } => {
            assert_eq!(product_id, pid("PRD-ROTOR7"));
            assert_eq!(name, "brake rotor");
            assert_eq!(requested, 10);
            assert_eq!(available, 5);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    let cart = ctx.shop.cart(&owner).await.unwrap();
    assert!(cart.is_empty(), "no partial line may be added");
}

#[tokio::test]
async fn merged_quantity_is_validated_against_stock() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(4))
        .await
        .unwrap();
    let err = ctx
        .shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InsufficientStock { .. }));
}

#[tokio::test]
async fn unknown_and_discontinued_products_cannot_be_added() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    let err = ctx
        .shop
        .add_item(&owner, &pid("PRD-GHOST"), qty(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));

    ctx.shop
        .set_availability(&user("staff-1"), Role::Staff, &pid("PRD-ROTOR7"), false)
        .await
        .unwrap();
    let err = ctx
        .shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn update_overwrites_quantity_and_zero_removes() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 10)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();

    let cart = ctx
        .shop
        .update_item_quantity(&owner, &pid("PRD-ROTOR7"), 7)
        .await
        .unwrap();
    assert_eq!(cart.lines[0].quantity, qty(7));

    let cart = ctx
        .shop
        .update_item_quantity(&owner, &pid("PRD-ROTOR7"), 0)
        .await
        .unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn update_revalidates_stock() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let err = ctx
        .shop
        .update_item_quantity(&owner, &pid("PRD-ROTOR7"), 6)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InsufficientStock { .. }));
}

#[tokio::test]
async fn removal_is_idempotent_for_missing_items() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    seed_product(&ctx, product("PRD-PAD2", "brake pads", 2500, 5)).await;
    let owner = user("user-42");

    // Cart with one line; remove a different, never-added product twice.
    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    ctx.shop
        .remove_item(&owner, &pid("PRD-PAD2"))
        .await
        .unwrap();
    ctx.shop
        .remove_item(&owner, &pid("PRD-PAD2"))
        .await
        .unwrap();

    // Empty the cart, then remove again, twice. Still success.
    ctx.shop
        .remove_item(&owner, &pid("PRD-ROTOR7"))
        .await
        .unwrap();
    ctx.shop
        .remove_item(&owner, &pid("PRD-ROTOR7"))
        .await
        .unwrap();

    let cart = ctx.shop.cart(&owner).await.unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn removing_from_a_nonexistent_cart_is_not_found() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;

    let err = ctx
        .shop
        .remove_item(&user("user-never-shopped"), &pid("PRD-ROTOR7"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn reading_a_missing_cart_returns_the_empty_shape() {
    let ctx = setup();
    let cart = ctx.shop.cart(&user("user-never-shopped")).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.subtotal, cents(0));
}

#[tokio::test]
async fn cart_views_show_live_prices_not_add_time_prices() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();

    ctx.shop
        .update_price(&user("staff-1"), Role::Staff, &pid("PRD-ROTOR7"), cents(6000))
        .await
        .unwrap();

    let cart = ctx.shop.cart(&owner).await.unwrap();
    assert_eq!(cart.lines[0].price, cents(6000));
    assert_eq!(cart.subtotal, cents(12_000));
}

#[tokio::test]
async fn clearing_deletes_the_cart() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let owner = user("user-42");

    ctx.shop
        .add_item(&owner, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    ctx.shop.clear_cart(&owner).await.unwrap();

    // The view shows the empty shape, and removal now reports the cart
    // itself as gone.
    let cart = ctx.shop.cart(&owner).await.unwrap();
    assert!(cart.is_empty());
    let err = ctx
        .shop
        .remove_item(&owner, &pid("PRD-ROTOR7"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}
