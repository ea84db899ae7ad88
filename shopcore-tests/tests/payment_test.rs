//! The payment path: intent creation, exactly-once confirmation, refunds
//! with stock restoration, and webhook verification/dedupe.

use shopcore::{
    OrderItemRequest, OrderStatus, PaymentMethod, PaymentStatus, Role, StockChangeKind,
    WorkflowError,
};
use shopcore_tests::{
    address, cents, pid, product, qty, seed_product, setup, success_webhook, user, VALID_SIGNATURE,
};

#[tokio::test]
async fn create_intent_computes_totals_from_the_live_cart() {
    let ctx = setup(); // flat $5 tax, $10 shipping
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();

    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    assert_eq!(intent.subtotal, cents(10_000));
    assert_eq!(intent.tax, cents(500));
    assert_eq!(intent.shipping_cost, cents(1000));
    assert_eq!(intent.total, cents(11_500));
    assert!(!intent.client_secret.is_empty());
}

#[tokio::test]
async fn create_intent_rejects_an_empty_cart() {
    let ctx = setup();
    let err = ctx.shop.create_intent(&user("user-42")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn create_intent_revalidates_stock_and_availability() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    let staff = user("staff-1");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(3))
        .await
        .unwrap();

    // Stock drains after the add.
    ctx.shop
        .set_stock(&staff, Role::Staff, &pid("PRD-ROTOR7"), 1)
        .await
        .unwrap();
    let err = ctx.shop.create_intent(&customer).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InsufficientStock { .. }));

    // Product discontinued after the add.
    ctx.shop
        .set_stock(&staff, Role::Staff, &pid("PRD-ROTOR7"), 10)
        .await
        .unwrap();
    ctx.shop
        .set_availability(&staff, Role::Staff, &pid("PRD-ROTOR7"), false)
        .await
        .unwrap();
    let err = ctx.shop.create_intent(&customer).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn an_unreachable_processor_surfaces_as_external_service_error() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();

    ctx.processor.go_dark();
    let err = ctx.shop.create_intent(&customer).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ExternalService(_)));
    assert_eq!(err.status_code(), 502);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn confirming_a_paid_intent_creates_the_order() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);

    let placed = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();

    let order = ctx.shop.order(&placed.order_id).await.unwrap();
    assert_eq!(order.total, cents(11_500));
    assert_eq!(order.payment.method, PaymentMethod::Card);
    assert_eq!(order.payment.status, PaymentStatus::Paid);
    assert_eq!(order.payment.card_last4.as_deref(), Some("4242"));
    assert!(order.payment.transaction_id.is_some());

    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 3);
    assert!(ctx.shop.cart(&customer).await.unwrap().is_empty());
}

#[tokio::test]
async fn confirming_an_unpaid_intent_fails_cleanly() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();

    let err = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap_err();
    match err {
        WorkflowError::PaymentNotConfirmed { status, .. } => {
            assert_eq!(status, "requires_payment");
        }
        other => panic!("expected PaymentNotConfirmed, got {other:?}"),
    }

    // Nothing moved.
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 5);
    assert!(!ctx.shop.cart(&customer).await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_confirmation_returns_the_same_order() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);

    let first = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();
    let second = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();

    assert_eq!(first.order_id, second.order_id, "no duplicate order");
    assert_eq!(first.order_number, second.order_number);

    // Stock debited exactly once.
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 3);
}

#[tokio::test]
async fn concurrent_confirmations_create_exactly_one_order() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);

    let (first, second) = tokio::join!(
        ctx.shop
            .confirm_payment(&intent.intent_id, address(), address()),
        ctx.shop
            .confirm_payment(&intent.intent_id, address(), address()),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.order_id, second.order_id);
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 3);
}

#[tokio::test]
async fn refund_restores_stock_and_records_metadata() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 10)).await;
    let customer = user("user-42");
    let staff = user("staff-1");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(3))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);
    let placed = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 7);

    ctx.shop
        .update_order_status(&staff, Role::Staff, &placed.order_id, OrderStatus::Processing)
        .await
        .unwrap();

    let refund = ctx
        .shop
        .refund(&staff, Role::Staff, &placed.order_id, None, "defective batch")
        .await
        .unwrap();
    assert_eq!(refund.amount, placed.total);
    assert_eq!(refund.reason, "defective batch");
    assert!(refund.refund_id.starts_with("re_"));

    // Stock back to 10, order terminal, processor saw the refund.
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 10);
    let order = ctx.shop.order(&placed.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.payment.status, PaymentStatus::Refunded);
    assert_eq!(ctx.processor.refunds().len(), 1);

    // And the ledger shows the restoration.
    let ledger = ctx
        .shop
        .stock_ledger(&pid("PRD-ROTOR7"), None, 10)
        .await
        .unwrap();
    assert_eq!(
        ledger[0].kind,
        StockChangeKind::Restoration {
            order_id: placed.order_id.clone()
        }
    );
}

#[tokio::test]
async fn refunds_are_rejected_for_unrefundable_states() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    let placed = ctx
        .shop
        .place_order(
            &customer,
            vec![OrderItemRequest {
                product_id: pid("PRD-ROTOR7"),
                quantity: qty(1),
            }],
            address(),
            address(),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap();

    // Still pending: not refundable.
    let err = ctx
        .shop
        .refund(&user("staff-1"), Role::Staff, &placed.order_id, None, "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn a_failed_processor_refund_leaves_the_order_untouched() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    let staff = user("staff-1");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);
    let placed = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();
    ctx.shop
        .update_order_status(&staff, Role::Staff, &placed.order_id, OrderStatus::Processing)
        .await
        .unwrap();

    ctx.processor.reject_refunds();
    let err = ctx
        .shop
        .refund(&staff, Role::Staff, &placed.order_id, None, "attempt")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ExternalService(_)));

    let order = ctx.shop.order(&placed.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Processing, "no state change");
    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 4);
}

#[tokio::test]
async fn partial_refund_amounts_are_validated() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    let staff = user("staff-1");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    ctx.processor.complete_payment(&intent.intent_id);
    let placed = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();
    ctx.shop
        .update_order_status(&staff, Role::Staff, &placed.order_id, OrderStatus::Processing)
        .await
        .unwrap();

    let err = ctx
        .shop
        .refund(
            &staff,
            Role::Staff,
            &placed.order_id,
            Some(cents(999_999)),
            "too much",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    let refund = ctx
        .shop
        .refund(
            &staff,
            Role::Staff,
            &placed.order_id,
            Some(cents(2000)),
            "partial goodwill",
        )
        .await
        .unwrap();
    assert_eq!(refund.amount, cents(2000));
    assert_eq!(ctx.processor.refunds()[0].1, cents(2000));
}

#[tokio::test]
async fn refunds_require_staff_role() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let err = ctx
        .shop
        .refund(
            &user("user-42"),
            Role::Customer,
            &shopcore::OrderId::generate(),
            None,
            "please",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));
}

#[tokio::test]
async fn webhooks_with_bad_signatures_are_rejected() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    let txn = ctx.processor.complete_payment(&intent.intent_id);

    let payload = success_webhook("evt_1", &intent.intent_id, &txn);
    let err = ctx
        .shop
        .handle_webhook(&payload, "t=now,v1=forged")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));
}

#[tokio::test]
async fn webhook_redelivery_is_a_no_op() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");
    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(1))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    let txn = ctx.processor.complete_payment(&intent.intent_id);

    let payload = success_webhook("evt_1", &intent.intent_id, &txn);
    ctx.shop
        .handle_webhook(&payload, VALID_SIGNATURE)
        .await
        .unwrap();
    // Redelivered verbatim.
    ctx.shop
        .handle_webhook(&payload, VALID_SIGNATURE)
        .await
        .unwrap();

    // The intent stream saw exactly one confirmation event.
    use shopcore::store::{EventStore, ReadOptions};
    let data = ctx
        .store
        .read_streams(&[intent.intent_id.stream()], &ReadOptions::all())
        .await
        .unwrap();
    let confirmations = data
        .events
        .iter()
        .filter(|e| {
            matches!(
                e.payload,
                shopcore::ShopEvent::PaymentIntentConfirmed { .. }
            )
        })
        .count();
    assert_eq!(confirmations, 1);
}

#[tokio::test]
async fn webhooks_for_unknown_intents_are_not_found() {
    let ctx = setup();
    let intent_id = shopcore::PaymentIntentId::try_new("pi_ghost".to_string()).unwrap();
    let txn = shopcore::TransactionId::try_new("txn_ghost".to_string()).unwrap();
    let payload = success_webhook("evt_1", &intent_id, &txn);

    let err = ctx
        .shop
        .handle_webhook(&payload, VALID_SIGNATURE)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn webhook_then_client_confirmation_still_creates_one_order() {
    let ctx = setup();
    seed_product(&ctx, product("PRD-ROTOR7", "brake rotor", 5000, 5)).await;
    let customer = user("user-42");

    ctx.shop
        .add_item(&customer, &pid("PRD-ROTOR7"), qty(2))
        .await
        .unwrap();
    let intent = ctx.shop.create_intent(&customer).await.unwrap();
    let txn = ctx.processor.complete_payment(&intent.intent_id);

    // Webhook lands first, then the client confirms.
    let payload = success_webhook("evt_1", &intent.intent_id, &txn);
    ctx.shop
        .handle_webhook(&payload, VALID_SIGNATURE)
        .await
        .unwrap();

    let placed = ctx
        .shop
        .confirm_payment(&intent.intent_id, address(), address())
        .await
        .unwrap();

    assert_eq!(ctx.shop.product(&pid("PRD-ROTOR7")).await.unwrap().stock, 3);
    let order = ctx.shop.order(&placed.order_id).await.unwrap();
    assert_eq!(order.payment.transaction_id, Some(txn));
}
