//! Handler tests
//!
//! Exercise the ledger handler against the in-memory store and broker.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::broker::{Broker, InMemoryBroker};
    use crate::domain::{
        DecodedEnvelope, DomainError, DomainEvent, NewTransaction, OperationContext, Transaction,
        UserId, TRANSACTION_CAP,
    };
    use crate::emitter::EventEmitter;
    use crate::handlers::{CreateTransactionCommand, LedgerError, LedgerHandler};
    use crate::store::{CappedInsert, InMemoryLedgerStore, LedgerStore, StoreError};

    const CHANNEL: &str = "transactions";

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        broker: Arc<InMemoryBroker>,
        handler: Arc<LedgerHandler>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let broker = Arc::new(InMemoryBroker::new(4));
        let emitter = EventEmitter::new(broker.clone(), CHANNEL);
        let handler = Arc::new(LedgerHandler::new(store.clone(), emitter));
        Fixture {
            store,
            broker,
            handler,
        }
    }

    fn ctx() -> OperationContext {
        OperationContext::new()
    }

    async fn create(handler: &LedgerHandler, user: i64, amount: Decimal) -> Result<Transaction, LedgerError> {
        let command = CreateTransactionCommand::new(user, amount).with_description("test");
        let emitted = handler.create_transaction_tracked(command, &ctx()).await?;
        if let Some(emission) = emitted.emission {
            emission.outcome().await.unwrap();
        }
        Ok(emitted.value)
    }

    /// Drain every message currently on the channel
    async fn drain(broker: &InMemoryBroker) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while broker.pending(CHANNEL) > 0 {
            let delivery = broker.receive(CHANNEL).await.unwrap();
            match DomainEvent::decode(&delivery.payload).unwrap() {
                DecodedEnvelope::Event(event) => events.push(event),
                DecodedEnvelope::Unknown(tag) => panic!("unexpected event type {}", tag),
            }
            broker.ack(&delivery).await.unwrap();
        }
        events
    }

    // =========================================================================
    // CreateTransaction
    // =========================================================================

    #[tokio::test]
    async fn test_cap_scenario_then_pay() {
        let f = fixture();

        create(&f.handler, 1, dec!(400)).await.unwrap();
        create(&f.handler, 1, dec!(300)).await.unwrap();
        create(&f.handler, 1, dec!(250)).await.unwrap();

        let err = create(&f.handler, 1, dec!(100)).await.unwrap_err();
        match err {
            LedgerError::Domain(DomainError::CapacityExceeded {
                current_total,
                requested,
                max_allowed,
            }) => {
                assert_eq!(current_total, dec!(950));
                assert_eq!(requested, dec!(100));
                assert_eq!(max_allowed, dec!(1000));
            }
            other => panic!("expected capacity error, got {:?}", other),
        }

        let listed = f.handler.list_transactions(1, &ctx()).await.unwrap();
        assert_eq!(listed.len(), 3);

        let emitted = f.handler.pay_all_unpaid_tracked(1, &ctx()).await.unwrap();
        assert_eq!(emitted.value.paid_count, 3);
        emitted.emission.unwrap().outcome().await.unwrap();

        let events = drain(&f.broker).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events.last(),
            Some(DomainEvent::TransactionPaid { transactions_paid: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_exact_cap_is_accepted() {
        let f = fixture();

        let tx = create(&f.handler, 2, dec!(1000.00)).await.unwrap();
        assert_eq!(tx.amount.value(), TRANSACTION_CAP);
        assert_eq!(f.handler.current_total(2, &ctx()).await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn test_one_cent_over_cap_is_rejected() {
        let f = fixture();

        let err = create(&f.handler, 3, dec!(1000.01)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::CapacityExceeded { current_total, .. })
                if current_total == Decimal::ZERO
        ));
        assert!(f.store.is_empty());
        assert_eq!(f.broker.pending(CHANNEL), 0);
    }

    #[tokio::test]
    async fn test_huge_amount_after_prior_spend_is_rejected() {
        let f = fixture();
        create(&f.handler, 5, dec!(1.00)).await.unwrap();

        for amount in [Decimal::MAX, dec!(10000000000)] {
            let err = create(&f.handler, 5, amount).await.unwrap_err();
            assert!(
                matches!(&err, LedgerError::Domain(DomainError::InvalidAmount(msg)) if msg.contains("exceeds maximum")),
                "{:?}",
                err
            );
        }

        assert_eq!(f.store.len(), 1);
        assert_eq!(f.handler.current_total(5, &ctx()).await.unwrap(), dec!(1.00));
    }

    #[tokio::test]
    async fn test_invalid_input_persists_and_emits_nothing() {
        let f = fixture();

        for (user, amount) in [(1, dec!(0)), (1, dec!(-5)), (1, dec!(1.001)), (0, dec!(10)), (-4, dec!(10))] {
            let err = create(&f.handler, user, amount).await.unwrap_err();
            match err {
                LedgerError::Domain(e) => assert!(e.is_validation_error(), "{:?}", e),
                other => panic!("expected validation error, got {:?}", other),
            }
        }

        assert!(f.store.is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.broker.pending(CHANNEL), 0);
    }

    #[tokio::test]
    async fn test_created_event_carries_transaction() {
        let f = fixture();

        let tx = create(&f.handler, 9, dec!(12.34)).await.unwrap();
        let events = drain(&f.broker).await;

        match events.as_slice() {
            [DomainEvent::TransactionCreated {
                transaction_id,
                user_id,
                amount,
                description,
                ..
            }] => {
                assert_eq!(*transaction_id, tx.id);
                assert_eq!(user_id.value(), 9);
                assert_eq!(amount.value(), dec!(12.34));
                assert_eq!(description, "test");
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emission_failure_does_not_fail_operation() {
        let f = fixture();
        f.broker.set_publish_failure(true);

        let command = CreateTransactionCommand::new(5, dec!(20));
        let emitted = f.handler.create_transaction_tracked(command, &ctx()).await.unwrap();

        assert!(emitted.emission.unwrap().outcome().await.is_err());
        // The ledger keeps the row even though the event was lost
        assert_eq!(f.handler.list_transactions(5, &ctx()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_store_error() {
        let f = fixture();
        f.store.set_unavailable(true);

        let err = create(&f.handler, 1, dec!(10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Unavailable)));

        let err = f.handler.list_transactions(1, &ctx()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Unavailable)));
    }

    #[tokio::test]
    async fn test_custom_cap() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let emitter = EventEmitter::new(Arc::new(InMemoryBroker::default()), CHANNEL);
        let handler = LedgerHandler::new(store, emitter).with_cap(dec!(50));

        assert_eq!(handler.cap(), dec!(50));
        create(&handler, 1, dec!(50)).await.unwrap();
        assert!(create(&handler, 1, dec!(0.01)).await.is_err());
    }

    // =========================================================================
    // ListTransactions / PayAllUnpaid / GetCurrentTotal
    // =========================================================================

    #[tokio::test]
    async fn test_list_unknown_user_is_empty() {
        let f = fixture();
        assert!(f.handler.list_transactions(42, &ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_idempotent_and_newest_first() {
        let f = fixture();
        create(&f.handler, 1, dec!(1)).await.unwrap();
        create(&f.handler, 1, dec!(2)).await.unwrap();
        create(&f.handler, 2, dec!(3)).await.unwrap();

        let first = f.handler.list_transactions(1, &ctx()).await.unwrap();
        let second = f.handler.list_transactions(1, &ctx()).await.unwrap();

        assert_eq!(first, second);
        let amounts: Vec<Decimal> = first.iter().map(|tx| tx.amount.value()).collect();
        assert_eq!(amounts, vec![dec!(2), dec!(1)]);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let f = fixture();
        let command = CreateTransactionCommand::new(4, dec!(77.70)).with_description("groceries");
        let created = f.handler.create_transaction(command, &ctx()).await.unwrap();

        let listed = f.handler.list_transactions(4, &ctx()).await.unwrap();
        assert_eq!(listed, vec![created.clone()]);
        assert_eq!(created.description, "groceries");
        assert!(!created.is_paid);
    }

    #[tokio::test]
    async fn test_pay_with_nothing_unpaid_emits_nothing() {
        let f = fixture();

        let emitted = f.handler.pay_all_unpaid_tracked(8, &ctx()).await.unwrap();
        assert_eq!(emitted.value.paid_count, 0);
        assert!(emitted.emission.is_none());

        create(&f.handler, 8, dec!(5)).await.unwrap();
        assert_eq!(f.handler.pay_all_unpaid(8, &ctx()).await.unwrap().paid_count, 1);
        assert_eq!(f.handler.pay_all_unpaid(8, &ctx()).await.unwrap().paid_count, 0);
    }

    #[tokio::test]
    async fn test_paying_does_not_free_capacity() {
        let f = fixture();
        create(&f.handler, 1, dec!(900)).await.unwrap();
        f.handler.pay_all_unpaid(1, &ctx()).await.unwrap();

        assert!(create(&f.handler, 1, dec!(200)).await.is_err());
        assert_eq!(f.handler.current_total(1, &ctx()).await.unwrap(), dec!(900));
    }

    // =========================================================================
    // Authorization and deadlines
    // =========================================================================

    #[tokio::test]
    async fn test_caller_must_match_subject() {
        let f = fixture();
        let context = OperationContext::new().with_request_user(UserId::new(2).unwrap());

        let err = f
            .handler
            .create_transaction(CreateTransactionCommand::new(1, dec!(10)), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Unauthorized(_))));

        let err = f.handler.pay_all_unpaid(1, &context).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Unauthorized(_))));
        assert!(f.store.is_empty());

        assert!(f.handler.list_transactions(2, &context).await.is_ok());
    }

    /// Store whose every call takes longer than any test deadline
    struct SlowStore;

    #[async_trait]
    impl LedgerStore for SlowStore {
        async fn insert_capped(&self, _new: NewTransaction, _cap: Decimal) -> Result<CappedInsert, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(StoreError::Unavailable)
        }

        async fn find_by_user(&self, _user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn total_for_user(&self, _user_id: UserId) -> Result<Decimal, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Decimal::ZERO)
        }

        async fn mark_all_paid(&self, _user_id: UserId) -> Result<u64, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_deadline_expiry_returns_timeout() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = LedgerHandler::new(Arc::new(SlowStore), EventEmitter::new(broker.clone(), CHANNEL));
        let context = OperationContext::new().with_timeout(Duration::from_millis(20));

        let err = handler
            .create_transaction(CreateTransactionCommand::new(1, dec!(10)), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));

        let err = handler.list_transactions(1, &context).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert_eq!(broker.pending(CHANNEL), 0);
    }

    // =========================================================================
    // Concurrency and cap invariant
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_creates_never_exceed_cap() {
        let f = fixture();

        let mut tasks = Vec::new();
        for i in 0..200u32 {
            let handler = f.handler.clone();
            // Amounts between 1.00 and 50.99
            let amount = Decimal::new(100 + i64::from(i * 37 % 5000), 2);
            tasks.push(tokio::spawn(async move {
                handler
                    .create_transaction(CreateTransactionCommand::new(1, amount), &OperationContext::new())
                    .await
                    .map(|tx| tx.amount.value())
            }));
        }

        let mut accepted = Decimal::ZERO;
        for task in tasks {
            match task.await.unwrap() {
                Ok(amount) => accepted += amount,
                Err(LedgerError::Domain(DomainError::CapacityExceeded { .. })) => {}
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }

        assert!(accepted <= TRANSACTION_CAP);
        let listed: Decimal = f
            .handler
            .list_transactions(1, &ctx())
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.amount.value())
            .sum();
        assert_eq!(listed, accepted);
        assert_eq!(f.handler.current_total(1, &ctx()).await.unwrap(), accepted);
    }

    fn cents_strategy() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(1i64..60_000, 1..40)
    }

    proptest! {
        #[test]
        fn prop_total_never_exceeds_cap(cents in cents_strategy()) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let f = fixture();
                let mut expected = Decimal::ZERO;

                for c in cents {
                    let amount = Decimal::new(c, 2);
                    let fits = expected + amount <= TRANSACTION_CAP;
                    let result = f
                        .handler
                        .create_transaction(CreateTransactionCommand::new(1, amount), &OperationContext::new())
                        .await;

                    prop_assert_eq!(result.is_ok(), fits);
                    if fits {
                        expected += amount;
                    }
                }

                let total = f.handler.current_total(1, &OperationContext::new()).await.unwrap();
                prop_assert_eq!(total, expected);
                prop_assert!(total <= TRANSACTION_CAP);
                Ok(())
            })?;
        }
    }
}
