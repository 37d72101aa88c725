//! Property tests driving a live client with generated traffic.

use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use huddle_core::{is_ordered, MessageStatus};
use huddle_testkit::generators::{delivery_plan, history, outgoing, permutation};
use huddle_testkit::TestHarness;
use huddle_transport::InboundEvent;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any interleaving of duplicated and reordered live deliveries leaves
    /// one record per server id, in order.
    #[test]
    fn live_delivery_is_ordered_and_unique(
        (batch, plan) in history("c1", 24).prop_flat_map(|batch| {
            let len = batch.len();
            (Just(batch), delivery_plan(len))
        })
    ) {
        let result: Result<(), TestCaseError> = runtime().block_on(async {
            let h = TestHarness::new("alice").await;
            let conversation = h.seed_group("c1", "team", &["bob", "carol", "dave"]);

            let mut expected = BTreeSet::new();
            for index in plan.iter().copied().filter(|i| *i < batch.len()) {
                expected.insert(index);
                h.client.handle_inbound(InboundEvent::NewMessage(batch[index].clone()));
            }

            let list = h.messages(&conversation);
            prop_assert!(is_ordered(&list));
            prop_assert_eq!(list.len(), expected.len());
            let ids: BTreeSet<_> = list.iter().filter_map(|m| m.id.clone()).collect();
            prop_assert_eq!(ids.len(), list.len());
            Ok(())
        });
        result?;
    }

    /// Every send is promoted in place by its echo, whatever order the
    /// echoes arrive in.
    #[test]
    fn echoes_promote_each_send_once(
        (sends, order) in (1usize..8).prop_flat_map(|n| {
            (prop::collection::vec(outgoing(), n), permutation(n))
        })
    ) {
        let result: Result<(), TestCaseError> = runtime().block_on(async {
            let h = TestHarness::new("alice").await;
            let conversation = h.seed_direct("c1", "bob");

            let mut cids = Vec::new();
            for message in sends {
                cids.push(h.client.send(&conversation, message).unwrap());
            }
            for index in order {
                let echo = h.accept_own(&conversation, &cids[index], None);
                h.client.handle_inbound(InboundEvent::NewMessage(echo));
            }

            let list = h.messages(&conversation);
            prop_assert_eq!(list.len(), cids.len());
            prop_assert!(is_ordered(&list));
            prop_assert!(list.iter().all(|m| m.status == MessageStatus::Sent));
            let seen: BTreeSet<_> = list.iter().filter_map(|m| m.cid.clone()).collect();
            prop_assert_eq!(seen, cids.into_iter().collect::<BTreeSet<_>>());
            prop_assert_eq!(h.client.messages().pending_sends(), 0);
            Ok(())
        });
        result?;
    }
}
