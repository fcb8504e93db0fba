//! Property tests for buffer negotiation and the validity sentinel.

use proptest::prelude::*;
use simsync::protocol::{negotiate, BufferManager};
use simsync::{BufferSizes, NegotiationError, RequestedSizes};

proptest! {
    #[test]
    fn prop_matching_declarations_agree(send in 1usize..512, receive in 1usize..512) {
        let agreed = negotiate(RequestedSizes::new(send, Some(receive)), BufferSizes::new(send, receive));
        prop_assert_eq!(agreed, Ok(BufferSizes::new(send, receive)));
    }

    #[test]
    fn prop_unspecified_receive_takes_server_sizes(
        requested in 0usize..512,
        send in 1usize..512,
        receive in 1usize..512,
    ) {
        let agreed = negotiate(RequestedSizes::new(requested, None), BufferSizes::new(send, receive));
        prop_assert_eq!(agreed, Ok(BufferSizes::new(send, receive)));
    }

    #[test]
    fn prop_mismatch_reports_both_pairs(
        send in 1usize..512,
        receive in 1usize..512,
        delta in 1usize..16,
    ) {
        let client = RequestedSizes::new(send, Some(receive + delta));
        let server = BufferSizes::new(send, receive);

        let err = negotiate(client, server).unwrap_err();
        prop_assert_eq!(err.clone(), NegotiationError::SizeMismatch { client, server });

        let message = err.to_string();
        let expected = format!("server = {receive}, client = {}", receive + delta);
        prop_assert!(message.contains(&expected));
    }

    #[test]
    fn prop_agreed_sizes_hold_timestamp_slot(send in 0usize..8, receive in 0usize..8) {
        match negotiate(RequestedSizes::unspecified(), BufferSizes::new(send, receive)) {
            Ok(agreed) => prop_assert!(agreed.send >= 1 && agreed.receive >= 1),
            Err(err) => prop_assert_eq!(
                err,
                NegotiationError::EmptyBuffer { server: BufferSizes::new(send, receive) }
            ),
        }
    }

    #[test]
    fn prop_negative_or_nan_slot_zero_invalidates(first in prop::num::f64::ANY, rest in 0.0f64..1e6) {
        let mut buffers = BufferManager::new();
        buffers.allocate(BufferSizes::new(1, 2));

        let wire: Vec<u8> = [first, rest].iter().flat_map(|v| v.to_le_bytes()).collect();
        prop_assert_eq!(buffers.decode_receive(&wire), Some(2));
        prop_assert_eq!(buffers.is_invalidated(), first.is_nan() || first < 0.0);
    }
}
