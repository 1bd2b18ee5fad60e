// tests/property/codec_test.rs

//! Properties of the envelope codec under arbitrary input.

use proptest::prelude::*;
use ticketbox::core::errors::TicketboxError;
use ticketbox::core::protocol::{
    MAX_ENVELOPE_SIZE, Message, Request, decode, decode_request, encode, try_decode,
};

fn request_strategy() -> impl Strategy<Value = Request> {
    (
        "[a-z-]{1,20}",
        prop::collection::vec(".{0,40}", 0..8),
        prop::option::of("[A-Za-z0-9]{1,32}"),
    )
        .prop_map(|(command, args, auth_token)| Request {
            command,
            args,
            auth_token,
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = decode(&bytes);
        let _ = try_decode(&bytes);
        let _ = decode_request(&bytes);
    }

    #[test]
    fn test_decode_never_consumes_past_input(bytes in prop::collection::vec(any::<u8>(), 1..512)) {
        if let Ok((_, used)) = decode(&bytes) {
            prop_assert!(used <= bytes.len());
        }
    }

    #[test]
    fn test_request_roundtrip(request in request_strategy()) {
        let bytes = encode(&Message::Request(request.clone())).unwrap();
        let (decoded, used) = decode_request(&bytes).unwrap();
        prop_assert_eq!(decoded, request);
        prop_assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_any_prefix_is_incomplete_not_garbage(request in request_strategy(), cut in 0usize..64) {
        let bytes = encode(&Message::Request(request)).unwrap();
        let cut = cut.min(bytes.len() - 1);
        prop_assert!(try_decode(&bytes[..cut]).unwrap().is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 8,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_oversized_envelopes_are_rejected(extra in 0usize..4096) {
        let request = Request::new("echo").arg("a".repeat(MAX_ENVELOPE_SIZE + extra));
        prop_assert!(encode(&Message::Request(request)).is_err());

        let buf = vec![0u8; MAX_ENVELOPE_SIZE + 1 + extra];
        let rejected = matches!(decode(&buf), Err(TicketboxError::Oversized { .. }));
        prop_assert!(rejected);
    }
}
