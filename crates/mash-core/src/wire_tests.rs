// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Value as ModelValue;
use std::collections::BTreeMap;

fn sample_request() -> Envelope {
    Envelope::Request {
        message_id: 7,
        operation: Operation::Read,
        endpoint_id: 1,
        feature_id: 2,
        payload: ModelValue::Map(BTreeMap::from([("a".to_owned(), ModelValue::Int64(1))])),
    }
}

#[test]
fn round_trip_request() {
    let env = sample_request();
    let frame = encode_frame(&env).unwrap();
    let decoded = decode_frame(&frame[4..]).unwrap();
    match decoded {
        Envelope::Request { message_id, operation, endpoint_id, feature_id, .. } => {
            assert_eq!(message_id, 7);
            assert_eq!(operation, Operation::Read);
            assert_eq!(endpoint_id, 1);
            assert_eq!(feature_id, 2);
        }
        _ => panic!("wrong variant"),
    }
}

#[test]
fn round_trip_notification() {
    let env = Envelope::Notification {
        subscription_id: 3,
        endpoint_id: 1,
        feature_id: 1,
        changes: BTreeMap::from([(10u16, ModelValue::Bool(true))]),
    };
    let frame = encode_frame(&env).unwrap();
    let decoded = decode_frame(&frame[4..]).unwrap();
    assert_eq!(decoded.message_id(), None);
}

#[test]
fn round_trip_response() {
    let env = Envelope::Response {
        message_id: 42,
        status: StatusCode::Success,
        payload: ModelValue::Null,
    };
    let frame = encode_frame(&env).unwrap();
    let decoded = decode_frame(&frame[4..]).unwrap();
    assert_eq!(decoded.message_id(), Some(42));
}

#[test]
fn duplicate_map_key_is_rejected() {
    // Hand-build a CBOR map with a duplicate key: {"a": 1, "a": 2}.
    let mut body = Vec::new();
    body.push(0xa2); // map(2)
    body.push(0x61); // text(1)
    body.push(b'a');
    body.push(0x01); // 1
    body.push(0x61); // text(1)
    body.push(b'a');
    body.push(0x02); // 2

    let err = decode_frame(&body).unwrap_err();
    assert!(matches!(err, SessionError::InvalidCbor(_)));
}

#[test]
fn peek_request_message_id_recovers_id_from_a_rejected_duplicate_key_frame() {
    // {"type": "request", "message_id": 9, "message_id": 9} — a duplicate
    // key that `decode_frame` rejects, but the id is still recoverable for
    // an `InvalidParameter` reply.
    let mut body = Vec::new();
    body.push(0xa3); // map(3)
    body.extend([0x64, b't', b'y', b'p', b'e']); // text(4) "type"
    body.extend([0x67, b'r', b'e', b'q', b'u', b'e', b's', b't']); // text(7) "request"
    body.extend([0x6a, b'm', b'e', b's', b's', b'a', b'g', b'e', b'_', b'i', b'd']); // text(10) "message_id"
    body.push(0x09); // 9
    body.extend([0x6a, b'm', b'e', b's', b's', b'a', b'g', b'e', b'_', b'i', b'd']);
    body.push(0x09); // 9

    assert!(decode_frame(&body).is_err());
    assert_eq!(peek_request_message_id(&body), Some(9));
}

#[test]
fn peek_request_message_id_is_none_for_non_request_frames() {
    let env = Envelope::Response { message_id: 1, status: StatusCode::Success, payload: ModelValue::Null };
    let frame = encode_frame(&env).unwrap();
    assert_eq!(peek_request_message_id(&frame[4..]), None);
}

#[tokio::test]
async fn read_write_frame_round_trips_over_a_duplex_pipe() {
    let (mut a, mut b) = tokio::io::duplex(4096);
    let env = sample_request();
    let body = {
        let frame = encode_frame(&env).unwrap();
        frame[4..].to_vec()
    };
    write_frame(&mut a, &body).await.unwrap();
    let received = read_frame(&mut b).await.unwrap();
    assert_eq!(received, body);
}
