// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{Access, Attribute, Command, Endpoint, Feature};
use crate::notify::NotificationSink;
use async_trait::async_trait;

struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send_notification(&self, _envelope: Envelope) -> Result<(), crate::error::SessionError> {
        Ok(())
    }
}

fn test_model() -> Arc<RwLock<DataModel>> {
    let feature = Feature::new(1)
        .with_attribute(Attribute::new(10, Access::ReadWrite, Value::Int64(0)))
        .with_attribute(Attribute::new(11, Access::ReadOnly, Value::Text("fixed".into())))
        .with_command(Command {
            id: 1,
            handler: Box::new(|_ctx, _params| Ok(Value::Text("done".into()))),
        });
    let model = DataModel::new().with_endpoint(Endpoint::new(1, "appliance", "test").with_feature(feature));
    Arc::new(RwLock::new(model))
}

async fn handler_with_session(session_id: u64) -> ProtocolHandler {
    let model = test_model();
    let dispatcher = NotificationDispatcher::new(model.clone());
    dispatcher.register_session(session_id, Arc::new(crate::subscription::SubscriptionManager::new()), Arc::new(NullSink)).await;
    ProtocolHandler::new(model, dispatcher, session_id, None)
}

fn request(operation: Operation, endpoint_id: u8, feature_id: u8, payload: Value) -> Envelope {
    Envelope::Request { message_id: 1, operation, endpoint_id, feature_id, payload }
}

#[tokio::test]
async fn read_returns_all_attributes_when_filter_is_empty() {
    let handler = handler_with_session(1).await;
    let resp = handler.handle(request(Operation::Read, 1, 1, Value::Map(BTreeMap::new()))).await;
    match resp {
        Envelope::Response { status, payload, .. } => {
            assert_eq!(status, StatusCode::Success);
            let Value::Map(map) = payload else { panic!("expected map payload") };
            assert_eq!(map.get("10"), Some(&Value::Int64(0)));
            assert_eq!(map.get("11"), Some(&Value::Text("fixed".into())));
        }
        _ => panic!("expected response"),
    }
}

#[tokio::test]
async fn read_invalid_endpoint_reports_status() {
    let handler = handler_with_session(1).await;
    let resp = handler.handle(request(Operation::Read, 99, 1, Value::Map(BTreeMap::new()))).await;
    match resp {
        Envelope::Response { status, .. } => assert_eq!(status, StatusCode::InvalidEndpoint),
        _ => panic!("expected response"),
    }
}

#[tokio::test]
async fn write_to_read_only_attribute_is_rejected() {
    let handler = handler_with_session(1).await;
    let payload = Value::Map(BTreeMap::from([("11".to_owned(), Value::Text("nope".into()))]));
    let resp = handler.handle(request(Operation::Write, 1, 1, payload)).await;
    match resp {
        Envelope::Response { status, .. } => assert_eq!(status, StatusCode::InvalidParameter),
        _ => panic!("expected response"),
    }
}

#[tokio::test]
async fn write_then_read_observes_new_value() {
    let handler = handler_with_session(1).await;
    let payload = Value::Map(BTreeMap::from([("10".to_owned(), Value::Int64(99))]));
    let resp = handler.handle(request(Operation::Write, 1, 1, payload)).await;
    assert!(matches!(resp, Envelope::Response { status: StatusCode::Success, .. }));

    let resp = handler.handle(request(Operation::Read, 1, 1, Value::Map(BTreeMap::new()))).await;
    match resp {
        Envelope::Response { payload: Value::Map(map), .. } => {
            assert_eq!(map.get("10"), Some(&Value::Int64(99)));
        }
        _ => panic!("expected map response"),
    }
}

#[tokio::test]
async fn subscribe_to_reserved_feature_zero_is_rejected() {
    let handler = handler_with_session(1).await;
    let resp = handler.handle(request(Operation::Subscribe, 1, 0, Value::Map(BTreeMap::new()))).await;
    match resp {
        Envelope::Response { status, .. } => assert_eq!(status, StatusCode::InvalidFeature),
        _ => panic!("expected response"),
    }
}

#[tokio::test]
async fn subscribe_then_unsubscribe_round_trip() {
    let handler = handler_with_session(1).await;
    let resp = handler.handle(request(Operation::Subscribe, 1, 1, Value::Map(BTreeMap::new()))).await;
    let sub_id = match resp {
        Envelope::Response { status: StatusCode::Success, payload: Value::Map(map), .. } => {
            match map.get("sub_id") {
                Some(Value::Uint64(id)) => *id,
                _ => panic!("expected sub_id"),
            }
        }
        other => panic!("expected success response, got {other:?}"),
    };

    let payload = Value::Map(BTreeMap::from([("sub_id".to_owned(), Value::Uint64(sub_id))]));
    let resp = handler.handle(request(Operation::Unsubscribe, 1, 1, payload)).await;
    assert!(matches!(resp, Envelope::Response { status: StatusCode::Success, .. }));
}

#[tokio::test]
async fn invoke_unknown_command_is_unsupported() {
    let handler = handler_with_session(1).await;
    let payload = Value::Map(BTreeMap::from([("command_id".to_owned(), Value::Uint64(99))]));
    let resp = handler.handle(request(Operation::Invoke, 1, 1, payload)).await;
    match resp {
        Envelope::Response { status, .. } => assert_eq!(status, StatusCode::Unsupported),
        _ => panic!("expected response"),
    }
}

#[tokio::test]
async fn invoke_known_command_returns_handler_result() {
    let handler = handler_with_session(1).await;
    let payload = Value::Map(BTreeMap::from([("command_id".to_owned(), Value::Uint64(1))]));
    let resp = handler.handle(request(Operation::Invoke, 1, 1, payload)).await;
    match resp {
        Envelope::Response { status: StatusCode::Success, payload, .. } => {
            assert_eq!(payload, Value::Text("done".into()));
        }
        other => panic!("expected success, got {other:?}"),
    }
}
