/// Wire conformance tests for response bodies of both polling contracts

use seq_feed::decoder::GoneReason;
use seq_feed::{DecodeError, Decoder, Side};

#[test]
fn test_decode_batch() {
    let body = br#"{
        "fromExclusive": 9,
        "latestSeq": 11,
        "updates": [
            {"seq": 10, "priceChanges": [{"ticker": "A", "price": 99.5, "volume": 3, "side": "BID"}]},
            {"seq": 11, "priceChanges": [{"ticker": "B", "price": 12, "volume": 0, "side": "ASK"}]}
        ]
    }"#;

    let events = Decoder::batch(body).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 10);
    assert_eq!(events[0].price_changes[0].side, Side::Bid);
    assert_eq!(events[1].price_changes[0].volume, 0.0);
}

#[test]
fn test_batch_missing_updates() {
    let result = Decoder::batch(br#"{"fromExclusive": 9}"#);
    assert!(matches!(result, Err(DecodeError::MissingField("updates"))));
}

#[test]
fn test_batch_with_bad_side() {
    let body = br#"{"updates":[{"seq":1,"priceChanges":[{"ticker":"A","price":1,"volume":1,"side":"MID"}]}]}"#;
    assert!(matches!(Decoder::batch(body), Err(DecodeError::Json(_))));
}

#[test]
fn test_decode_exact_update() {
    let body = br#"{
        "message": {"errorCode": 0, "errorMessage": ""},
        "seq": 42,
        "update": {"updateId": 42, "priceChanges": []}
    }"#;
    let event = Decoder::update(body).unwrap();
    assert_eq!(event.seq, 42);
    assert!(event.price_changes.is_empty());
}

#[test]
fn test_exact_update_not_an_object() {
    let result = Decoder::update(br#"{"seq": 1, "update": [1, 2]}"#);
    assert!(matches!(result, Err(DecodeError::InvalidField { field: "update" })));
}

#[test]
fn test_error_code_without_code() {
    assert_eq!(Decoder::error_code(br#"{"message":{"errorMessage":"x"}}"#).unwrap(), None);
    assert_eq!(Decoder::error_code(br#"{"message":"plain text"}"#).unwrap(), None);
    assert!(Decoder::error_code(br#"{"other":1}"#).is_err());
}

#[test]
fn test_latest_seq() {
    assert_eq!(Decoder::latest_seq(br#"{"latestSeq": 7}"#).unwrap(), Some(7));
    assert_eq!(Decoder::latest_seq(br#"{"latestSeq": -1}"#).unwrap(), None);
    assert!(Decoder::latest_seq(b"{}").is_err());
}

#[test]
fn test_gone_unknown_reason() {
    let reason = Decoder::gone(br#"{"error":"maintenance"}"#).unwrap();
    assert_eq!(reason, GoneReason::Unknown("maintenance".to_string()));
}

#[test]
fn test_gone_too_old_without_bound() {
    let reason = Decoder::gone(br#"{"error":"from-too-old"}"#).unwrap();
    assert_eq!(reason, GoneReason::TooOld { min_available: None });
}

#[test]
fn test_snapshot_missing_state() {
    let result = Decoder::snapshot(br#"{"latestSeq": 3, "snapshot": null}"#);
    assert!(matches!(result, Err(DecodeError::MissingField("snapshot"))));
}
