//! Consultant record checks.
//!
//! A consultant response is only accepted for the exact protocol version and
//! request id it was produced for; these tests pin that rule down and make
//! sure the fixed-size records survive the byte codec unchanged.

use proptest::prelude::*;
use shared::constants::CONSULTANT_PROTOCOL_VERSION;
use shared::{AccessNotification, ConsultantRequest, ConsultantResponse, Decision, OperationKind};

fn request(id: u32) -> ConsultantRequest {
    let n = AccessNotification::new(1200, "excel.exe", r"\DEVICE\HARDDISKVOLUME2\BOOK.XLSX", OperationKind::Open)
        .unwrap();
    ConsultantRequest::query(id, &n)
}

proptest! {
    #[test]
    fn accept_iff_version_and_id_match(
        req_version in prop_oneof![Just(CONSULTANT_PROTOCOL_VERSION), any::<u32>()],
        req_id in 1u32..,
        resp_version in prop_oneof![Just(CONSULTANT_PROTOCOL_VERSION), any::<u32>()],
        resp_id in prop_oneof![Just(0u32), 1u32..],
        decision in prop_oneof![Just(0u32), Just(1u32), any::<u32>()],
        reason in any::<u32>(),
    ) {
        let mut req = request(req_id);
        req.version = req_version;
        let resp = ConsultantResponse {
            version: resp_version,
            request_id: resp_id,
            decision: Decision::from_code(decision),
            reason,
        };
        let decoded = ConsultantResponse::decode(&resp.encode()).unwrap();
        prop_assert_eq!(
            decoded.answers(&req),
            resp_version == req_version && resp_id == req_id
        );
    }
}

#[test]
fn answering_copies_version_and_id() {
    let req = request(31);
    let resp = ConsultantResponse::answering(&req, Decision::Block, 7);
    assert!(resp.answers(&req));
    assert!(!resp.answers(&request(32)));
    assert_eq!(resp.reason, 7);
}

#[test]
fn request_survives_the_wire() {
    let req = request(9);
    let raw = req.encode();
    assert_eq!(raw.len(), ConsultantRequest::SIZE);
    let back = ConsultantRequest::decode(&raw).unwrap();
    assert_eq!(back, req);
    assert_eq!(back.file_name.to_string_lossy(), r"\DEVICE\HARDDISKVOLUME2\BOOK.XLSX");
}
