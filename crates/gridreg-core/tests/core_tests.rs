use std::path::Path;

use gridreg_core::{
    makekey, CaseOutcome, ResourceRequest, RevisionToken, RunId, SuiteReport, TestIdentity,
    TestResult,
};

#[test]
fn test_identity_key_round_trips_through_makekey() {
    let id = TestIdentity::new("/tests/comparefiles/tiger.eps", "ppmraw", 300);
    let direct = makekey(
        Path::new("/tests/comparefiles/tiger.eps"),
        &[("dpi", "300".into()), ("device", "ppmraw".into())],
    );
    assert_eq!(id.key(), direct);
}

#[test]
fn test_run_ids_are_unique() {
    assert_ne!(RunId::new(), RunId::new());
}

#[test]
fn test_revision_tokens_preserve_their_name() {
    let token = RevisionToken::from_str("8700");
    assert_eq!(token.as_str(), "8700");
    assert_eq!(token.to_string(), "8700");
}

#[test]
fn test_report_streams_in_arrival_order() {
    let mut report = SuiteReport::new("gxps", "/t", 6);
    for (file, result) in [
        ("/t/b.xps", TestResult::Ok("1".into())),
        ("/t/a.xps", TestResult::Ok("2".into())),
    ] {
        report.record(CaseOutcome {
            identity: TestIdentity::new(file, "ppmraw", 600),
            result,
        });
    }
    // arrival order, not input order: whatever came back first is first
    assert_eq!(report.oks[0].identity.file, Path::new("/t/b.xps"));
    assert_eq!(report.total, 2);
}

#[test]
fn test_resource_request_slot_arithmetic() {
    let req = ResourceRequest {
        pool: "red".into(),
        nodes: 11,
        slots_per_node: 2,
    };
    assert_eq!(req.slots(), 22);
}
