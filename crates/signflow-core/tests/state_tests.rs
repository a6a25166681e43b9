use chrono::Utc;
use proptest::prelude::*;
use signflow_core::state_machine::progress_rank;
use signflow_core::{
    allowed_transitions, validate_transition, DocumentRecord, DocumentStatus, EnvelopeId,
    Mutation, NewDocument, NewSigner, OwnerId, ProviderReport, ProviderStatus, SigningError,
};

#[derive(Debug, Clone)]
enum Op {
    Sign(usize),
    Cancel,
    Provider(&'static str),
}

fn status() -> impl Strategy<Value = DocumentStatus> {
    prop_oneof![
        Just(DocumentStatus::Pending),
        Just(DocumentStatus::PartiallySigned),
        Just(DocumentStatus::Signed),
        Just(DocumentStatus::Cancelled),
    ]
}

fn signing_op(signers: usize) -> impl Strategy<Value = Op> {
    (0..signers).prop_map(Op::Sign)
}

fn any_op(signers: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..signers).prop_map(Op::Sign),
        1 => Just(Op::Cancel),
        2 => prop_oneof![
            Just("pending"),
            Just("processing"),
            Just("issued"),
            Just("approved"),
            Just("rejected"),
            Just("revoked"),
            Just("expired"),
            Just("paused_by_auditor"),
        ]
        .prop_map(Op::Provider),
    ]
}

fn record(signers: usize) -> DocumentRecord {
    let mut request = NewDocument::new("Contract").with_envelope(EnvelopeId::new("env-1"));
    for i in 0..signers {
        let signer = NewSigner::new(format!("signer{i}@example.com"));
        request = request.with_signer(if i == 0 { signer.organization() } else { signer });
    }
    DocumentRecord::create(OwnerId::new("acme"), request, Utc::now()).unwrap()
}

fn mutation(record: &DocumentRecord, op: &Op) -> Mutation {
    match op {
        Op::Sign(idx) => Mutation::RecordSignature {
            signer_id: record.signers[*idx].id,
            identity_number: None,
        },
        Op::Cancel => Mutation::Cancel,
        Op::Provider(code) => Mutation::ApplyProviderStatus(ProviderReport::new(
            EnvelopeId::new("env-1"),
            ProviderStatus::from_code(code),
        )),
    }
}

#[test]
fn test_pending_transitions() {
    assert!(validate_transition(DocumentStatus::Pending, DocumentStatus::PartiallySigned).is_ok());
    assert!(validate_transition(DocumentStatus::Pending, DocumentStatus::Signed).is_ok());
    assert!(validate_transition(DocumentStatus::Pending, DocumentStatus::Cancelled).is_ok());
}

#[test]
fn test_final_states_are_absorbing() {
    for to in [
        DocumentStatus::Pending,
        DocumentStatus::PartiallySigned,
        DocumentStatus::Signed,
        DocumentStatus::Cancelled,
    ] {
        assert!(validate_transition(DocumentStatus::Signed, to).is_err());
        assert!(validate_transition(DocumentStatus::Cancelled, to).is_err());
    }
    // No way back
    assert!(validate_transition(DocumentStatus::PartiallySigned, DocumentStatus::Pending).is_err());
}

proptest! {
    #[test]
    fn prop_transitions_match_table(from in status(), to in status()) {
        let allowed = allowed_transitions(from);
        prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_signatures_in_any_order_converge(
        (signers, ops) in (1usize..6).prop_flat_map(|n| {
            (Just(n), prop::collection::vec(signing_op(n), 0..24))
        })
    ) {
        let mut rec = record(signers);
        let mut signed = std::collections::HashSet::new();

        for op in &ops {
            let Op::Sign(idx) = op else { unreachable!() };
            let outcome = rec.apply(mutation(&rec, op), Utc::now()).unwrap();
            // Duplicates never write
            prop_assert_eq!(outcome.changed, signed.insert(*idx));
            prop_assert!(rec.invariants_hold());
        }

        let all = signed.len() == signers;
        prop_assert_eq!(rec.document.status == DocumentStatus::Signed, all);
        prop_assert_eq!(rec.document.signed_count as usize, signed.len());
    }

    #[test]
    fn prop_mixed_events_never_regress(
        (signers, ops) in (1usize..5).prop_flat_map(|n| {
            (Just(n), prop::collection::vec(any_op(n), 0..32))
        })
    ) {
        let mut rec = record(signers);

        for op in &ops {
            let before = rec.clone();
            match rec.apply(mutation(&rec, op), Utc::now()) {
                Ok(outcome) => {
                    let from = before.document.status;
                    let to = outcome.document.status;
                    if from == DocumentStatus::Cancelled {
                        prop_assert_eq!(to, DocumentStatus::Cancelled);
                        prop_assert!(!outcome.changed);
                    }
                    if to != DocumentStatus::Cancelled {
                        prop_assert!(progress_rank(to) >= progress_rank(from));
                    }
                    if from == DocumentStatus::Signed {
                        prop_assert_eq!(to, DocumentStatus::Signed);
                    }
                }
                Err(SigningError::DocumentCancelled(_)) => {
                    prop_assert_eq!(before.document.status, DocumentStatus::Cancelled);
                    rec = before;
                }
                Err(SigningError::InvalidTransition { from, .. }) => {
                    prop_assert_eq!(from, DocumentStatus::Signed);
                    rec = before;
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
            prop_assert!(rec.invariants_hold());
        }
    }
}
