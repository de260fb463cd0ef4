use concord_core::{BranchState, IntentResolver, ProposalState};
use concord_test_utils::{memory_backend, providing, requiring};
use proptest::prelude::*;

#[test]
fn test_branch_lifecycle() {
    assert!(BranchState::validate_transition(BranchState::Open, BranchState::Proposed).is_ok());
    assert!(BranchState::validate_transition(BranchState::Proposed, BranchState::Merged).is_ok());
    assert!(BranchState::validate_transition(BranchState::Proposed, BranchState::Open).is_ok());
    assert!(BranchState::validate_transition(BranchState::Proposed, BranchState::Abandoned).is_ok());

    // Invalid
    assert!(BranchState::validate_transition(BranchState::Open, BranchState::Merged).is_err());
    assert!(BranchState::validate_transition(BranchState::Merged, BranchState::Open).is_err());
    assert!(BranchState::validate_transition(BranchState::Abandoned, BranchState::Proposed).is_err());
}

#[test]
fn test_proposal_lifecycle() {
    assert!(ProposalState::validate_transition(ProposalState::Received, ProposalState::Evaluating).is_ok());
    assert!(ProposalState::validate_transition(ProposalState::Evaluating, ProposalState::Deadlocked).is_ok());
    assert!(ProposalState::validate_transition(ProposalState::Escalated, ProposalState::Rejected).is_ok());

    assert!(ProposalState::validate_transition(ProposalState::Approved, ProposalState::Evaluating).is_err());
    assert!(ProposalState::validate_transition(ProposalState::Escalated, ProposalState::Deadlocked).is_err());
}

#[test]
fn test_dependency_order_over_live_graph() {
    let r = IntentResolver::new(memory_backend()).unwrap();
    r.publish(requiring("ui", "ui", "CheckoutApi", 0)).unwrap();
    r.publish(providing("api", "api", "CheckoutApi", 1).requiring(concord_test_utils::function("Ledger")))
        .unwrap();
    r.publish(providing("db", "db", "LedgerModel", 2)).unwrap();

    let graph = r.dependency_graph().unwrap();
    assert_eq!(graph.execution_order().unwrap(), ["db", "api", "ui"]);
    assert!(r.find_cycles().unwrap().is_empty());
}

fn branch_state() -> impl Strategy<Value = BranchState> {
    prop_oneof![
        Just(BranchState::Open),
        Just(BranchState::Proposed),
        Just(BranchState::Merged),
        Just(BranchState::Abandoned),
    ]
}

fn proposal_state() -> impl Strategy<Value = ProposalState> {
    prop_oneof![
        Just(ProposalState::Received),
        Just(ProposalState::Evaluating),
        Just(ProposalState::Approved),
        Just(ProposalState::Rejected),
        Just(ProposalState::Escalated),
        Just(ProposalState::Deadlocked),
    ]
}

proptest! {
    #[test]
    fn prop_branch_transitions_match_allowed(from in branch_state(), to in branch_state()) {
        let res = BranchState::validate_transition(from, to);
        prop_assert_eq!(res.is_ok(), from.allowed_transitions().contains(&to));
        if from.is_terminal() {
            prop_assert!(res.is_err());
        }
    }

    #[test]
    fn prop_proposal_transitions_match_allowed(from in proposal_state(), to in proposal_state()) {
        let res = ProposalState::validate_transition(from, to);
        prop_assert_eq!(res.is_ok(), from.allowed_transitions().contains(&to));
    }
}
