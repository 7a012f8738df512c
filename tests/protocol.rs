//! Protocol-violation handling: every broken timing rule is fatal and
//! names its constraint

use gddr_mc::{
    BankState, CommandId, DdrBurst, DdrCommand, DdrModule, DdrModuleState, GddrTiming,
    IssueConstraint, Signal,
};

fn timing() -> GddrTiming {
    GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2)
}

fn module() -> (DdrModule, Signal<DdrCommand>, Signal<DdrBurst>) {
    (
        DdrModule::new("DdrModule0", 4, 4, 16, 16, 8, timing()),
        Signal::new("cmd", 1),
        Signal::new("reply", 1),
    )
}

#[test]
#[should_panic(expected = "NoActWithRead")]
fn read_with_no_preceding_activate_panics() {
    let (mut module, mut cmd, mut reply) = module();
    cmd.write(0, DdrCommand::read(0, 0, false));
    module.clock(1, &mut cmd, &mut reply);
}

#[test]
#[should_panic(expected = "NoActWithWrite")]
fn write_with_no_preceding_activate_panics() {
    let (mut module, mut cmd, mut reply) = module();
    cmd.write(0, DdrCommand::write(0, 0, DdrBurst::new(4), false));
    module.clock(1, &mut cmd, &mut reply);
}

#[test]
#[should_panic(expected = "WriteToPre")]
fn precharge_during_write_recovery_panics() {
    let (mut module, mut cmd, mut reply) = module();
    cmd.write(0, DdrCommand::activate(0, 0));
    for cycle in 1..5 {
        module.clock(cycle, &mut cmd, &mut reply);
    }
    cmd.write(4, DdrCommand::write(0, 0, DdrBurst::new(4), false));
    for cycle in 5..7 {
        module.clock(cycle, &mut cmd, &mut reply);
    }
    // write ends at cycle 9, tWR = 3: a precharge at cycle 7 is illegal
    cmd.write(6, DdrCommand::precharge(0));
    module.clock(7, &mut cmd, &mut reply);
}

#[test]
#[should_panic(expected = "bank identifier")]
fn out_of_range_bank_panics() {
    let (mut module, mut cmd, mut reply) = module();
    cmd.write(0, DdrCommand::activate(9, 0));
    module.clock(1, &mut cmd, &mut reply);
}

/// The state view reports the same constraint the module would panic on,
/// which is how schedulers avoid the violation in the first place
#[test]
fn state_view_names_the_constraint_before_the_module_panics() {
    let mut view = DdrModuleState::new(4, 4, 8, timing());
    view.update_state(0);
    assert_eq!(
        view.issue_constraint(0, CommandId::Read),
        IssueConstraint::NoActWithRead
    );
    assert_eq!(
        view.issue_constraint(0, CommandId::Write),
        IssueConstraint::NoActWithWrite
    );

    view.post_activate(0, 3);
    assert_eq!(
        view.issue_constraint(0, CommandId::Read),
        IssueConstraint::ActToRead
    );
    assert_eq!(
        view.issue_constraint(1, CommandId::Activate),
        IssueConstraint::ActToAct
    );

    view.update_state(3);
    assert_eq!(view.state(0), BankState::Active);
    assert_eq!(view.issue_constraint(0, CommandId::Read), IssueConstraint::None);
}

/// Dummy commands only annotate the trace; they never change bank state
#[test]
fn dummy_commands_have_no_protocol_effect() {
    let (mut module, mut cmd, mut reply) = module();
    cmd.write(0, DdrCommand::dummy(IssueConstraint::ActToRead));
    for cycle in 1..5 {
        module.clock(cycle, &mut cmd, &mut reply);
    }
    cmd.write(5, DdrCommand::activate(0, 0));
    for cycle in 5..10 {
        module.clock(cycle, &mut cmd, &mut reply);
    }
    assert_eq!(module.stats().activate_commands, 1);
}
