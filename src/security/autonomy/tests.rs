use super::*;
use std::collections::BTreeMap;
use std::str::FromStr;

fn manager_with(default_tier: AutonomyTier) -> AutonomyManager {
    AutonomyManager::new(AutonomyConfig {
        default_tier,
        ..AutonomyConfig::default()
    })
}

// ── AutonomyTier ─────────────────────────────────────────

#[test]
fn default_tier_is_partner() {
    assert_eq!(AutonomyTier::default(), AutonomyTier::Partner);
    assert_eq!(AutonomyConfig::default().default_tier, AutonomyTier::Partner);
}

#[test]
fn tiers_are_ordered_conservative_to_permissive() {
    assert!(AutonomyTier::Observer < AutonomyTier::Guardian);
    assert!(AutonomyTier::Guardian < AutonomyTier::Partner);
    assert!(AutonomyTier::Partner < AutonomyTier::Autonomous);
}

#[test]
fn tier_serde_and_strum_agree() {
    let json = serde_json::to_string(&AutonomyTier::Autonomous).unwrap();
    assert_eq!(json, "\"autonomous\"");
    assert_eq!(AutonomyTier::Guardian.to_string(), "guardian");
    assert_eq!(
        AutonomyTier::from_str("observer").unwrap(),
        AutonomyTier::Observer
    );
    assert!(AutonomyTier::from_str("alter_ego").is_err());
}

#[test]
fn partner_auto_approves_read_and_write_but_not_execute() {
    let tier = AutonomyTier::Partner;
    assert_eq!(
        tier.decision_for(ActionClass::Read),
        AutonomyDecision::AutoApprove
    );
    assert_eq!(
        tier.decision_for(ActionClass::Write),
        AutonomyDecision::AutoApprove
    );
    assert_eq!(
        tier.decision_for(ActionClass::Execute),
        AutonomyDecision::RequireApproval
    );
}

#[test]
fn reads_auto_approve_under_every_tier() {
    for tier in AutonomyTier::ALL {
        assert_eq!(
            tier.decision_for(ActionClass::Read),
            AutonomyDecision::AutoApprove,
            "tier {tier}"
        );
    }
}

#[test]
fn observer_denies_side_effects() {
    let tier = AutonomyTier::Observer;
    assert_eq!(tier.decision_for(ActionClass::Write), AutonomyDecision::Deny);
    assert_eq!(tier.decision_for(ActionClass::Execute), AutonomyDecision::Deny);
}

#[test]
fn guardian_requires_approval_for_side_effects() {
    let tier = AutonomyTier::Guardian;
    assert_eq!(
        tier.decision_for(ActionClass::Write),
        AutonomyDecision::RequireApproval
    );
    assert_eq!(
        tier.decision_for(ActionClass::Execute),
        AutonomyDecision::RequireApproval
    );
}

#[test]
fn autonomous_auto_approves_execute() {
    assert_eq!(
        AutonomyTier::Autonomous.decision_for(ActionClass::Execute),
        AutonomyDecision::AutoApprove
    );
}

#[test]
fn routine_promotion_only_for_partner_and_up() {
    assert!(!AutonomyTier::Observer.allows_routine_promotion());
    assert!(!AutonomyTier::Guardian.allows_routine_promotion());
    assert!(AutonomyTier::Partner.allows_routine_promotion());
    assert!(AutonomyTier::Autonomous.allows_routine_promotion());
}

#[test]
fn next_tier_climbs_one_rung_and_stops_at_autonomous() {
    assert_eq!(AutonomyTier::Observer.next(), Some(AutonomyTier::Guardian));
    assert_eq!(AutonomyTier::Guardian.next(), Some(AutonomyTier::Partner));
    assert_eq!(AutonomyTier::Partner.next(), Some(AutonomyTier::Autonomous));
    assert_eq!(AutonomyTier::Autonomous.next(), None);
}

// ── ActionCatalog ────────────────────────────────────────

#[test]
fn catalog_classifies_known_actions() {
    let catalog = ActionCatalog::builtin();
    assert_eq!(catalog.classify("email.fetch"), ActionClass::Read);
    assert_eq!(catalog.classify("email.archive"), ActionClass::Write);
    assert_eq!(catalog.classify("email.send"), ActionClass::Execute);
    assert_eq!(catalog.classify("calendar.delete"), ActionClass::Execute);
    assert_eq!(catalog.classify("calendar.create"), ActionClass::Write);
}

#[test]
fn unknown_actions_fail_closed_to_execute() {
    let catalog = ActionCatalog::builtin();
    assert!(!catalog.is_known("bank.wire"));
    assert_eq!(catalog.classify("bank.wire"), ActionClass::Execute);
    assert_eq!(catalog.classify(""), ActionClass::Execute);
}

#[test]
fn configured_classifications_extend_and_override() {
    let mut overrides = BTreeMap::new();
    overrides.insert("notes.append".to_string(), ActionClass::Write);
    overrides.insert("email.draft".to_string(), ActionClass::Execute);
    let catalog = ActionCatalog::with_overrides(&overrides);

    assert_eq!(catalog.classify("notes.append"), ActionClass::Write);
    assert_eq!(catalog.classify("email.draft"), ActionClass::Execute);
    assert_eq!(catalog.classify("email.fetch"), ActionClass::Read);

    let manager = AutonomyManager::new(AutonomyConfig {
        classifications: overrides,
        ..AutonomyConfig::default()
    });
    assert!(manager.is_classified("notes.append"));
    assert!(!manager.is_classified("bank.wire"));
}

#[test]
fn domain_is_namespace_prefix() {
    assert_eq!(domain_of("email.send"), "email");
    assert_eq!(domain_of("calendar.delete"), "calendar");
    assert_eq!(domain_of("standalone"), "standalone");
}

#[test]
fn well_formed_actions() {
    assert!(is_well_formed_action("email.send"));
    assert!(is_well_formed_action("bank.wire_transfer"));
    assert!(!is_well_formed_action("send_email"));
    assert!(!is_well_formed_action("Email.Send"));
    assert!(!is_well_formed_action(".send"));
    assert!(!is_well_formed_action("email."));
}

// ── AutonomyManager ──────────────────────────────────────

#[test]
fn domain_override_replaces_default_for_that_domain_only() {
    let manager = manager_with(AutonomyTier::Partner);
    manager.set_domain_tier("calendar", AutonomyTier::Guardian);

    assert_eq!(manager.tier_for("calendar"), AutonomyTier::Guardian);
    assert_eq!(manager.tier_for("email"), AutonomyTier::Partner);
    assert_eq!(
        manager.decide("calendar", ActionClass::Write),
        AutonomyDecision::RequireApproval
    );
    assert_eq!(
        manager.decide("email", ActionClass::Write),
        AutonomyDecision::AutoApprove
    );
}

#[test]
fn clearing_override_falls_back_to_default() {
    let manager = manager_with(AutonomyTier::Partner);
    manager.set_domain_tier("email", AutonomyTier::Observer);
    assert!(manager.clear_domain_tier("email"));
    assert!(!manager.clear_domain_tier("email"));
    assert_eq!(manager.tier_for("email"), AutonomyTier::Partner);
}

#[test]
fn set_default_tier_applies_to_domains_without_override() {
    let manager = manager_with(AutonomyTier::Partner);
    manager.set_domain_tier("email", AutonomyTier::Partner);
    manager.set_default_tier(AutonomyTier::Autonomous);

    assert_eq!(manager.tier_for("calendar"), AutonomyTier::Autonomous);
    assert_eq!(manager.tier_for("email"), AutonomyTier::Partner);
    assert_eq!(manager.config().default_tier, AutonomyTier::Autonomous);
}

#[test]
fn evaluate_records_domain_class_and_tier() {
    let manager = manager_with(AutonomyTier::Partner);
    let verdict = manager.evaluate("email.send");

    assert_eq!(verdict.domain, "email");
    assert_eq!(verdict.class, ActionClass::Execute);
    assert_eq!(verdict.tier, AutonomyTier::Partner);
    assert_eq!(verdict.decision, AutonomyDecision::RequireApproval);
}

#[test]
fn evaluate_unknown_action_requires_approval_under_partner() {
    let manager = manager_with(AutonomyTier::Partner);
    let verdict = manager.evaluate("bank.wire");

    assert_eq!(verdict.class, ActionClass::Execute);
    assert_eq!(verdict.decision, AutonomyDecision::RequireApproval);
}

#[test]
fn managers_with_different_configs_are_independent() {
    let cautious = manager_with(AutonomyTier::Guardian);
    let bold = manager_with(AutonomyTier::Autonomous);

    assert_eq!(
        cautious.evaluate("email.archive").decision,
        AutonomyDecision::RequireApproval
    );
    assert_eq!(
        bold.evaluate("email.archive").decision,
        AutonomyDecision::AutoApprove
    );
}
