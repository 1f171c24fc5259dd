use crate::config::AutonomyConfig;
use crate::orchestrator::{ActionLogEntry, ActionRecord, ApprovalStatus, MessageOutcome};
use crate::store::{ApprovalPattern, ConversationTurn, EscalationPrompt, PendingAction};

pub fn render_autonomy(config: &AutonomyConfig) -> String {
    let mut lines = vec![
        "◆ Autonomy".to_string(),
        String::new(),
        format!("  default tier        {}", config.default_tier),
        format!("  routine threshold   {}", config.auto_execute_threshold),
    ];
    if config.domain_overrides.is_empty() {
        lines.push("  domain overrides    (none)".to_string());
    } else {
        lines.push("  domain overrides".to_string());
        lines.extend(
            config
                .domain_overrides
                .iter()
                .map(|(domain, tier)| format!("    {domain:<16}  {tier}")),
        );
    }
    if !config.classifications.is_empty() {
        lines.push("  classifications".to_string());
        lines.extend(
            config
                .classifications
                .iter()
                .map(|(action, class)| format!("    {action:<16}  {class}")),
        );
    }
    lines.join("\n")
}

pub fn render_pending(actions: &[PendingAction]) -> String {
    if actions.is_empty() {
        return "No actions awaiting approval.".to_string();
    }
    actions
        .iter()
        .map(|action| {
            let mut line = format!(
                "{}  {} ({})  {}\n    {}",
                action.id, action.action, action.sub_type, action.created_at, action.payload
            );
            if let Some(reasoning) = &action.reasoning {
                line.push_str("\n    why: ");
                line.push_str(reasoning);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_record(record: &ActionRecord) -> String {
    let mut line = format!(
        "  [{}] {} {}",
        record.action.status, record.action.action, record.action.id
    );
    if !record.boundaries.is_empty() {
        let kinds: Vec<String> = record.boundaries.iter().map(|b| b.kind.to_string()).collect();
        line.push_str(&format!("  boundaries: {}", kinds.join(", ")));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

pub fn render_outcome(outcome: &MessageOutcome) -> String {
    let mut lines = vec![outcome.message.clone()];
    if !outcome.actions.is_empty() {
        lines.push(String::new());
        lines.extend(outcome.actions.iter().map(render_record));
    }
    lines.join("\n")
}

pub fn render_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{} [{}] {}", turn.created_at, turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_log(entries: &[ActionLogEntry]) -> String {
    if entries.is_empty() {
        return "No actions recorded.".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{}  {:<16} {:<18} {:<10} tier={} payload={}",
                entry.created_at,
                entry.status,
                entry.action,
                entry.sub_type,
                entry.autonomy_tier,
                &entry.payload_hash[..entry.payload_hash.len().min(12)]
            );
            if let Some(undone_at) = &entry.undone_at {
                line.push_str(&format!("  undone={undone_at}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_trust(status: &ApprovalStatus) -> String {
    format!(
        "{} ({}): {}/{} consecutive approvals{}",
        status.action,
        status.sub_type,
        status.consecutive_approvals,
        status.auto_execute_threshold,
        if status.routine { ", routine" } else { "" }
    )
}

pub fn render_patterns(patterns: &[ApprovalPattern]) -> String {
    if patterns.is_empty() {
        return "No approval history yet.".to_string();
    }
    patterns
        .iter()
        .map(|p| {
            format!(
                "{} ({}): {}/{} consecutive approvals, {} approved, {} rejected{}",
                p.action_type,
                p.sub_type,
                p.consecutive_approvals,
                p.auto_execute_threshold,
                p.total_approvals,
                p.total_rejections,
                if p.is_routine() { ", routine" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_escalations(prompts: &[EscalationPrompt]) -> String {
    if prompts.is_empty() {
        return "No escalation suggestions.".to_string();
    }
    prompts
        .iter()
        .map(|prompt| {
            format!(
                "{}  {}: {} -> {}\n    {}",
                prompt.id, prompt.domain, prompt.current_tier, prompt.suggested_tier, prompt.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
