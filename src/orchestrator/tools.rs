use crate::error::{Result, SemblanceError};
use crate::llm::{ToolCall, ToolSpec};
use crate::security::autonomy::is_well_formed_action;
use serde_json::{Map, Value, json};

/// Local knowledge search, answered in-process.
pub const SEARCH_TOOL: &str = "search_files";
const DEFAULT_SEARCH_LIMIT: u32 = 5;
const MAX_SEARCH_LIMIT: u32 = 20;

/// Arguments the model may attach to any action call. Stripped from the payload.
const CONFIDENCE_ARG: &str = "confidence";
const REASONING_ARG: &str = "reasoning";

/// Tool name, action type, description.
const ACTION_TOOLS: &[(&str, &str, &str)] = &[
    ("fetch_emails", "email.fetch", "Fetch recent emails from the inbox."),
    ("search_emails", "email.search", "Search emails by sender, subject or text."),
    ("archive_emails", "email.archive", "Archive emails by message id."),
    ("move_email", "email.move", "Move an email to another folder."),
    ("mark_email_read", "email.mark_read", "Mark emails as read."),
    ("draft_email", "email.draft", "Create an email draft. Set in_reply_to for replies."),
    ("send_email", "email.send", "Send an email."),
    ("delete_email", "email.delete", "Permanently delete emails."),
    ("fetch_calendar", "calendar.fetch", "List calendar events in a time range."),
    ("create_event", "calendar.create", "Create a calendar event."),
    ("update_event", "calendar.update", "Change an existing calendar event."),
    ("delete_event", "calendar.delete", "Delete a calendar event."),
    ("fetch_contacts", "contacts.fetch", "Look up contacts."),
    ("update_contact", "contacts.update", "Update a contact's details."),
    ("fetch_reminders", "reminders.fetch", "List reminders."),
    ("create_reminder", "reminders.create", "Create a reminder."),
    ("delete_reminder", "reminders.delete", "Delete a reminder."),
    ("pay_bill", "finance.pay", "Pay a bill. Include the amount."),
];

/// A validated side-effecting (or gateway read) request from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub call_id: String,
    pub action: String,
    pub payload: Value,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCall {
    Search { query: String, limit: u32 },
    Action(ActionCall),
}

/// Tools offered to the model on every turn.
pub fn tool_specs() -> Vec<ToolSpec> {
    let mut specs = vec![ToolSpec {
        name: SEARCH_TOOL.to_string(),
        description: "Search the user's local files and notes.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_SEARCH_LIMIT}
            },
            "required": ["query"]
        }),
    }];

    specs.extend(ACTION_TOOLS.iter().map(|(name, _, description)| ToolSpec {
        name: (*name).to_string(),
        description: (*description).to_string(),
        parameters: json!({
            "type": "object",
            "additionalProperties": true,
            "properties": {
                CONFIDENCE_ARG: {
                    "type": "number",
                    "description": "How sure you are this is what the user wants, 0 to 1."
                },
                REASONING_ARG: {
                    "type": "string",
                    "description": "One sentence on why this action is needed."
                }
            }
        }),
    }));
    specs
}

/// Action type a tool name stands for, if it names one.
pub fn action_for_tool(name: &str) -> Option<&str> {
    ACTION_TOOLS
        .iter()
        .find(|(tool, _, _)| *tool == name)
        .map(|(_, action, _)| *action)
        .or_else(|| is_well_formed_action(name).then_some(name))
}

/// Validate a model tool call. Errors are [`SemblanceError::Validation`].
pub fn resolve(call: &ToolCall, fallback_reasoning: Option<&str>) -> Result<ResolvedCall> {
    let Value::Object(args) = &call.arguments else {
        return Err(invalid(call, "arguments must be a JSON object"));
    };

    if call.name == SEARCH_TOOL {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| invalid(call, "query must be a non-empty string"))?;
        let limit = match args.get("limit") {
            None | Some(Value::Null) => DEFAULT_SEARCH_LIMIT,
            Some(value) => value
                .as_u64()
                .filter(|n| *n >= 1)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid(call, "limit must be a positive integer"))?
                .min(MAX_SEARCH_LIMIT),
        };
        return Ok(ResolvedCall::Search {
            query: query.to_string(),
            limit,
        });
    }

    let action = action_for_tool(&call.name)
        .ok_or_else(|| SemblanceError::Validation(format!("unknown tool {:?}", call.name)))?;

    let mut payload = args.clone();
    let confidence = take_confidence(call, &mut payload)?;
    let reasoning = take_reasoning(call, &mut payload)?.or_else(|| {
        fallback_reasoning
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    });

    Ok(ResolvedCall::Action(ActionCall {
        call_id: call.id.clone(),
        action: action.to_string(),
        payload: Value::Object(payload),
        confidence,
        reasoning,
    }))
}

fn take_confidence(call: &ToolCall, payload: &mut Map<String, Value>) -> Result<Option<f64>> {
    match payload.remove(CONFIDENCE_ARG) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(call, "confidence must be a number")),
        Some(_) => Err(invalid(call, "confidence must be a number")),
    }
}

fn take_reasoning(call: &ToolCall, payload: &mut Map<String, Value>) -> Result<Option<String>> {
    match payload.remove(REASONING_ARG) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text).filter(|t| !t.trim().is_empty())),
        Some(_) => Err(invalid(call, "reasoning must be a string")),
    }
}

fn invalid(call: &ToolCall, problem: &str) -> SemblanceError {
    SemblanceError::Validation(format!("tool {}: {problem}", call.name))
}
