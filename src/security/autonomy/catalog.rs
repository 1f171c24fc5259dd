use super::types::ActionClass;
use std::collections::{BTreeMap, HashMap};

/// Classification of the action types the gateway knows about.
///
/// Anything missing from this table is treated as `Execute`.
const BUILTIN_CLASSIFICATIONS: &[(&str, ActionClass)] = &[
    ("email.fetch", ActionClass::Read),
    ("email.search", ActionClass::Read),
    ("email.archive", ActionClass::Write),
    ("email.move", ActionClass::Write),
    ("email.mark_read", ActionClass::Write),
    ("email.draft", ActionClass::Write),
    ("email.send", ActionClass::Execute),
    ("email.delete", ActionClass::Execute),
    ("calendar.fetch", ActionClass::Read),
    ("calendar.create", ActionClass::Write),
    ("calendar.update", ActionClass::Write),
    ("calendar.delete", ActionClass::Execute),
    ("contacts.fetch", ActionClass::Read),
    ("contacts.update", ActionClass::Write),
    ("contacts.delete", ActionClass::Execute),
    ("reminders.fetch", ActionClass::Read),
    ("reminders.create", ActionClass::Write),
    ("reminders.delete", ActionClass::Execute),
    ("finance.fetch", ActionClass::Read),
    ("finance.pay", ActionClass::Execute),
];

/// Lookup table from dotted action type to [`ActionClass`].
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    entries: HashMap<String, ActionClass>,
}

impl ActionCatalog {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_CLASSIFICATIONS
                .iter()
                .map(|(action, class)| ((*action).to_string(), *class))
                .collect(),
        }
    }

    /// Builtin table extended (or overridden) by configured entries.
    pub fn with_overrides(overrides: &BTreeMap<String, ActionClass>) -> Self {
        let mut catalog = Self::builtin();
        for (action, class) in overrides {
            catalog.entries.insert(action.clone(), *class);
        }
        catalog
    }

    /// Unknown action types fail closed to `Execute`.
    pub fn classify(&self, action: &str) -> ActionClass {
        self.entries
            .get(action)
            .copied()
            .unwrap_or(ActionClass::Execute)
    }

    pub fn is_known(&self, action: &str) -> bool {
        self.entries.contains_key(action)
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Namespace of a dotted action type (`email.send` → `email`).
pub fn domain_of(action: &str) -> &str {
    action.split_once('.').map_or(action, |(domain, _)| domain)
}

/// `namespace.verb` with lowercase ASCII letters, digits and underscores.
pub fn is_well_formed_action(action: &str) -> bool {
    let Some((domain, verb)) = action.split_once('.') else {
        return false;
    };
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    valid(domain) && valid(verb)
}
