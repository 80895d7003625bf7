//! Role normalization for grouping and avatar selection.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleClass {
    User,
    Assistant,
    System,
    Tool,
    Other,
}

impl RoleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RoleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an arbitrary role label onto a [`RoleClass`].
///
/// Case-insensitive; `_` and `-` are ignored so `tool_result`, `toolResult`
/// and `tool-result` all land on [`RoleClass::Tool`].
pub fn normalize_role_for_grouping(role: &str) -> RoleClass {
    let folded: String = role
        .trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    match folded.as_str() {
        "user" | "human" => RoleClass::User,
        "assistant" | "ai" | "model" => RoleClass::Assistant,
        "system" | "developer" => RoleClass::System,
        "tool" | "toolresult" | "toolcall" | "function" | "functionresult" => RoleClass::Tool,
        _ => RoleClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        assert_eq!(normalize_role_for_grouping("USER"), RoleClass::User);
        assert_eq!(normalize_role_for_grouping(" Assistant "), RoleClass::Assistant);
        assert_eq!(normalize_role_for_grouping("System"), RoleClass::System);
    }

    #[test]
    fn test_tool_aliases_share_class() {
        for alias in ["tool", "tool_result", "toolResult", "tool-result", "TOOLRESULT"] {
            assert_eq!(normalize_role_for_grouping(alias), RoleClass::Tool, "{alias}");
        }
    }

    #[test]
    fn test_unknown_roles_are_other() {
        assert_eq!(normalize_role_for_grouping(""), RoleClass::Other);
        assert_eq!(normalize_role_for_grouping("narrator"), RoleClass::Other);
        assert_eq!(normalize_role_for_grouping("🤖"), RoleClass::Other);
    }
}
