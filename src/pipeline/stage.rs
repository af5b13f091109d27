//! The ten fixed stages every scaffold walks through
//!
//! Stage order is part of the contract with frame authors: results of stage `n`
//! are visible to frames of every later stage under the `stage_<n>` key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scope,
    IdentifyAnalyze,
    Plan,
    Implement,
    SuccessContinue,
    FinalAudit,
    MetaAudit,
    Approval,
    UpdateRegisters,
    PushRemote,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 10] = [
        Stage::Scope,
        Stage::IdentifyAnalyze,
        Stage::Plan,
        Stage::Implement,
        Stage::SuccessContinue,
        Stage::FinalAudit,
        Stage::MetaAudit,
        Stage::Approval,
        Stage::UpdateRegisters,
        Stage::PushRemote,
    ];

    /// One-based stage number
    pub fn number(self) -> u8 {
        match self {
            Stage::Scope => 1,
            Stage::IdentifyAnalyze => 2,
            Stage::Plan => 3,
            Stage::Implement => 4,
            Stage::SuccessContinue => 5,
            Stage::FinalAudit => 6,
            Stage::MetaAudit => 7,
            Stage::Approval => 8,
            Stage::UpdateRegisters => 9,
            Stage::PushRemote => 10,
        }
    }

    pub fn from_number(number: u8) -> Option<Stage> {
        Stage::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    /// Upper-case name used in logs and reports
    pub fn name(self) -> &'static str {
        match self {
            Stage::Scope => "SCOPE",
            Stage::IdentifyAnalyze => "IDENTIFY_ANALYZE",
            Stage::Plan => "PLAN",
            Stage::Implement => "IMPLEMENT",
            Stage::SuccessContinue => "SUCCESS_CONTINUE",
            Stage::FinalAudit => "FINAL_AUDIT",
            Stage::MetaAudit => "META_AUDIT",
            Stage::Approval => "APPROVAL",
            Stage::UpdateRegisters => "UPDATE_REGISTERS",
            Stage::PushRemote => "PUSH_REMOTE",
        }
    }

    /// Configuration key (`[scaffolds.<id>.stages.<key>]`)
    pub fn key(self) -> &'static str {
        match self {
            Stage::Scope => "scope",
            Stage::IdentifyAnalyze => "identify_analyze",
            Stage::Plan => "plan",
            Stage::Implement => "implement",
            Stage::SuccessContinue => "success_continue",
            Stage::FinalAudit => "final_audit",
            Stage::MetaAudit => "meta_audit",
            Stage::Approval => "approval",
            Stage::UpdateRegisters => "update_registers",
            Stage::PushRemote => "push_remote",
        }
    }

    /// Key under which this stage's result is exposed to later frames
    pub fn result_key(self) -> String {
        format!("stage_{}", self.number())
    }

    /// Parse a stage from its key, its upper-case name or its number
    pub fn parse(input: &str) -> Option<Stage> {
        let trimmed = input.trim();
        if let Ok(number) = trimmed.parse::<u8>() {
            return Stage::from_number(number);
        }
        let lowered = trimmed.to_ascii_lowercase();
        Stage::ALL.into_iter().find(|stage| stage.key() == lowered)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_numbers_round_trip() {
        for (index, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(usize::from(stage.number()), index + 1);
            assert_eq!(Stage::from_number(stage.number()), Some(*stage));
        }
    }

    #[test]
    fn test_out_of_range_numbers() {
        assert_eq!(Stage::from_number(0), None);
        assert_eq!(Stage::from_number(11), None);
        assert_eq!(Stage::from_number(u8::MAX), None);
    }

    #[test]
    fn test_stage_order_matches_declaration() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert!(Stage::Scope < Stage::PushRemote);
    }

    #[test]
    fn test_parse_accepts_keys_names_and_numbers() {
        assert_eq!(Stage::parse("scope"), Some(Stage::Scope));
        assert_eq!(Stage::parse("META_AUDIT"), Some(Stage::MetaAudit));
        assert_eq!(Stage::parse(" 10 "), Some(Stage::PushRemote));
        assert_eq!(Stage::parse("deploy"), None);
        assert_eq!(Stage::parse("0"), None);
    }

    #[test]
    fn test_serde_uses_snake_case_keys() {
        let json = serde_json::to_string(&Stage::IdentifyAnalyze).unwrap();
        assert_eq!(json, "\"identify_analyze\"");
        let stage: Stage = serde_json::from_str("\"update_registers\"").unwrap();
        assert_eq!(stage, Stage::UpdateRegisters);
    }

    #[test]
    fn test_result_key() {
        assert_eq!(Stage::Plan.result_key(), "stage_3");
        assert_eq!(Stage::PushRemote.to_string(), "PUSH_REMOTE");
    }
}
