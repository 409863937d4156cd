//! Condition tree and evaluation for the rule engine (spec.md 4.D).

pub mod actions;
pub mod application;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperator {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub match_type: MatchType,
    pub value: String,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub operator: GroupOperator,
    pub children: Vec<ConditionNode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionGroup),
}

/// Everything a Condition might need to read, gathered once per message or
/// thread before rule iteration begins.
#[derive(Clone, Debug, Default)]
pub struct RuleEvaluationContext {
    pub thread_subject: String,
    pub email_subject: String,
    pub sender_name: String,
    pub sender_email: String,
    pub to_names: Vec<String>,
    pub to_emails: Vec<String>,
    pub cc_names: Vec<String>,
    pub cc_emails: Vec<String>,
    pub content: String,
    pub attachment_filenames: Vec<String>,
    /// addresses already present in the contacts table, lower-cased
    pub contact_emails: Vec<String>,
    /// raw header name (lower-cased) -> values, for `header:<Name>` fields
    pub headers: Vec<(String, String)>,
}

impl ConditionGroup {
    pub fn evaluate(&self, ctx: &RuleEvaluationContext) -> bool {
        if self.children.is_empty() {
            return false;
        }
        match self.operator {
            GroupOperator::And => self.children.iter().all(|c| c.evaluate(ctx)),
            GroupOperator::Or => self.children.iter().any(|c| c.evaluate(ctx)),
        }
    }
}

impl ConditionNode {
    pub fn evaluate(&self, ctx: &RuleEvaluationContext) -> bool {
        match self {
            ConditionNode::Leaf(cond) => cond.evaluate(ctx),
            ConditionNode::Group(group) => group.evaluate(ctx),
        }
    }
}

impl Condition {
    pub fn evaluate(&self, ctx: &RuleEvaluationContext) -> bool {
        let result = self.values_for_field(ctx).iter().any(|v| self.matches(v));
        if self.negate {
            !result
        } else {
            result
        }
    }

    fn values_for_field(&self, ctx: &RuleEvaluationContext) -> Vec<String> {
        if let Some(name) = self.field.strip_prefix("header:") {
            let name = name.to_ascii_lowercase();
            return ctx
                .headers
                .iter()
                .filter(|(h, _)| *h == name)
                .map(|(_, v)| v.clone())
                .collect();
        }
        match self.field.as_str() {
            "thread_subject" => vec![ctx.thread_subject.clone()],
            "email_subject" => vec![ctx.email_subject.clone()],
            "sender_name" => vec![ctx.sender_name.clone()],
            "sender_email" => vec![ctx.sender_email.clone()],
            "to_name" => ctx.to_names.clone(),
            "to_email" => ctx.to_emails.clone(),
            "cc_name" => ctx.cc_names.clone(),
            "cc_email" => ctx.cc_emails.clone(),
            "content" => vec![ctx.content.clone()],
            "attachment_filename" => ctx.attachment_filenames.clone(),
            "sender_in_contacts" => vec![if ctx
                .contact_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&ctx.sender_email))
            {
                "true".to_string()
            } else {
                "false".to_string()
            }],
            _ => Vec::new(),
        }
    }

    fn matches(&self, haystack: &str) -> bool {
        match self.match_type {
            MatchType::Exact => haystack.eq_ignore_ascii_case(&self.value),
            MatchType::Contains => haystack
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
            MatchType::Regex => RegexBuilder::new(&self.value)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(haystack))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RuleEvaluationContext {
        RuleEvaluationContext {
            sender_email: "alice@example.com".to_string(),
            sender_name: "Alice".to_string(),
            email_subject: "Invoice #42".to_string(),
            attachment_filenames: vec!["invoice.pdf".to_string()],
            ..Default::default()
        }
    }

    fn leaf(field: &str, match_type: MatchType, value: &str) -> ConditionNode {
        ConditionNode::Leaf(Condition {
            field: field.to_string(),
            match_type,
            value: value.to_string(),
            negate: false,
        })
    }

    #[test]
    fn empty_group_never_matches() {
        let group = ConditionGroup {
            operator: GroupOperator::And,
            children: Vec::new(),
        };
        assert!(!group.evaluate(&ctx()));
    }

    #[test]
    fn and_requires_every_child() {
        let group = ConditionGroup {
            operator: GroupOperator::And,
            children: vec![
                leaf("sender_email", MatchType::Contains, "alice"),
                leaf("email_subject", MatchType::Contains, "nonexistent"),
            ],
        };
        assert!(!group.evaluate(&ctx()));
    }

    #[test]
    fn or_matches_on_any_child() {
        let group = ConditionGroup {
            operator: GroupOperator::Or,
            children: vec![
                leaf("sender_email", MatchType::Contains, "nonexistent"),
                leaf("email_subject", MatchType::Contains, "invoice"),
            ],
        };
        assert!(group.evaluate(&ctx()));
    }

    #[test]
    fn negate_flips_the_result() {
        let mut cond = Condition {
            field: "sender_email".to_string(),
            match_type: MatchType::Contains,
            value: "alice".to_string(),
            negate: true,
        };
        assert!(!cond.evaluate(&ctx()));
        cond.negate = false;
        assert!(cond.evaluate(&ctx()));
    }

    #[test]
    fn invalid_regex_fails_closed_rather_than_panicking() {
        let cond = Condition {
            field: "email_subject".to_string(),
            match_type: MatchType::Regex,
            value: "(unclosed".to_string(),
            negate: false,
        };
        assert!(!cond.evaluate(&ctx()));
    }

    #[test]
    fn nested_group_evaluates_recursively() {
        let inner = ConditionGroup {
            operator: GroupOperator::Or,
            children: vec![leaf("attachment_filename", MatchType::Contains, "invoice")],
        };
        let outer = ConditionGroup {
            operator: GroupOperator::And,
            children: vec![
                leaf("sender_email", MatchType::Contains, "alice"),
                ConditionNode::Group(inner),
            ],
        };
        assert!(outer.evaluate(&ctx()));
    }
}
