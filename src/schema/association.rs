//! Association (edge) tables
//!
//! Every many-to-many relationship is an independent table:
//! - `id`: synthetic surrogate key
//! - two foreign-key columns, each pointing at an entity's `id`
//!
//! Most tables declare a UNIQUE constraint on the key pair. The
//! feedback/issue, issue/message and dataset/message tables never had one and
//! may already hold duplicate edges, so the pair is left unconstrained there.

use std::str::FromStr;

use crate::{Error, Result};

/// One side of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeColumn {
    pub name: &'static str,
    pub references: &'static str,
}

/// Static description of an association table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeTableDef {
    pub table: &'static str,
    pub left: EdgeColumn,
    pub right: EdgeColumn,
    pub unique_pair: bool,
}

impl EdgeTableDef {
    pub fn columns(&self) -> [EdgeColumn; 2] {
        [self.left, self.right]
    }

    pub fn column(&self, name: &str) -> Result<EdgeColumn> {
        self.columns()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::unknown_attribute(self.table, name))
    }

    /// The column on the opposite side of `name`
    pub fn other(&self, name: &str) -> Result<EdgeColumn> {
        if self.left.name == name {
            Ok(self.right)
        } else if self.right.name == name {
            Ok(self.left)
        } else {
            Err(Error::unknown_attribute(self.table, name))
        }
    }

    /// The column that references `table`
    pub fn side_for(&self, table: &str) -> Option<EdgeColumn> {
        self.columns().into_iter().find(|c| c.references == table)
    }
}

const fn edge(
    table: &'static str,
    left: (&'static str, &'static str),
    right: (&'static str, &'static str),
    unique_pair: bool,
) -> EdgeTableDef {
    EdgeTableDef {
        table,
        left: EdgeColumn { name: left.0, references: left.1 },
        right: EdgeColumn { name: right.0, references: right.1 },
        unique_pair,
    }
}

static FEEDBACKS_ISSUES: EdgeTableDef =
    edge("feedbacks_issues", ("feedback_id", "feedbacks"), ("issue_id", "issues"), false);
static ISSUES_USER_MESSAGES: EdgeTableDef = edge(
    "issues_userMessages",
    ("issue_id", "issues"),
    ("user_message_id", "userMessages"),
    false,
);
static TOPICS_USER_MESSAGES: EdgeTableDef = edge(
    "topics_userMessages",
    ("topic_id", "topics"),
    ("user_message_id", "userMessages"),
    true,
);
static USERS_PROJECTS: EdgeTableDef =
    edge("users_projects", ("user_id", "user"), ("project_id", "projects"), true);
static KEYWORDS_USER_MESSAGES: EdgeTableDef = edge(
    "keywords_userMessages",
    ("keyword_id", "keywords"),
    ("user_message_id", "userMessages"),
    true,
);
static RULES_USER_MESSAGES: EdgeTableDef = edge(
    "rules_userMessages",
    ("rule_id", "rules"),
    ("user_message_id", "userMessages"),
    true,
);
static RULE_TOPICS_USER_MESSAGES: EdgeTableDef = edge(
    "ruleTopics_userMessages",
    ("rule_topic_id", "ruleTopics"),
    ("user_message_id", "userMessages"),
    true,
);
static PROJECTS_INTEGRATIONS: EdgeTableDef = edge(
    "projects_integrations",
    ("project_id", "projects"),
    ("integration_id", "integrations"),
    true,
);
static DATASET_MESSAGES: EdgeTableDef = edge(
    "datasetMessage_dataset",
    ("dataset_id", "dataset"),
    ("dataset_message_id", "datasetMessage"),
    false,
);

/// Every association table in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationTable {
    FeedbacksIssues,
    IssuesUserMessages,
    TopicsUserMessages,
    UsersProjects,
    KeywordsUserMessages,
    RulesUserMessages,
    RuleTopicsUserMessages,
    ProjectsIntegrations,
    DatasetMessages,
}

impl AssociationTable {
    pub fn def(&self) -> &'static EdgeTableDef {
        match self {
            AssociationTable::FeedbacksIssues => &FEEDBACKS_ISSUES,
            AssociationTable::IssuesUserMessages => &ISSUES_USER_MESSAGES,
            AssociationTable::TopicsUserMessages => &TOPICS_USER_MESSAGES,
            AssociationTable::UsersProjects => &USERS_PROJECTS,
            AssociationTable::KeywordsUserMessages => &KEYWORDS_USER_MESSAGES,
            AssociationTable::RulesUserMessages => &RULES_USER_MESSAGES,
            AssociationTable::RuleTopicsUserMessages => &RULE_TOPICS_USER_MESSAGES,
            AssociationTable::ProjectsIntegrations => &PROJECTS_INTEGRATIONS,
            AssociationTable::DatasetMessages => &DATASET_MESSAGES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.def().table
    }

    pub fn all() -> &'static [AssociationTable] {
        &[
            AssociationTable::FeedbacksIssues,
            AssociationTable::IssuesUserMessages,
            AssociationTable::TopicsUserMessages,
            AssociationTable::UsersProjects,
            AssociationTable::KeywordsUserMessages,
            AssociationTable::RulesUserMessages,
            AssociationTable::RuleTopicsUserMessages,
            AssociationTable::ProjectsIntegrations,
            AssociationTable::DatasetMessages,
        ]
    }
}

impl FromStr for AssociationTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown association table: {}", s)))
    }
}

impl std::fmt::Display for AssociationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_roundtrip() {
        for table in AssociationTable::all() {
            let parsed: AssociationTable = table.as_str().parse().unwrap();
            assert_eq!(*table, parsed);
        }
        assert!("topics_users".parse::<AssociationTable>().is_err());
    }

    #[test]
    fn test_legacy_tables_have_no_unique_pair() {
        assert!(!AssociationTable::FeedbacksIssues.def().unique_pair);
        assert!(!AssociationTable::IssuesUserMessages.def().unique_pair);
        assert!(AssociationTable::TopicsUserMessages.def().unique_pair);
    }

    #[test]
    fn test_column_lookup() {
        let def = AssociationTable::UsersProjects.def();
        assert_eq!(def.other("user_id").unwrap().name, "project_id");
        assert_eq!(def.side_for("projects").unwrap().name, "project_id");
        assert!(matches!(def.column("topic_id"), Err(Error::UnknownAttribute { .. })));
    }
}
