//! Domain entities
//!
//! Table names follow the existing storage layout so databases written by
//! earlier connector releases stay readable.

use chrono::{DateTime, Utc};

use super::enums::{MessageRole, ReportStatus};
use super::{AssociationTable, Entity, EntityDef, RelationDef};

entity! {
    /// Subscription tier a user account belongs to.
    pub struct Plan in "plan" {
        name: String [unique],
        max_projects: Option<i64>,
        price: Option<f64>,
    }
}

entity! {
    /// Account identity.
    pub struct User in "user" {
        username: String [unique],
        password: String,
        email: Option<String>,
        plan_id: Option<i64> [references("plan")],
        created_at: Option<DateTime<Utc>> [default_now],
    }
    relations {
        RelationDef::belongs_to("plan", "plan_id", "plan"),
        RelationDef::through("projects", AssociationTable::UsersProjects, "projects"),
    }
}

entity! {
    /// External data source connected to projects.
    pub struct Integration in "integrations" {
        name: String,
        provider: String,
        settings: Option<String>,
    }
    relations {
        RelationDef::through("projects", AssociationTable::ProjectsIntegrations, "projects"),
    }
}

entity! {
    /// Analysis workspace; the tenant boundary for most other rows.
    pub struct Project in "projects" {
        name: String,
        description: Option<String>,
        author_id: Option<i64> [references("user")],
        created_at: Option<DateTime<Utc>> [default_now],
    }
    relations {
        RelationDef::belongs_to("author", "author_id", "user"),
        RelationDef::through("users", AssociationTable::UsersProjects, "user"),
        RelationDef::through("integrations", AssociationTable::ProjectsIntegrations, "integrations"),
    }
}

entity! {
    /// Retrieval context shown to the bot for a turn.
    pub struct Context in "contexts" {
        project_id: Option<i64> [references("projects")],
        text: String,
    }
}

entity! {
    pub struct Intent in "intents" {
        project_id: Option<i64> [references("projects")],
        name: String,
        description: Option<String>,
    }
}

entity! {
    pub struct Paraphrase in "paraphrases" {
        text: String,
    }
}

entity! {
    pub struct Keyword in "keywords" {
        project_id: Option<i64> [references("projects")],
        text: String,
    }
    relations {
        RelationDef::through("user_messages", AssociationTable::KeywordsUserMessages, "userMessages"),
    }
}

entity! {
    /// Bot response to one user message.
    pub struct ChatBotAnswer in "chatBotAnswers" {
        text: String,
        sentiment: Option<f64>,
        version: Option<String>,
        feedback_id: Option<i64> [references("feedbacks")],
    }
    relations {
        RelationDef::belongs_to("feedback", "feedback_id", "feedbacks"),
    }
}

entity! {
    /// Rating or comment left by an end user.
    pub struct Feedback in "feedbacks" {
        /// End-user identifier in the customer's system, not an account
        user_id: Option<i64>,
        project_id: Option<i64> [references("projects")],
        text: Option<String>,
        sentiment: Option<f64>,
        date: Option<DateTime<Utc>> [default_now],
        source: String,
        chat_id: Option<i64>,
        thumbs_up: Option<String>,
        rating: Option<f64>,
    }
    relations {
        RelationDef::belongs_to("project", "project_id", "projects"),
        RelationDef::through("issues", AssociationTable::FeedbacksIssues, "issues"),
    }
}

entity! {
    /// A labeled problem detected across feedback and messages.
    pub struct Issue in "issues" {
        project_id: Option<i64> [references("projects")],
        name: Option<String>,
        text: Option<String>,
        impact_score: Option<f64>,
        date: Option<DateTime<Utc>>,
        resolved: Option<DateTime<Utc>>,
    }
    relations {
        RelationDef::belongs_to("project", "project_id", "projects"),
        RelationDef::through("feedbacks", AssociationTable::FeedbacksIssues, "feedbacks"),
        RelationDef::through("user_messages", AssociationTable::IssuesUserMessages, "userMessages"),
    }
}

entity! {
    pub struct Topic in "topics" {
        project_id: Option<i64> [references("projects")],
        name: String,
        description: Option<String>,
    }
    relations {
        RelationDef::belongs_to("project", "project_id", "projects"),
        RelationDef::through("user_messages", AssociationTable::TopicsUserMessages, "userMessages"),
    }
}

entity! {
    pub struct Rule in "rules" {
        project_id: Option<i64> [references("projects")],
        name: String,
        definition: Option<String>,
    }
    relations {
        RelationDef::through("user_messages", AssociationTable::RulesUserMessages, "userMessages"),
    }
}

entity! {
    /// Taxonomy node owned by a rule.
    pub struct RuleTopic in "ruleTopics" {
        rule_id: i64 [references("rules")],
        project_id: Option<i64> [references("projects")],
        name: String,
    }
    relations {
        RelationDef::belongs_to("rule", "rule_id", "rules"),
        RelationDef::through("user_messages", AssociationTable::RuleTopicsUserMessages, "userMessages"),
    }
}

entity! {
    /// One conversational turn and its quality metrics.
    pub struct UserMessage in "userMessages" {
        user_id: Option<i64>,
        project_id: Option<i64> [references("projects")],
        question: Option<String>,
        prompt: Option<String>,
        knowledge_hole_probability: Option<f64>,
        faithfulness: Option<f64>,
        response_relevance: Option<f64>,
        sentiment: Option<f64>,
        date: Option<DateTime<Utc>> [default_now],
        chat_id: Option<i64>,
        context_id: Option<i64> [references("contexts")],
        intent_id: Option<i64> [references("intents")],
        paraphrase_id: Option<i64> [references("paraphrases")],
        answer_id: i64 [references("chatBotAnswers")],
    }
    relations {
        RelationDef::belongs_to("answer", "answer_id", "chatBotAnswers"),
        RelationDef::belongs_to("context", "context_id", "contexts"),
        RelationDef::belongs_to("intent", "intent_id", "intents"),
        RelationDef::belongs_to("paraphrase", "paraphrase_id", "paraphrases"),
        RelationDef::belongs_to("project", "project_id", "projects"),
        RelationDef::through("issues", AssociationTable::IssuesUserMessages, "issues"),
        RelationDef::through("topics", AssociationTable::TopicsUserMessages, "topics"),
        RelationDef::through("keywords", AssociationTable::KeywordsUserMessages, "keywords"),
        RelationDef::through("rules", AssociationTable::RulesUserMessages, "rules"),
        RelationDef::through("rule_topics", AssociationTable::RuleTopicsUserMessages, "ruleTopics"),
    }
}

entity! {
    /// Curated export unit.
    pub struct Dataset in "dataset" {
        name: String,
        project_id: Option<i64> [references("projects")],
        user_id: Option<i64> [references("user")],
        date: Option<DateTime<Utc>> [default_now],
    }
    relations {
        RelationDef::through("messages", AssociationTable::DatasetMessages, "datasetMessage"),
    }
}

entity! {
    /// A message as curated into datasets, optionally with an edited answer.
    pub struct DatasetMessage in "datasetMessage" {
        user_message_id: i64 [references("userMessages")],
        answer: Option<String>,
        gt_answer: Option<String>,
    }
    relations {
        RelationDef::belongs_to("user_message", "user_message_id", "userMessages"),
        RelationDef::through("datasets", AssociationTable::DatasetMessages, "dataset"),
    }
}

entity! {
    /// Result of an asynchronous analytics job.
    pub struct Report in "reports" {
        project_id: i64 [references("projects")],
        name: String,
        status: ReportStatus,
        result: Option<String>,
        created_at: Option<DateTime<Utc>> [default_now],
        finished_at: Option<DateTime<Utc>>,
    }
    relations {
        RelationDef::belongs_to("project", "project_id", "projects"),
    }
}

entity! {
    /// Immutable snapshot of a raw conversational turn.
    pub struct MessageOriginal in "messagesOriginal" (immutable) {
        user_id: Option<i64>,
        project_id: Option<i64>,
        role: MessageRole,
        text: String,
        prompt: Option<String>,
        version: Option<String>,
        date: Option<DateTime<Utc>> [default_now],
        chat_id: Option<i64>,
        feedback_id: Option<i64> [references("feedbacksOriginal")],
        context_id: Option<i64> [references("contextsOriginal")],
    }
    relations {
        RelationDef::belongs_to("feedback", "feedback_id", "feedbacksOriginal"),
        RelationDef::belongs_to("context", "context_id", "contextsOriginal"),
    }
}

entity! {
    pub struct ContextOriginal in "contextsOriginal" (immutable) {
        project_id: Option<i64>,
        text: String,
    }
}

entity! {
    pub struct FeedbackOriginal in "feedbacksOriginal" (immutable) {
        user_id: Option<i64>,
        project_id: Option<i64>,
        text: Option<String>,
        date: Option<DateTime<Utc>> [default_now],
        source: String,
        chat_id: Option<i64>,
        thumbs_up: Option<String>,
        rating: Option<f64>,
    }
}

/// Every entity descriptor, in table-creation order
pub fn all() -> Vec<&'static EntityDef> {
    vec![
        Plan::def(),
        User::def(),
        Integration::def(),
        Project::def(),
        Context::def(),
        Intent::def(),
        Paraphrase::def(),
        Keyword::def(),
        Feedback::def(),
        ChatBotAnswer::def(),
        Issue::def(),
        Topic::def(),
        Rule::def(),
        RuleTopic::def(),
        UserMessage::def(),
        Dataset::def(),
        DatasetMessage::def(),
        Report::def(),
        ContextOriginal::def(),
        FeedbackOriginal::def(),
        MessageOriginal::def(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;

    #[test]
    fn test_required_columns() {
        assert!(!UserMessage::def().column("answer_id").unwrap().nullable);
        assert!(!Feedback::def().column("source").unwrap().nullable);
        assert!(!Report::def().column("project_id").unwrap().nullable);
    }

    #[test]
    fn test_report_status_has_domain() {
        let status = Report::def().column("status").unwrap();
        assert_eq!(status.sql_type, SqlType::Text);
        assert_eq!(status.domain, Some(ReportStatus::VALUES));
    }

    #[test]
    fn test_mirror_entities_are_immutable() {
        assert!(MessageOriginal::def().immutable);
        assert!(ContextOriginal::def().immutable);
        assert!(FeedbackOriginal::def().immutable);
        assert!(!UserMessage::def().immutable);
    }

    #[test]
    fn test_columns_start_with_primary_key() {
        for def in all() {
            assert_eq!(def.columns[0].name, "id", "{}", def.table);
            assert!(def.columns[0].primary_key);
        }
    }
}
