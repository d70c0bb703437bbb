//! Dataset export
//!
//! A dataset is exported with its curated messages resolved to text: the
//! question of the underlying user message and the answer to hand out,
//! which is the curator's edit when there is one and the bot's original
//! answer otherwise.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::session::UnitOfWork;
use crate::filter::{Condition, Filters};
use crate::schema::entities::{ChatBotAnswer, Dataset, DatasetMessage, UserMessage};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetExport {
    pub id: i64,
    pub name: String,
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
    pub date: Option<DateTime<Utc>>,
    pub messages: Vec<ExportedMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedMessage {
    pub id: i64,
    pub user_message_text: Option<String>,
    pub answer: Option<String>,
    /// The answer is the curator's edit rather than the bot's
    pub edited: bool,
    pub gt_answer: Option<String>,
}

/// Question and bot answer of one user message
struct Turn {
    question: Option<String>,
    answer: Option<String>,
}

impl UnitOfWork {
    // ========== Export Operations ==========

    /// Export dataset `id` with its messages; `None` when there is no such dataset
    pub fn export_dataset(&mut self, id: i64) -> Result<Option<DatasetExport>> {
        let Some(loaded) = self.read_by_id_with::<Dataset>(id, &["messages"])? else {
            return Ok(None);
        };
        let messages: Vec<DatasetMessage> = loaded.related_as("messages")?;

        let user_message_ids: Vec<i64> = messages.iter().map(|m| m.user_message_id).collect();
        let filters = Filters::new().with("id", Condition::is_in(user_message_ids));
        let mut turns: HashMap<i64, Turn> = HashMap::new();
        for turn in self.find_with::<UserMessage>(&filters, &["answer"])? {
            let answer = turn
                .related_as::<ChatBotAnswer>("answer")?
                .into_iter()
                .next()
                .map(|a| a.text);
            if let Some(turn_id) = turn.id {
                turns.insert(
                    turn_id,
                    Turn {
                        question: turn.entity.question,
                        answer,
                    },
                );
            }
        }

        let messages = messages
            .into_iter()
            .map(|message| export_message(message, &turns))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("Exported dataset {} with {} message(s)", id, messages.len());

        let dataset = loaded.into_inner();
        Ok(Some(DatasetExport {
            id,
            name: dataset.name,
            project_id: dataset.project_id,
            user_id: dataset.user_id,
            date: dataset.date,
            messages,
        }))
    }
}

fn export_message(message: DatasetMessage, turns: &HashMap<i64, Turn>) -> Result<ExportedMessage> {
    let id = message
        .id
        .ok_or_else(|| Error::Decode("dataset message without an id".to_string()))?;
    let turn = turns.get(&message.user_message_id);

    // An empty edit counts as no edit
    let edited = message.answer.as_deref().is_some_and(|a| !a.is_empty());
    let answer = if edited {
        message.answer
    } else {
        turn.and_then(|t| t.answer.clone())
    };

    Ok(ExportedMessage {
        id,
        user_message_text: turn.and_then(|t| t.question.clone()),
        answer,
        edited,
        gt_answer: message.gt_answer,
    })
}

#[cfg(test)]
mod tests {
    use crate::schema::entities::*;
    use crate::storage::{Store, UnitOfWork};
    use crate::AssociationTable;

    fn turn(uow: &mut UnitOfWork, question: &str, answer: &str) -> i64 {
        let answer = uow
            .create(&ChatBotAnswer {
                text: answer.to_string(),
                ..Default::default()
            })
            .unwrap();
        uow.create(&UserMessage {
            question: Some(question.to_string()),
            answer_id: answer.id.unwrap(),
            ..Default::default()
        })
        .unwrap()
        .id
        .unwrap()
    }

    fn curate(uow: &mut UnitOfWork, dataset: i64, user_message_id: i64, answer: Option<&str>) -> i64 {
        let message = uow
            .create(&DatasetMessage {
                user_message_id,
                answer: answer.map(str::to_string),
                gt_answer: Some("expected".to_string()),
                ..Default::default()
            })
            .unwrap()
            .id
            .unwrap();
        uow.link(AssociationTable::DatasetMessages, dataset, message).unwrap();
        message
    }

    #[test]
    fn test_export_falls_back_to_bot_answer() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let dataset = uow
            .create(&Dataset {
                name: "golden".to_string(),
                ..Default::default()
            })
            .unwrap();
        let ds = dataset.id.unwrap();

        let refund = turn(&mut uow, "Can I get a refund?", "No.");
        let hours = turn(&mut uow, "When are you open?", "9 to 5.");
        let edited = curate(&mut uow, ds, refund, Some("Yes, within 30 days."));
        let untouched = curate(&mut uow, ds, hours, None);
        let blank = curate(&mut uow, ds, hours, Some(""));

        let export = uow.export_dataset(ds).unwrap().unwrap();
        assert_eq!(export.name, "golden");
        assert_eq!(export.date, dataset.date);
        assert_eq!(export.messages.len(), 3);

        let first = &export.messages[0];
        assert_eq!(first.id, edited);
        assert_eq!(first.user_message_text.as_deref(), Some("Can I get a refund?"));
        assert_eq!(first.answer.as_deref(), Some("Yes, within 30 days."));
        assert!(first.edited);
        assert_eq!(first.gt_answer.as_deref(), Some("expected"));

        let second = &export.messages[1];
        assert_eq!(second.id, untouched);
        assert_eq!(second.answer.as_deref(), Some("9 to 5."));
        assert!(!second.edited);

        let third = &export.messages[2];
        assert_eq!(third.id, blank);
        assert_eq!(third.answer.as_deref(), Some("9 to 5."));
        assert!(!third.edited);
    }

    #[test]
    fn test_export_missing_and_empty_datasets() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        assert!(uow.export_dataset(5).unwrap().is_none());

        let empty = uow
            .create(&Dataset {
                name: "empty".to_string(),
                ..Default::default()
            })
            .unwrap();
        let export = uow.export_dataset(empty.id.unwrap()).unwrap().unwrap();
        assert!(export.messages.is_empty());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["name"], "empty");
        assert!(json["messages"].as_array().unwrap().is_empty());
    }
}
