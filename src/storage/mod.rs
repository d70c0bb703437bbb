//! Storage layer for the relational core
//!
//! A [`Store`] owns the connection pool and the schema registry. All reads
//! and writes happen through a [`UnitOfWork`], which wraps one pooled
//! connection and one transaction.

mod association;
mod crud;
mod eager;
mod export;
mod session;

pub use association::{EdgeRow, RemapOutcome};
pub use eager::Loaded;
pub use export::{DatasetExport, ExportedMessage};
pub use session::{Outcome, Store, StoreOptions, StoreStats, UnitOfWork, UnitState};

#[cfg(test)]
mod tests {
    //! End-to-end flows across CRUD, filtering and edge maintenance

    use super::*;
    use crate::schema::entities::*;
    use crate::{AssociationTable, Condition, Filters, Operator, Record, Value};

    fn project(uow: &mut UnitOfWork, name: &str) -> Project {
        uow.create(&Project {
            name: name.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn topic(uow: &mut UnitOfWork, project_id: i64, name: &str) -> Topic {
        uow.create(&Topic {
            project_id: Some(project_id),
            name: name.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn message(uow: &mut UnitOfWork, project_id: i64, question: &str) -> UserMessage {
        let answer = uow
            .create(&ChatBotAnswer {
                text: format!("answer to {}", question),
                ..Default::default()
            })
            .unwrap();
        uow.create(&UserMessage {
            project_id: Some(project_id),
            question: Some(question.to_string()),
            answer_id: answer.id.unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_project_membership_flow() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();

        let acme = project(&mut uow, "Acme");
        let bob = uow
            .create(&User {
                username: "bob".to_string(),
                password: "pw".to_string(),
                ..Default::default()
            })
            .unwrap();
        let acme_id = acme.id.unwrap();
        let bob_id = bob.id.unwrap();

        assert!(uow
            .insert_edge_if_absent(
                AssociationTable::UsersProjects,
                &[("user_id", bob_id), ("project_id", acme_id)],
            )
            .unwrap());
        uow.commit().unwrap();

        let mut uow = store.acquire().unwrap();
        project(&mut uow, "Globex");
        let loaded = uow.read_all_with::<Project>(&["users"]).unwrap();
        assert_eq!(loaded.len(), 2);
        let users: Vec<User> = loaded[0].related_as("users").unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "bob");
        assert!(loaded[1].related("users").is_empty());

        let filtered = uow
            .find_with::<Project>(&Filters::new().with("name", Condition::eq("Acme")), &["users"])
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].related("users").len(), 1);

        // Setting the author afterwards is a plain update
        let mut acme = loaded[0].entity.clone();
        acme.author_id = Some(bob_id);
        uow.update(&acme).unwrap();
        let author = uow.read_by_id_with::<Project>(acme_id, &["author"]).unwrap().unwrap();
        assert_eq!(author.related("author")[0].get_as::<String>("username").unwrap(), "bob");
    }

    #[test]
    fn test_topic_merge_flow() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|uow| {
                let p = project(uow, "Acme").id.unwrap();
                let billing = topic(uow, p, "Billing").id.unwrap();
                let overlap = topic(uow, p, "BillingOverlap").id.unwrap();
                let m1 = message(uow, p, "refund?").id.unwrap();
                let m2 = message(uow, p, "invoice?").id.unwrap();

                let table = AssociationTable::TopicsUserMessages;
                uow.insert_edge_if_absent(table, &[("topic_id", billing), ("user_message_id", m1)])?;
                uow.insert_edge_if_absent(table, &[("topic_id", overlap), ("user_message_id", m1)])?;
                uow.insert_edge_if_absent(table, &[("topic_id", overlap), ("user_message_id", m2)])?;

                let outcome = uow.remap_edges(table, "topic_id", Some(overlap), Some(billing))?;
                assert_eq!(outcome, RemapOutcome { rewritten: 1, collapsed: 1 });
                uow.delete_by_id::<Topic>(overlap)?;

                let mut linked: Vec<i64> = uow
                    .edges(table, "topic_id", billing)?
                    .into_iter()
                    .map(|e| e.right)
                    .collect();
                linked.sort();
                assert_eq!(linked, vec![m1, m2]);
                assert!(uow.edges(table, "topic_id", overlap)?.is_empty());
                Ok(())
            })
            .unwrap();

        let topics = store.transaction(|uow| uow.read_all::<Topic>()).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].name, "Billing");
    }

    #[test]
    fn test_feedback_search_flow() {
        let store = Store::open_in_memory().unwrap();
        let mut uow = store.acquire().unwrap();
        let p = project(&mut uow, "Acme").id.unwrap();
        for (source, rating) in [("slack", 5.0), ("slack", 3.0), ("web", 5.0)] {
            uow.create(&Feedback {
                project_id: Some(p),
                source: source.to_string(),
                rating: Some(rating),
                ..Default::default()
            })
            .unwrap();
        }

        let filters = Filters::from_json(r#"{"source": {"value": "slack"}, "rating": {"operator": ">=", "value": 4}}"#)
            .unwrap();
        let found = uow.find::<Feedback>(&filters).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rating, Some(5.0));

        let records = uow
            .find_records("feedbacks", &Filters::new().with("source", Condition::new(Operator::In, vec!["web", "email"])))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("source"), Some(&Value::from("web")));

        let created = uow
            .create_record("feedbacks", &Record::new().with("source", "api").with("project_id", p))
            .unwrap();
        assert!(created.id().is_some());
        assert!(matches!(created.get("date"), Some(Value::Timestamp(_))));
    }
}
