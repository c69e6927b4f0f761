//! Wire contract tests shared between the server and engine clients.
//!
//! These check the JSON shapes without a database.

use readlist_engine::api::{
    ChangeSet, CreatedId, EntryBody, ErrorBody, ListBody, RemoteEntry, RemoteList,
    DUPLICATE_LIST_CODE, NOT_SET_UP_CODE,
};
use serde_json::json;

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn list_body_omits_missing_description() {
        let body = ListBody {
            name: "Travel".into(),
            description: None,
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"name": "Travel"}));

        let parsed: ListBody =
            serde_json::from_value(json!({"name": "Travel", "description": "trips"})).unwrap();
        assert_eq!(parsed.description.as_deref(), Some("trips"));
    }

    #[test]
    fn entry_body_shape() {
        let body: EntryBody =
            serde_json::from_value(json!({"project": "enwiki", "title": "Red_panda"})).unwrap();
        assert_eq!(body.project, "enwiki");
        assert_eq!(body.title, "Red_panda");
    }

    #[test]
    fn created_id_shape() {
        let created = CreatedId { id: 42 };
        assert_eq!(serde_json::to_value(created).unwrap(), json!({"id": 42}));
    }

    #[test]
    fn change_set_uses_camel_case() {
        let changes = ChangeSet {
            lists: vec![RemoteList {
                id: 1,
                name: Some("default".into()),
                description: None,
                default: true,
                deleted: false,
                updated: "2024-03-01T10:00:00.000000Z".into(),
                created: Some("2024-03-01T10:00:00.000000Z".into()),
            }],
            entries: vec![RemoteEntry {
                id: 7,
                list_id: Some(1),
                article_key: Some("enwiki:Red_panda".into()),
                project: Some("enwiki".into()),
                title: Some("Red_panda".into()),
                deleted: true,
                updated: "2024-03-01T10:00:01.000000Z".into(),
            }],
            malformed: Vec::new(),
        };

        let value = serde_json::to_value(&changes).unwrap();
        assert_eq!(value["entries"][0]["listId"], 1);
        assert_eq!(value["entries"][0]["articleKey"], "enwiki:Red_panda");
        assert_eq!(value["lists"][0]["default"], true);

        let parsed: ChangeSet = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, changes);
    }

    #[test]
    fn change_set_tolerates_missing_fields() {
        let parsed: ChangeSet = serde_json::from_value(json!({
            "lists": [{"id": 3, "updated": "2024-03-01T10:00:00Z"}]
        }))
        .unwrap();
        assert!(parsed.entries.is_empty());
        assert!(parsed.lists[0].name.is_none());
        assert!(!parsed.lists[0].deleted);
    }

    #[test]
    fn error_codes_round_trip() {
        for code in [NOT_SET_UP_CODE, DUPLICATE_LIST_CODE] {
            let body = ErrorBody {
                error: "rejected".into(),
                code: Some(code.into()),
                details: None,
            };
            let text = serde_json::to_string(&body).unwrap();
            assert!(!text.contains("details"));
            let parsed: ErrorBody = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed.code.as_deref(), Some(code));
        }
    }
}
