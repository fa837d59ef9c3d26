/// Data for the /v1/models endpoint.
/// This endpoint mimics the openai API's models endpoint. Each 'model' is one entry of the
/// aggregated model list, aliases included when they are exposed.
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{self, ListResponse};
use crate::name::ModelName;

/// The returned models from the /v1/models endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Model {
    /// The model identifier, which can be referenced in the API endpoints.
    pub id: String,
    /// The Unix timestamp (in seconds) when the model was last modified.
    pub created: Option<i64>,
    /// The object type, which is always "model".
    pub object: String,
    /// The namespace the model was published under.
    pub owned_by: String,
}

impl Model {
    pub fn from_entry(entry: &api::ListModelResponse) -> Self {
        let id = if entry.model.is_empty() {
            entry.name.clone()
        } else {
            entry.model.clone()
        };
        Model {
            owned_by: ModelName::parse(&id).namespace,
            created: entry.modified_at.map(|t| t.timestamp()),
            object: "model".into(),
            id,
        }
    }

    /// A model as described by a show answer; `created` comes from its `modified_at`.
    pub fn from_show(id: &str, show: &api::ShowResponse) -> Self {
        let created = show
            .fields
            .get("modified_at")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp());
        Model {
            id: id.to_string(),
            created,
            object: "model".into(),
            owned_by: ModelName::parse(id).namespace,
        }
    }
}

/// The response from the /v1/models endpoint, which is a list of models.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListModelResponse {
    /// The object type, which is always "list".
    pub object: String,
    /// A list of model objects.
    pub data: Vec<Model>,
}

impl From<&ListResponse> for ListModelResponse {
    fn from(list: &ListResponse) -> Self {
        ListModelResponse {
            object: "list".into(),
            data: list.models.iter().map(Model::from_entry).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::list_entry;
    use serde_json::json;

    #[test]
    fn test_list_keeps_order_and_maps_fields() {
        let list = ListResponse {
            models: vec![
                list_entry("llama3.2:latest", "2024-10-01T00:00:00Z"),
                list_entry("jmorgan/phi:2", "2024-09-01T00:00:00Z"),
            ],
        };

        let openai = ListModelResponse::from(&list);
        assert_eq!(openai.object, "list");
        assert_eq!(
            openai.data,
            vec![
                Model {
                    id: "llama3.2:latest".into(),
                    created: Some(1727740800),
                    object: "model".into(),
                    owned_by: "library".into(),
                },
                Model {
                    id: "jmorgan/phi:2".into(),
                    created: Some(1725148800),
                    object: "model".into(),
                    owned_by: "jmorgan".into(),
                },
            ]
        );
    }

    #[test]
    fn test_show_answer_becomes_a_model() {
        let show: api::ShowResponse = serde_json::from_value(json!({
            "modelfile": "FROM jmorgan/phi:2",
            "modified_at": "2024-09-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            Model::from_show("jmorgan/phi:2", &show),
            Model {
                id: "jmorgan/phi:2".into(),
                created: Some(1725148800),
                object: "model".into(),
                owned_by: "jmorgan".into(),
            }
        );

        let undated = Model::from_show("llama3.2", &api::ShowResponse::default());
        assert_eq!(undated.created, None);
        assert_eq!(undated.owned_by, "library");
    }
}
