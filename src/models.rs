use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Video,
    Pdf,
    Article,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Video => "video",
            ResourceType::Pdf => "pdf",
            ResourceType::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(ResourceType::Video),
            "pdf" => Some(ResourceType::Pdf),
            "article" => Some(ResourceType::Article),
            _ => None,
        }
    }
}

// Stored body of a resource document; the id lives on the document itself
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Learning resource as returned by the API
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Resource {
    pub id: String,
    #[serde(flatten)]
    pub record: ResourceRecord,
}

// Tag usage counter, one document per tag name
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagCounter {
    pub name: String,
    pub usage_count: u64,
}

// POST body for a new resource
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// PATCH body; absent fields are left untouched
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResourceRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ListParams {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub tags: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse {
    pub data: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadResponse {
    pub key: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_flattens_record_on_the_wire() {
        let created = "2024-05-01T10:00:00Z".parse().unwrap();
        let resource = Resource {
            id: "abc".to_string(),
            record: ResourceRecord {
                title: "Intro".to_string(),
                description: "Basics".to_string(),
                resource_type: ResourceType::Pdf,
                url: "https://example.com/a.pdf".to_string(),
                thumbnail_url: None,
                tags: vec!["go".to_string()],
                created_at: created,
                updated_at: created,
            },
        };

        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["id"], json!("abc"));
        assert_eq!(value["type"], json!("pdf"));
        assert_eq!(value["createdAt"], json!("2024-05-01T10:00:00Z"));
        assert!(value.get("thumbnailUrl").is_none());
    }

    #[test]
    fn tag_counter_uses_camel_case() {
        let counter: TagCounter = serde_json::from_value(json!({ "name": "go", "usageCount": 3 })).unwrap();
        assert_eq!(counter.usage_count, 3);
    }
}
