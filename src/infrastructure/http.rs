use crate::backend::{DocumentStore, NewDocument, PushNotification, PushNotifier};
use crate::messaging::DocumentRecord;
use crate::types::constants::{EXPO_PUSH_ENDPOINT, collections, fields};
use crate::types::{RealtimeError, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use url::Url;

const PROJECT_HEADER: &str = "X-Project";
const API_KEY_HEADER: &str = "X-Key";
const SESSION_HEADER: &str = "X-Session";

/// Document store over the backend's REST API.
pub struct RestDocumentStore {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    database_id: String,
    api_key: Option<String>,
    session: Option<String>,
}

impl RestDocumentStore {
    pub fn new(
        endpoint: impl Into<String>,
        project: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            project: project.into(),
            database_id: database_id.into(),
            api_key: None,
            session: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// `{endpoint}/databases/{db}/collections/{collection}/documents[/{id}]`
    pub fn documents_url(&self, collection: &str, document_id: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RealtimeError::Config(format!("invalid endpoint: {}", self.endpoint))
            })?;
            segments.pop_if_empty().extend([
                "databases",
                self.database_id.as_str(),
                "collections",
                collection,
                "documents",
            ]);
            if let Some(id) = document_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, url)
            .header("Content-Type", "application/json")
            .header(PROJECT_HEADER, &self.project);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(session) = &self.session {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }
}

/// Query parameters selecting unseen documents addressed to `receiver_id`
pub fn unseen_queries(receiver_id: &str) -> Vec<String> {
    vec![
        json!({"method": "equal", "attribute": fields::RECEIVER_ID, "values": [receiver_id]})
            .to_string(),
        json!({"method": "equal", "attribute": fields::IS_SEEN, "values": [false]}).to_string(),
        json!({"method": "limit", "values": [1]}).to_string(),
    ]
}

/// Turn a non-success response into [`RealtimeError::Backend`]
async fn json_body(response: Response) -> Result<Value> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());
    Err(RealtimeError::Backend {
        code: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn count_unseen(&self, collection: &str, receiver_id: &str) -> Result<u64> {
        let mut url = self.documents_url(collection, None)?;
        {
            let mut pairs = url.query_pairs_mut();
            for query in unseen_queries(receiver_id) {
                pairs.append_pair("queries[]", &query);
            }
        }

        let body = json_body(self.request(Method::GET, url).send().await?).await?;
        Ok(body.get("total").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn mark_seen(&self, collection: &str, document_id: &str) -> Result<()> {
        let url = self.documents_url(collection, Some(document_id))?;
        let request = self
            .request(Method::PATCH, url)
            .json(&json!({"data": {"isSeen": true}}));
        json_body(request.send().await?).await?;
        tracing::debug!("Marked {}/{} as seen", collection, document_id);
        Ok(())
    }

    async fn create_document(
        &self,
        collection: &str,
        document: &NewDocument,
    ) -> Result<DocumentRecord> {
        let url = self.documents_url(collection, None)?;
        let request = self
            .request(Method::POST, url)
            .json(&json!({"documentId": "unique()", "data": document}));
        let body = json_body(request.send().await?).await?;
        Ok(DocumentRecord::from_payload(&body))
    }

    async fn push_token(&self, user_id: &str) -> Result<Option<String>> {
        let url = self.documents_url(collections::PROFILES, Some(user_id))?;
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = json_body(response).await?;
        Ok(body
            .get(fields::PUSH_TOKEN)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string))
    }
}

/// [`PushNotifier`] for Expo push tokens
pub struct ExpoPushNotifier {
    http: reqwest::Client,
    endpoint: String,
}

impl ExpoPushNotifier {
    pub fn new() -> Self {
        Self::with_endpoint(EXPO_PUSH_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for ExpoPushNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushNotifier for ExpoPushNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<()> {
        let body = json!({
            "to": notification.to,
            "sound": "default",
            "title": notification.title,
            "body": notification.body,
            "data": notification.data,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        json_body(response).await?;

        tracing::debug!("Push sent to {}", notification.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_url() {
        let store = RestDocumentStore::new("https://cloud.example.io/v1/", "marketplace", "main");

        let list = store.documents_url("messages", None).unwrap();
        assert_eq!(list.path(), "/v1/databases/main/collections/messages/documents");

        let single = store.documents_url("users", Some("u1")).unwrap();
        assert_eq!(
            single.as_str(),
            "https://cloud.example.io/v1/databases/main/collections/users/documents/u1"
        );
    }

    #[test]
    fn test_unseen_queries() {
        let queries: Vec<Value> = unseen_queries("u1")
            .iter()
            .map(|q| serde_json::from_str(q).unwrap())
            .collect();

        assert_eq!(queries[0]["attribute"], "receiverId");
        assert_eq!(queries[0]["values"][0], "u1");
        assert_eq!(queries[1]["attribute"], "isSeen");
        assert_eq!(queries[1]["values"][0], false);
        assert_eq!(queries[2]["method"], "limit");
    }
}
