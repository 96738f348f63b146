//! Typed client for the Catalog's GraphQL API.
//!
//! One shared connection pool, per-request timeout, retry with jittered
//! exponential backoff for transient failures. Responses are normalized
//! into the local data model by [`super::transform`]; create operations
//! are idempotent by exact-name lookup before insert.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use curator_model::{RemotePerformer, RemoteScene, RemoteStudio, RemoteTag, SceneId, TagId};

use crate::catalog::cache::{CacheKeys, ENTITY_TTL, EntityCache};
use crate::catalog::{queries, transform};
use crate::config::CatalogSettings;
use crate::error::{CuratorError, Result};
use crate::retry::{RetryPolicy, retry};

const SCENE_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    graphql_url: String,
    api_key: Option<String>,
    cache: Arc<EntityCache>,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("graphql_url", &self.graphql_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl CatalogClient {
    pub fn new(settings: &CatalogSettings, cache: Arc<EntityCache>) -> Result<Self> {
        url::Url::parse(&settings.url)
            .map_err(|e| CuratorError::Config(format!("invalid Catalog URL: {e}")))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(settings.max_connections)
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CuratorError::Config(format!("failed to build HTTP client: {e}")))?;

        let graphql_url = format!("{}/graphql", settings.url.trim_end_matches('/'));
        info!("Catalog client targeting {graphql_url}");

        Ok(Self {
            http,
            graphql_url,
            api_key: settings.api_key.clone(),
            cache,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Single-attempt GraphQL round trip with error classification.
    async fn execute_once(&self, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": query, "variables": variables });

        let mut request = self.http.post(&self.graphql_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("ApiKey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(CuratorError::Authentication(
                "Catalog rejected the API key".into(),
            ));
        }
        if status.as_u16() == 429 {
            return Err(CuratorError::RateLimited("Catalog rate limit hit".into()));
        }
        if status.is_server_error() {
            return Err(CuratorError::Connection(format!(
                "Catalog returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(CuratorError::Protocol(format!(
                "unexpected Catalog status {status}"
            )));
        }

        let body: Value = response.json().await?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(CuratorError::Protocol(format!(
                "GraphQL errors: {}",
                messages.join(", ")
            )));
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// GraphQL round trip with the standard retry policy applied.
    pub async fn execute(&self, query: &str, variables: Value) -> Result<Value> {
        retry(
            "catalog",
            self.retry_policy,
            CuratorError::is_transient,
            || self.execute_once(query, variables.clone()),
        )
        .await
    }

    // Scene reads

    pub async fn get_scenes(
        &self,
        page: u64,
        per_page: i64,
        filter: Option<Value>,
        sort: Option<&str>,
    ) -> Result<(Vec<RemoteScene>, u64)> {
        let mut find_filter = json!({ "page": page, "per_page": per_page });
        if let Some(sort) = sort {
            find_filter["sort"] = json!(sort);
            find_filter["direction"] = json!("DESC");
        }

        let variables = json!({
            "filter": find_filter,
            "scene_filter": filter.unwrap_or_else(|| json!({})),
        });

        let data = self.execute(&queries::get_scenes(), variables).await?;
        let found = data.get("findScenes").cloned().unwrap_or(Value::Null);

        let scenes = found
            .get("scenes")
            .and_then(Value::as_array)
            .map(|raw| raw.iter().filter_map(transform::transform_scene).collect())
            .unwrap_or_default();
        let total = found.get("count").and_then(Value::as_u64).unwrap_or(0);

        Ok((scenes, total))
    }

    pub async fn get_scene(&self, scene_id: &SceneId) -> Result<Option<RemoteScene>> {
        let cache_key = CacheKeys::scene(scene_id.as_str());
        if let Some(cached) = self.cache.get::<RemoteScene>(&cache_key) {
            return Ok(Some(cached));
        }

        let data = self
            .execute(&queries::get_scene_by_id(), json!({ "id": scene_id.as_str() }))
            .await?;

        let Some(raw) = data.get("findScene").filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let scene = transform::transform_scene(raw)
            .ok_or_else(|| CuratorError::Protocol("scene payload missing id".into()))?;
        self.cache.set(cache_key, &scene, Some(SCENE_CACHE_TTL));

        Ok(Some(scene))
    }

    /// Text/flag search over scenes; a thin filter builder over
    /// [`Self::get_scenes`].
    pub async fn find_scenes(
        &self,
        query: Option<&str>,
        organized: Option<bool>,
        page: u64,
        per_page: i64,
    ) -> Result<(Vec<RemoteScene>, u64)> {
        let mut scene_filter = json!({});
        if let Some(organized) = organized {
            scene_filter["organized"] = json!(organized);
        }

        let mut find_filter = json!({ "page": page, "per_page": per_page });
        if let Some(q) = query {
            find_filter["q"] = json!(q);
        }

        let variables = json!({ "filter": find_filter, "scene_filter": scene_filter });
        let data = self.execute(&queries::get_scenes(), variables).await?;
        let found = data.get("findScenes").cloned().unwrap_or(Value::Null);

        let scenes = found
            .get("scenes")
            .and_then(Value::as_array)
            .map(|raw| raw.iter().filter_map(transform::transform_scene).collect())
            .unwrap_or_default();
        let total = found.get("count").and_then(Value::as_u64).unwrap_or(0);
        Ok((scenes, total))
    }

    pub async fn get_scenes_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        page: u64,
        per_page: i64,
    ) -> Result<(Vec<RemoteScene>, u64)> {
        let filter = json!({
            "updated_at": {
                "value": since.to_rfc3339(),
                "modifier": "GREATER_THAN",
            }
        });
        self.get_scenes(page, per_page, Some(filter), Some("updated_at"))
            .await
    }

    // Entity reads

    pub async fn get_all_performers(&self) -> Result<Vec<RemotePerformer>> {
        let cache_key = CacheKeys::entities_all("performers");
        if let Some(cached) = self.cache.get::<Vec<RemotePerformer>>(&cache_key) {
            return Ok(cached);
        }

        let data = self.execute(queries::GET_ALL_PERFORMERS, json!({})).await?;
        let performers: Vec<RemotePerformer> = data
            .get("allPerformers")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(transform::transform_performer)
                    .collect()
            })
            .unwrap_or_default();

        self.cache.set(cache_key, &performers, Some(ENTITY_TTL));
        Ok(performers)
    }

    pub async fn get_all_tags(&self) -> Result<Vec<RemoteTag>> {
        let cache_key = CacheKeys::entities_all("tags");
        if let Some(cached) = self.cache.get::<Vec<RemoteTag>>(&cache_key) {
            return Ok(cached);
        }

        let data = self.execute(queries::GET_ALL_TAGS, json!({})).await?;
        let tags: Vec<RemoteTag> = data
            .get("allTags")
            .and_then(Value::as_array)
            .map(|raw| raw.iter().filter_map(transform::transform_tag).collect())
            .unwrap_or_default();

        self.cache.set(cache_key, &tags, Some(ENTITY_TTL));
        Ok(tags)
    }

    pub async fn get_all_studios(&self) -> Result<Vec<RemoteStudio>> {
        let cache_key = CacheKeys::entities_all("studios");
        if let Some(cached) = self.cache.get::<Vec<RemoteStudio>>(&cache_key) {
            return Ok(cached);
        }

        let data = self.execute(queries::GET_ALL_STUDIOS, json!({})).await?;
        let studios: Vec<RemoteStudio> = data
            .get("allStudios")
            .and_then(Value::as_array)
            .map(|raw| raw.iter().filter_map(transform::transform_studio).collect())
            .unwrap_or_default();

        self.cache.set(cache_key, &studios, Some(ENTITY_TTL));
        Ok(studios)
    }

    async fn find_entities_since(
        &self,
        query: &str,
        since: chrono::DateTime<chrono::Utc>,
        root: &str,
        list: &str,
        filter_key: &str,
    ) -> Result<Vec<Value>> {
        let mut variables = json!({ "filter": { "page": 1, "per_page": -1 } });
        variables[filter_key] = json!({
            "updated_at": {
                "value": since.to_rfc3339(),
                "modifier": "GREATER_THAN",
            }
        });

        let data = self.execute(query, variables).await?;
        Ok(data
            .get(root)
            .and_then(|found| found.get(list))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn get_performers_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<RemotePerformer>> {
        let raw = self
            .find_entities_since(
                queries::FIND_PERFORMERS,
                since,
                "findPerformers",
                "performers",
                "performer_filter",
            )
            .await?;
        Ok(raw
            .iter()
            .filter_map(transform::transform_performer)
            .collect())
    }

    pub async fn get_tags_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<RemoteTag>> {
        let raw = self
            .find_entities_since(queries::FIND_TAGS, since, "findTags", "tags", "tag_filter")
            .await?;
        Ok(raw.iter().filter_map(transform::transform_tag).collect())
    }

    pub async fn get_studios_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<RemoteStudio>> {
        let raw = self
            .find_entities_since(
                queries::FIND_STUDIOS,
                since,
                "findStudios",
                "studios",
                "studio_filter",
            )
            .await?;
        Ok(raw.iter().filter_map(transform::transform_studio).collect())
    }

    pub async fn get_stats(&self) -> Result<Value> {
        let data = self.execute(queries::GET_STATS, json!({})).await?;
        Ok(data.get("stats").cloned().unwrap_or(Value::Null))
    }

    pub async fn test_connection(&self) -> bool {
        match self.execute_once(queries::VERSION, json!({})).await {
            Ok(data) => data.get("version").is_some(),
            Err(err) => {
                warn!("Catalog connection test failed: {err}");
                false
            }
        }
    }

    // Scene writes

    pub async fn update_scene(&self, scene_id: &SceneId, updates: Value) -> Result<RemoteScene> {
        let mut input = updates;
        input["id"] = json!(scene_id.as_str());

        let data = self
            .execute(&queries::update_scene(), json!({ "input": input }))
            .await?;

        self.cache.delete(&CacheKeys::scene(scene_id.as_str()));

        let raw = data
            .get("sceneUpdate")
            .filter(|v| !v.is_null())
            .ok_or_else(|| CuratorError::NotFound(format!("scene {scene_id} not found")))?;
        transform::transform_scene(raw)
            .ok_or_else(|| CuratorError::Protocol("scene update payload missing id".into()))
    }

    pub async fn bulk_update_scenes(&self, scene_ids: &[SceneId], updates: Value) -> Result<u64> {
        let mut input = updates;
        input["ids"] = json!(scene_ids.iter().map(SceneId::as_str).collect::<Vec<_>>());

        let data = self
            .execute(queries::BULK_UPDATE_SCENES, json!({ "input": input }))
            .await?;

        for id in scene_ids {
            self.cache.delete(&CacheKeys::scene(id.as_str()));
        }

        Ok(data
            .get("bulkSceneUpdate")
            .and_then(Value::as_array)
            .map(|updated| updated.len() as u64)
            .unwrap_or(0))
    }

    // Entity writes. Creation is idempotent: an exact-name match returns
    // the existing record instead of inserting a duplicate.

    pub async fn find_performer(&self, name: &str) -> Result<Option<RemotePerformer>> {
        let variables = json!({
            "filter": { "page": 1, "per_page": 5 },
            "performer_filter": {
                "name": { "value": name, "modifier": "EQUALS" }
            }
        });
        let data = self.execute(queries::FIND_PERFORMERS, variables).await?;
        let found = data
            .get("findPerformers")
            .and_then(|f| f.get("performers"))
            .and_then(Value::as_array)
            .and_then(|performers| {
                performers.iter().find(|p| {
                    p.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            })
            .and_then(transform::transform_performer);
        Ok(found)
    }

    pub async fn create_performer(&self, name: &str, attrs: Value) -> Result<RemotePerformer> {
        if name.trim().is_empty() {
            return Err(CuratorError::Validation("performer name is empty".into()));
        }

        let mut input = attrs;
        input["name"] = json!(name);

        let data = self
            .execute(queries::CREATE_PERFORMER, json!({ "input": input }))
            .await?;
        self.cache.invalidate(&CacheKeys::entity_prefix("performers"));

        data.get("performerCreate")
            .and_then(transform::transform_performer)
            .ok_or_else(|| CuratorError::Protocol("performerCreate returned no record".into()))
    }

    pub async fn find_or_create_performer(&self, name: &str) -> Result<RemotePerformer> {
        if let Some(existing) = self.find_performer(name).await? {
            return Ok(existing);
        }
        debug!("creating performer {name}");
        self.create_performer(name, json!({})).await
    }

    pub async fn find_tag(&self, name: &str) -> Result<Option<RemoteTag>> {
        let variables = json!({
            "filter": { "page": 1, "per_page": 5 },
            "tag_filter": {
                "name": { "value": name, "modifier": "EQUALS" }
            }
        });
        let data = self.execute(queries::FIND_TAGS, variables).await?;
        let found = data
            .get("findTags")
            .and_then(|f| f.get("tags"))
            .and_then(Value::as_array)
            .and_then(|tags| {
                tags.iter().find(|t| {
                    t.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            })
            .and_then(transform::transform_tag);
        Ok(found)
    }

    pub async fn create_tag(&self, name: &str, attrs: Value) -> Result<RemoteTag> {
        if name.trim().is_empty() {
            return Err(CuratorError::Validation("tag name is empty".into()));
        }

        let mut input = attrs;
        input["name"] = json!(name);

        let data = self
            .execute(queries::CREATE_TAG, json!({ "input": input }))
            .await?;
        self.cache.invalidate(&CacheKeys::entity_prefix("tags"));

        data.get("tagCreate")
            .and_then(transform::transform_tag)
            .ok_or_else(|| CuratorError::Protocol("tagCreate returned no record".into()))
    }

    pub async fn find_or_create_tag(&self, name: &str) -> Result<TagId> {
        if let Some(existing) = self.find_tag(name).await? {
            return Ok(TagId::new(existing.id));
        }
        debug!("creating tag {name}");
        let created = self.create_tag(name, json!({})).await?;
        Ok(TagId::new(created.id))
    }

    pub async fn find_studio(&self, name: &str) -> Result<Option<RemoteStudio>> {
        let variables = json!({
            "filter": { "page": 1, "per_page": 5 },
            "studio_filter": {
                "name": { "value": name, "modifier": "EQUALS" }
            }
        });
        let data = self.execute(queries::FIND_STUDIOS, variables).await?;
        let found = data
            .get("findStudios")
            .and_then(|f| f.get("studios"))
            .and_then(Value::as_array)
            .and_then(|studios| {
                studios.iter().find(|s| {
                    s.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            })
            .and_then(transform::transform_studio);
        Ok(found)
    }

    pub async fn create_studio(&self, name: &str, attrs: Value) -> Result<RemoteStudio> {
        if name.trim().is_empty() {
            return Err(CuratorError::Validation("studio name is empty".into()));
        }

        let mut input = attrs;
        input["name"] = json!(name);

        let data = self
            .execute(queries::CREATE_STUDIO, json!({ "input": input }))
            .await?;
        self.cache.invalidate(&CacheKeys::entity_prefix("studios"));

        data.get("studioCreate")
            .and_then(transform::transform_studio)
            .ok_or_else(|| CuratorError::Protocol("studioCreate returned no record".into()))
    }

    pub async fn find_or_create_studio(&self, name: &str) -> Result<RemoteStudio> {
        if let Some(existing) = self.find_studio(name).await? {
            return Ok(existing);
        }
        debug!("creating studio {name}");
        self.create_studio(name, json!({})).await
    }

    // Markers

    pub async fn create_marker(
        &self,
        scene_id: &SceneId,
        seconds: f64,
        end_seconds: Option<f64>,
        title: &str,
        tag_ids: &[TagId],
    ) -> Result<String> {
        let Some((primary, rest)) = tag_ids.split_first() else {
            return Err(CuratorError::Validation(
                "marker requires at least a primary tag".into(),
            ));
        };
        if end_seconds.is_some_and(|end| end < seconds) {
            return Err(CuratorError::Validation(
                "marker end_seconds precedes seconds".into(),
            ));
        }

        let input = json!({
            "scene_id": scene_id.as_str(),
            "seconds": seconds,
            "end_seconds": end_seconds,
            "title": title,
            "primary_tag_id": primary.as_str(),
            "tag_ids": rest.iter().map(TagId::as_str).collect::<Vec<_>>(),
        });

        let data = self
            .execute(queries::CREATE_MARKER, json!({ "input": input }))
            .await?;
        self.cache.delete(&CacheKeys::scene(scene_id.as_str()));

        data.get("sceneMarkerCreate")
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CuratorError::Protocol("sceneMarkerCreate returned no id".into()))
    }

    pub async fn delete_marker(&self, marker_id: &str, scene_id: &SceneId) -> Result<()> {
        self.execute(queries::DELETE_MARKER, json!({ "id": marker_id }))
            .await?;
        self.cache.delete(&CacheKeys::scene(scene_id.as_str()));
        Ok(())
    }
}
