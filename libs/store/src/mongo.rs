//! Document store adapter backed by MongoDB.
//!
//! One collection per dataset; the document `_id` is the canonical key and
//! the body is the resource's object tree, so the durable layout can be
//! replayed into the grid without transformation.

use crate::error::{Error, Result};
use crate::{DataSource, Store, StoreKind, resolve_target, selector};

use quasar_core::config::{MongoConfig, ResourceConfig};
use quasar_core::resource::ResourceRegistry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::IndexModel;
use mongodb::bson::{Document, doc};
use mongodb::{Client, Collection};
use serde_json::Value;
use tracing::{debug, info};

pub struct MongoStore {
    config: MongoConfig,
    registry: Arc<ResourceRegistry>,
    client: OnceLock<Client>,
    connected: AtomicBool,
}

impl MongoStore {
    pub fn new(config: MongoConfig, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            config,
            registry,
            client: OnceLock::new(),
            connected: AtomicBool::new(false),
        }
    }

    fn collection(&self, dataset: &str) -> Result<Collection<Document>> {
        let client = self
            .client
            .get()
            .ok_or(Error::NotInitialized(StoreKind::Document))?;
        Ok(client.database(&self.config.database).collection(dataset))
    }

    fn to_document(resource: &Value, key: &str) -> Result<Document> {
        let mut document = mongodb::bson::to_document(resource)
            .map_err(|e| Error::BsonError("cannot encode resource".to_string(), Box::new(e)))?;
        document.insert("_id", key);
        Ok(document)
    }

    fn to_resource(mut document: Document) -> Result<Value> {
        document.remove("_id");
        serde_json::to_value(&document)
            .map_err(|e| Error::SerializationError("cannot decode document".to_string(), e))
    }
}

#[async_trait]
impl Store for MongoStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    async fn initialize(&self) -> Result<()> {
        let client = Client::with_uri_str(&self.config.uri)
            .await
            .map_err(|e| Error::MongoError("cannot connect".to_string(), Box::new(e)))?;
        client
            .database(&self.config.database)
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| Error::MongoError("store unreachable".to_string(), Box::new(e)))?;
        let _ = self.client.set(client);
        self.connected.store(true, Ordering::SeqCst);
        info!(msg = "initialized document store", database = %self.config.database);
        Ok(())
    }

    async fn initialize_resource(
        &self,
        _data_source: Option<Arc<dyn DataSource>>,
        spec: &ResourceConfig,
    ) -> Result<()> {
        let dataset = spec.kubernetes.dataset();
        let collection = self.collection(&dataset)?;
        for index in &spec.mongo_indexes {
            let mut keys = Document::new();
            for (field, direction) in index {
                keys.insert(field.clone(), *direction);
            }
            debug!(msg = "creating document store index", dataset, keys = %keys);
            collection
                .create_index(IndexModel::builder().keys(keys).build())
                .await
                .map_err(|e| Error::MongoError("cannot create index".to_string(), Box::new(e)))?;
        }
        Ok(())
    }

    async fn create(&self, resource: &Value) -> Result<()> {
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        let document = Self::to_document(resource, &key)?;
        self.collection(&dataset)?
            .replace_one(doc! {"_id": &key}, document)
            .upsert(true)
            .await
            .map_err(|e| Error::MongoError("create failed".to_string(), Box::new(e)))?;
        Ok(())
    }

    async fn update(&self, old: &Value, new: &Value) -> Result<()> {
        let (dataset, key) = resolve_target(&self.registry, old)?;
        let document = Self::to_document(new, &key)?;
        self.collection(&dataset)?
            .replace_one(doc! {"_id": &key}, document)
            .upsert(true)
            .await
            .map_err(|e| Error::MongoError("update failed".to_string(), Box::new(e)))?;
        Ok(())
    }

    async fn delete(&self, resource: &Value) -> Result<()> {
        let (dataset, key) = resolve_target(&self.registry, resource)?;
        self.collection(&dataset)?
            .delete_one(doc! {"_id": &key})
            .await
            .map_err(|e| Error::MongoError("delete failed".to_string(), Box::new(e)))?;
        Ok(())
    }

    async fn read(&self, dataset: &str, key: &str) -> Result<Value> {
        let document = self
            .collection(dataset)?
            .find_one(doc! {"_id": key})
            .await
            .map_err(|e| Error::MongoError("read failed".to_string(), Box::new(e)))?
            .ok_or(Error::NotFound)?;
        Self::to_resource(document)
    }

    async fn list(&self, dataset: &str, field_selector: &str, limit: i64) -> Result<Vec<Value>> {
        // Selector equality compares the rendered value, same as the grid
        // adapter, so the filter is applied to the decoded tree instead of
        // a typed BSON query (a BSON string filter would never match
        // numeric or boolean fields).
        let filters = selector::parse(field_selector).unwrap_or_default();
        let collection = self.collection(dataset)?;
        let mut find = collection.find(Document::new());
        if limit > 0 && filters.is_empty() {
            find = find.limit(limit);
        }
        let documents: Vec<Document> = find
            .await
            .map_err(|e| Error::MongoError("list failed".to_string(), Box::new(e)))?
            .try_collect()
            .await
            .map_err(|e| Error::MongoError("list cursor failed".to_string(), Box::new(e)))?;

        let mut items = Vec::new();
        for document in documents {
            let resource = Self::to_resource(document)?;
            if !selector::matches(&resource, &filters) {
                continue;
            }
            items.push(resource);
            if limit > 0 && items.len() as i64 >= limit {
                break;
            }
        }
        Ok(items)
    }

    async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        let values = self
            .collection(dataset)?
            .distinct("_id", Document::new())
            .await
            .map_err(|e| Error::MongoError("keys failed".to_string(), Box::new(e)))?;
        Ok(values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn count(&self, dataset: &str) -> Result<u64> {
        self.collection(dataset)?
            .count_documents(Document::new())
            .await
            .map_err(|e| Error::MongoError("count failed".to_string(), Box::new(e)))
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(client) = self.client.get() {
                client.clone().shutdown().await;
            }
            info!(msg = "document store shut down", database = %self.config.database);
        }
        Ok(())
    }
}
