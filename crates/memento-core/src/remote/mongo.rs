//! MongoDB remote store
//!
//! All records live in one collection. Content records are keyed by
//! `(document_id, type, digest)` and key records by `(document_id, type)`.
//!
//! The connection is opened lazily, shared through [`RemoteConnection`] and
//! dropped after an error or once it outlives the configured session
//! lifetime. Every operation is bounded by the connect timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, doc, Binary, Document};
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{check_blob_size, content_digest, RemoteContent, RemoteStore, CONTENT_TYPE, KEY_TYPE};
use crate::config::Config;
use crate::error::{MementoError, MementoResult};
use crate::models::DocumentId;
use crate::vault::KeyMaterial;

struct Session {
    collection: Collection<Document>,
    opened_at: Instant,
}

impl Session {
    fn new(collection: Collection<Document>) -> Self {
        Self {
            collection,
            opened_at: Instant::now(),
        }
    }

    fn is_expired(&self, lifetime: Duration) -> bool {
        self.opened_at.elapsed() >= lifetime
    }
}

/// Shared, lazily opened connection to the MongoDB deployment
pub struct RemoteConnection {
    uri: String,
    database: String,
    collection: String,
    timeout: Duration,
    session_lifetime: Duration,
    session: Mutex<Option<Session>>,
}

impl RemoteConnection {
    /// Connection settings from configuration
    ///
    /// Fails with `BackendUnavailable` if no remote URI is configured. No
    /// network traffic happens until the first operation.
    pub fn new(config: &Config) -> MementoResult<Self> {
        let uri = config
            .remote_uri
            .clone()
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| {
                MementoError::BackendUnavailable("no remote URI configured".to_string())
            })?;

        Ok(Self {
            uri,
            database: config.remote_database.clone(),
            collection: config.remote_collection.clone(),
            timeout: config.connect_timeout(),
            session_lifetime: config.session_lifetime(),
            session: Mutex::new(None),
        })
    }

    /// Collection handle of the live session, connecting if needed
    ///
    /// Makes one connection attempt bounded by the connect timeout. A failed
    /// attempt leaves no session behind, so the next call tries again.
    async fn collection(&self) -> MementoResult<Collection<Document>> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if !current.is_expired(self.session_lifetime) {
                return Ok(current.collection.clone());
            }
            debug!("Remote session expired, reconnecting");
        }
        *session = None;

        let attempt = match tokio::time::timeout(self.timeout, self.connect()).await {
            Ok(attempt) => attempt,
            Err(_) => Err(format!("connect timed out after {:?}", self.timeout)),
        };

        match attempt {
            Ok(collection) => {
                info!("Connected to remote store (database {})", self.database);
                *session = Some(Session::new(collection.clone()));
                Ok(collection)
            }
            Err(e) => {
                warn!("Remote connection failed: {}", e);
                Err(MementoError::BackendUnavailable(e))
            }
        }
    }

    async fn connect(&self) -> Result<Collection<Document>, String> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| e.to_string())?;
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);
        options.app_name = Some("memento".to_string());

        let client = Client::with_options(options).map_err(|e| e.to_string())?;
        let database = client.database(&self.database);

        let ping = async { database.run_command(doc! { "ping": 1 }).await };
        tokio::time::timeout(self.timeout, ping)
            .await
            .map_err(|_| "ping timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let collection = database.collection::<Document>(&self.collection);

        let index = IndexModel::builder()
            .keys(doc! { "document_id": 1, "type": 1, "timestamp": -1 })
            .options(
                IndexOptions::builder()
                    .name("document_type_timestamp".to_string())
                    .build(),
            )
            .build();
        collection
            .create_index(index)
            .await
            .map_err(|e| e.to_string())?;

        Ok(collection)
    }

    /// Drop the current session so the next operation reconnects
    pub async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    /// Run an operation against the collection with a timeout
    ///
    /// Any failure drops the session and surfaces as `BackendUnavailable`.
    async fn run<T, F, Fut>(&self, op: F) -> MementoResult<T>
    where
        F: FnOnce(Collection<Document>) -> Fut + Send,
        Fut: Future<Output = mongodb::error::Result<T>> + Send,
    {
        let collection = self.collection().await?;

        let outcome = match tokio::time::timeout(self.timeout, op(collection)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("operation timed out after {:?}", self.timeout),
        };

        warn!("Remote operation failed: {}", outcome);
        self.invalidate().await;
        Err(MementoError::BackendUnavailable(outcome))
    }
}

/// [`RemoteStore`] backed by a MongoDB collection
pub struct MongoRemoteStore {
    connection: Arc<RemoteConnection>,
}

impl MongoRemoteStore {
    pub fn new(connection: Arc<RemoteConnection>) -> Self {
        Self { connection }
    }

    /// Store over a fresh connection built from configuration
    pub fn from_config(config: &Config) -> MementoResult<Self> {
        Ok(Self::new(Arc::new(RemoteConnection::new(config)?)))
    }
}

fn document_key(id: DocumentId) -> i64 {
    id.value() as i64
}

fn to_bson_datetime(timestamp: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(timestamp.timestamp_millis())
}

fn generic_binary(bytes: &[u8]) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.to_vec(),
    }
}

fn content_from_document(id: DocumentId, doc: &Document) -> MementoResult<RemoteContent> {
    let malformed = |e: bson::document::ValueAccessError| {
        MementoError::RemoteRecord(format!("content record of memento {}: {}", id, e))
    };

    let blob = doc.get_binary_generic("data").map_err(malformed)?.clone();
    let digest = doc.get_str("digest").map_err(malformed)?.to_string();
    let millis = doc
        .get_datetime("timestamp")
        .map_err(malformed)?
        .timestamp_millis();
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        MementoError::RemoteRecord(format!("timestamp {} out of range", millis))
    })?;

    Ok(RemoteContent {
        document_id: id,
        blob,
        digest,
        timestamp,
    })
}

#[async_trait]
impl RemoteStore for MongoRemoteStore {
    async fn put_content(
        &self,
        id: DocumentId,
        blob: &[u8],
        timestamp: DateTime<Utc>,
    ) -> MementoResult<bool> {
        check_blob_size(blob)?;
        let digest = content_digest(blob);

        let filter = doc! {
            "document_id": document_key(id),
            "type": CONTENT_TYPE,
            "digest": &digest,
        };
        let update = doc! {
            "$max": { "timestamp": to_bson_datetime(timestamp) },
            "$setOnInsert": { "data": generic_binary(blob) },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        let result = self
            .connection
            .run(|collection| async move {
                collection
                    .update_one(filter, update)
                    .with_options(options)
                    .await
            })
            .await?;

        let inserted = result.upserted_id.is_some();
        debug!(
            "Uploaded content {} for memento {} (new record: {})",
            &digest[..12],
            id,
            inserted
        );
        Ok(inserted)
    }

    async fn get_latest_content(&self, id: DocumentId) -> MementoResult<Option<RemoteContent>> {
        let filter = doc! { "document_id": document_key(id), "type": CONTENT_TYPE };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(1)
            .build();

        let latest = self
            .connection
            .run(|collection| async move {
                let mut cursor = collection.find(filter).with_options(options).await?;
                if cursor.advance().await? {
                    Ok(Some(cursor.deserialize_current()?))
                } else {
                    Ok(None)
                }
            })
            .await?;

        latest
            .map(|doc| content_from_document(id, &doc))
            .transpose()
    }

    async fn put_key(&self, id: DocumentId, material: &KeyMaterial) -> MementoResult<()> {
        let material_doc = bson::to_document(material)
            .map_err(|e| MementoError::RemoteRecord(e.to_string()))?;

        let filter = doc! { "document_id": document_key(id), "type": KEY_TYPE };
        let update = doc! {
            "$set": {
                "material": material_doc,
                "timestamp": to_bson_datetime(Utc::now()),
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.connection
            .run(|collection| async move {
                collection
                    .update_one(filter, update)
                    .with_options(options)
                    .await
            })
            .await?;

        debug!("Uploaded key material {} for memento {}", material.key_id, id);
        Ok(())
    }

    async fn get_key(&self, id: DocumentId) -> MementoResult<Option<KeyMaterial>> {
        let filter = doc! { "document_id": document_key(id), "type": KEY_TYPE };

        let found = self
            .connection
            .run(|collection| async move { collection.find_one(filter).await })
            .await?;

        let Some(doc) = found else {
            return Ok(None);
        };

        let material_doc = doc.get_document("material").map_err(|e| {
            MementoError::RemoteRecord(format!("key record of memento {}: {}", id, e))
        })?;
        bson::from_document(material_doc.clone())
            .map(Some)
            .map_err(|e| MementoError::RemoteRecord(e.to_string()))
    }

    async fn content_count(&self, id: DocumentId) -> MementoResult<usize> {
        let filter = doc! { "document_id": document_key(id), "type": CONTENT_TYPE };
        let count = self
            .connection
            .run(|collection| async move { collection.count_documents(filter).await })
            .await?;
        Ok(count as usize)
    }

    async fn is_available(&self) -> bool {
        self.connection
            .run(|collection| async move { collection.estimated_document_count().await })
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_requires_uri() {
        let config = Config::with_data_dir("/tmp/memento-test");
        assert!(matches!(
            RemoteConnection::new(&config),
            Err(MementoError::BackendUnavailable(_))
        ));

        let mut config = Config::with_data_dir("/tmp/memento-test");
        config.remote_uri = Some("   ".to_string());
        assert!(RemoteConnection::new(&config).is_err());
    }

    #[test]
    fn test_connection_uses_config() {
        let mut config = Config::with_data_dir("/tmp/memento-test");
        config.remote_uri = Some("mongodb://localhost:27017".to_string());
        config.connect_timeout_secs = 2;

        let connection = RemoteConnection::new(&config).unwrap();
        assert_eq!(connection.database, "memento_storage");
        assert_eq!(connection.collection, "mementos");
        assert_eq!(connection.timeout, Duration::from_secs(2));
        assert_eq!(connection.session_lifetime, Duration::from_secs(3600));
    }

    async fn offline_collection() -> Collection<Document> {
        // Client construction is lazy; nothing listens on this port
        let options = ClientOptions::parse("mongodb://127.0.0.1:1").await.unwrap();
        Client::with_options(options)
            .unwrap()
            .database("memento_test")
            .collection("mementos")
    }

    fn offline_connection(timeout: Duration, session_lifetime: Duration) -> RemoteConnection {
        RemoteConnection {
            uri: "mongodb://127.0.0.1:1".to_string(),
            database: "memento_test".to_string(),
            collection: "mementos".to_string(),
            timeout,
            session_lifetime,
            session: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let session = Session::new(offline_collection().await);
        assert!(session.is_expired(Duration::ZERO));
        assert!(!session.is_expired(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_live_session_is_reused() {
        let connection = offline_connection(Duration::from_millis(50), Duration::from_secs(3600));
        *connection.session.lock().await = Some(Session::new(offline_collection().await));

        let collection = connection.collection().await.unwrap();
        assert_eq!(collection.name(), "mementos");
        assert!(connection.session.lock().await.is_some());
    }

    #[tokio::test]
    async fn test_expired_session_gets_one_bounded_reconnect() {
        let connection = offline_connection(Duration::from_millis(200), Duration::ZERO);
        *connection.session.lock().await = Some(Session::new(offline_collection().await));

        let started = Instant::now();
        let err = connection.collection().await.unwrap_err();
        assert!(matches!(err, MementoError::BackendUnavailable(_)));
        assert!(connection.session.lock().await.is_none());
        // A single attempt, bounded by the timeout
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_failed_operation_clears_session() {
        let connection = offline_connection(Duration::from_millis(50), Duration::from_secs(3600));
        *connection.session.lock().await = Some(Session::new(offline_collection().await));

        let err = connection
            .run(|_collection| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<(), mongodb::error::Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MementoError::BackendUnavailable(_)));
        assert!(connection.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_successful_operation_keeps_session() {
        let connection = offline_connection(Duration::from_millis(200), Duration::from_secs(3600));
        *connection.session.lock().await = Some(Session::new(offline_collection().await));

        let name = connection
            .run(|collection| async move { Ok(collection.name().to_string()) })
            .await
            .unwrap();
        assert_eq!(name, "mementos");
        assert!(connection.session.lock().await.is_some());
    }

    #[test]
    fn test_content_from_document() {
        let now = Utc::now();
        let doc = doc! {
            "document_id": 4_i64,
            "type": CONTENT_TYPE,
            "digest": content_digest(b"blob"),
            "timestamp": to_bson_datetime(now),
            "data": generic_binary(b"blob"),
        };

        let content = content_from_document(DocumentId(4), &doc).unwrap();
        assert_eq!(content.blob, b"blob");
        assert_eq!(content.digest, content_digest(b"blob"));
        assert_eq!(content.timestamp.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_malformed_content_record() {
        let doc = doc! { "document_id": 4_i64, "type": CONTENT_TYPE };
        assert!(matches!(
            content_from_document(DocumentId(4), &doc),
            Err(MementoError::RemoteRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let mut config = Config::with_data_dir("/tmp/memento-test");
        config.remote_uri = Some("not-a-mongodb-uri".to_string());

        let store = MongoRemoteStore::from_config(&config).unwrap();
        assert!(matches!(
            store.get_latest_content(DocumentId(0)).await,
            Err(MementoError::BackendUnavailable(_))
        ));
    }
}
