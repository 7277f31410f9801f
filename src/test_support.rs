//! Shared fakes for unit tests.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::feed::Episode;
use crate::http::{ByteStream, HttpClient, HttpResponse};
use crate::store::BlobStore;

/// In-memory HTTP client answering from a route table; unknown URLs get a 404
#[derive(Clone, Default)]
pub struct FakeHttpClient {
    routes: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set_route(url, status, body);
        self
    }

    pub fn set_route(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.into(), (status, body.into()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        self.requests.lock().unwrap().push(url.to_string());

        let (status, data) = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, Vec::new()));
        let len = data.len() as u64;

        // Two chunks so that progress callbacks fire more than once
        let mid = data.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&data[..mid])),
            Ok(Bytes::copy_from_slice(&data[mid..])),
        ];
        let body: ByteStream = Box::pin(futures::stream::iter(chunks));

        Ok(HttpResponse {
            status,
            content_length: Some(len),
            body,
        })
    }
}

/// Blob store whose every operation fails
pub struct BrokenBlobStore;

fn broken() -> StorageError {
    StorageError::OpenFailed {
        path: PathBuf::from("/broken"),
        source: std::io::Error::other("store unavailable"),
    }
}

#[async_trait]
impl BlobStore for BrokenBlobStore {
    async fn put(&self, _id: &str, _data: Bytes) -> Result<(), StorageError> {
        Err(broken())
    }

    async fn get(&self, _id: &str) -> Result<Option<Bytes>, StorageError> {
        Err(broken())
    }

    async fn delete(&self, _id: &str) -> Result<(), StorageError> {
        Err(broken())
    }

    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Err(broken())
    }
}

pub fn make_episode(id: &str, title: &str, audio_url: &str) -> Episode {
    Episode {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        pub_date_raw: String::new(),
        published_at: None,
        audio_url: audio_url.to_string(),
        image_url: None,
    }
}

/// `count` episodes with ids `ep-0..` and audio under example.com
pub fn make_episodes(count: usize) -> Vec<Episode> {
    (0..count)
        .map(|i| {
            make_episode(
                &format!("ep-{i}"),
                &format!("Story {i}"),
                &format!("https://example.com/ep{i}.mp3"),
            )
        })
        .collect()
}
