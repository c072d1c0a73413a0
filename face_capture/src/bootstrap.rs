use crate::config::{CollectionConfig, IdentityConfig};
use crate::recognition::{CollectionStatus, Identity, RecognitionClient, RecognitionError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Failed to create or verify collection `{0}`: {1}")]
    Collection(String, RecognitionError),
    #[error("Failed to read reference image {0:?}: {1}")]
    ReferenceImage(PathBuf, std::io::Error),
    #[error("Failed to enroll `{0}`: {1}")]
    Enroll(String, RecognitionError),
}

/// Handle to a collection that exists and holds the reference identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub id: String,
}

/// One-shot setup run before the recognition loop starts.
pub struct CollectionBootstrapper<'a, R: RecognitionClient> {
    client: &'a R,
    collection: &'a CollectionConfig,
    identity: &'a IdentityConfig,
}

impl<'a, R: RecognitionClient> CollectionBootstrapper<'a, R> {
    pub fn new(
        client: &'a R,
        collection: &'a CollectionConfig,
        identity: &'a IdentityConfig,
    ) -> Self {
        Self {
            client,
            collection,
            identity,
        }
    }

    pub async fn run(self) -> Result<Collection, BootstrapError> {
        let collection_id = self.collection.id.as_str();

        match self.client.ensure_collection(collection_id).await {
            Ok(CollectionStatus::Created { arn }) => {
                tracing::info!(collection_id, arn = %arn, "Created collection");
            }
            Ok(CollectionStatus::AlreadyExists) => {
                tracing::info!(collection_id, "Collection already exists. Proceeding.");
            }
            Err(e) => {
                tracing::error!(collection_id, "Error creating or verifying collection: {}", e);
                return Err(BootstrapError::Collection(collection_id.to_string(), e));
            }
        }

        let path = &self.identity.reference_image;
        let identity = Identity::from_file(&self.identity.external_id, path).map_err(|e| {
            tracing::error!("Reference image {:?} could not be read: {}", path, e);
            BootstrapError::ReferenceImage(path.clone(), e)
        })?;

        let face_ids = self
            .client
            .enroll(collection_id, &identity)
            .await
            .map_err(|e| {
                tracing::error!(external_id = %identity.external_id, "Error indexing face: {}", e);
                BootstrapError::Enroll(identity.external_id.clone(), e)
            })?;

        for face_id in &face_ids {
            tracing::debug!(face_id = %face_id, external_id = %identity.external_id, "Indexed face");
        }
        tracing::info!(
            external_id = %identity.external_id,
            image = ?path,
            faces = face_ids.len(),
            "Enrolled reference identity"
        );

        Ok(Collection {
            id: collection_id.to_string(),
        })
    }
}
