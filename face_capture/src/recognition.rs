use crate::config::{CredentialsConfig, RecognitionServiceConfig};
use crate::cv_utils::EncodedFrame;
use face_proto::{
    face_match_service_client::FaceMatchServiceClient, CreateCollectionRequest, FaceMatch,
    IndexFacesRequest, SearchFacesByImageRequest,
};
use std::path::Path;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tonic::{
    async_trait,
    metadata::{Ascii, MetadataValue},
    transport::{Channel, Endpoint},
    Code, Request, Status,
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Failed to connect to gRPC server: {0}")]
    ConnectionFailed(#[from] tonic::transport::Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("gRPC request failed: {0}")]
    GrpcRequestFailed(#[from] Status),
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("No face was indexed for `{0}`")]
    NoFaceIndexed(String),
}

/// The reference person enrolled into the collection at startup.
#[derive(Debug, Clone)]
pub struct Identity {
    pub external_id: String,
    pub reference_image: Vec<u8>,
}

impl Identity {
    pub fn new(external_id: impl Into<String>, reference_image: Vec<u8>) -> Self {
        Self {
            external_id: external_id.into(),
            reference_image,
        }
    }

    pub fn from_file(external_id: &str, path: &Path) -> std::io::Result<Self> {
        let reference_image = std::fs::read(path)?;
        Ok(Self::new(external_id, reference_image))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionStatus {
    Created { arn: String },
    AlreadyExists,
}

/// Best candidate returned by a search, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub found: bool,
    pub external_id: Option<String>,
    pub similarity: Option<f32>,
}

impl MatchResult {
    pub fn found(external_id: impl Into<String>, similarity: f32) -> Self {
        Self {
            found: true,
            external_id: Some(external_id.into()),
            similarity: Some(similarity),
        }
    }

    pub fn none() -> Self {
        Self {
            found: false,
            external_id: None,
            similarity: None,
        }
    }
}

#[async_trait]
pub trait RecognitionClient: Send + Sync {
    /// Creates the collection, reporting `AlreadyExists` instead of failing
    /// when it is already there.
    async fn ensure_collection(
        &self,
        collection_id: &str,
    ) -> Result<CollectionStatus, RecognitionError>;

    /// Indexes the identity's reference image and returns the new face ids.
    async fn enroll(
        &self,
        collection_id: &str,
        identity: &Identity,
    ) -> Result<Vec<String>, RecognitionError>;

    async fn search(
        &self,
        collection_id: &str,
        frame: EncodedFrame,
        threshold: f32,
        max_results: u32,
    ) -> Result<MatchResult, RecognitionError>;
}

#[derive(Debug, Clone)]
struct RequestMetadata {
    region: MetadataValue<Ascii>,
    access_key_id: MetadataValue<Ascii>,
    authorization: MetadataValue<Ascii>,
}

impl RequestMetadata {
    fn new(region: &str, credentials: &CredentialsConfig) -> Result<Self, RecognitionError> {
        let access_key_id = credentials
            .access_key_id
            .as_deref()
            .ok_or_else(|| RecognitionError::InvalidCredentials("missing access key id".into()))?;
        let secret = credentials.secret_access_key.as_deref().ok_or_else(|| {
            RecognitionError::InvalidCredentials("missing secret access key".into())
        })?;

        let parse = |field: &str, value: String| {
            value.parse::<MetadataValue<Ascii>>().map_err(|_| {
                RecognitionError::InvalidCredentials(format!("{} is not valid ASCII", field))
            })
        };

        Ok(Self {
            region: parse("region", region.to_string())?,
            access_key_id: parse("access key id", access_key_id.to_string())?,
            authorization: parse("secret access key", format!("Bearer {}", secret))?,
        })
    }

    fn apply<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        let metadata = request.metadata_mut();
        metadata.insert("x-region", self.region.clone());
        metadata.insert("x-access-key-id", self.access_key_id.clone());
        metadata.insert("authorization", self.authorization.clone());
        request
    }
}

#[derive(Clone)]
pub struct GrpcRecognitionClient {
    client: FaceMatchServiceClient<Channel>,
    metadata: RequestMetadata,
    search_timeout: Duration,
}

impl GrpcRecognitionClient {
    pub async fn connect(
        service_config: &RecognitionServiceConfig,
        region: &str,
        credentials: &CredentialsConfig,
    ) -> Result<Self, RecognitionError> {
        let metadata = RequestMetadata::new(region, credentials)?;
        let channel = Self::get_channel(service_config).await?;
        tracing::info!(
            address = %service_config.get_address(),
            region,
            "Connected to face matching service"
        );

        Ok(Self {
            client: FaceMatchServiceClient::new(channel),
            metadata,
            search_timeout: Duration::from_millis(service_config.search_timeout_ms),
        })
    }

    async fn get_channel(
        service_config: &RecognitionServiceConfig,
    ) -> Result<Channel, RecognitionError> {
        let connect_timeout = Duration::from_millis(service_config.connect_timeout_ms);
        let endpoint =
            Endpoint::from_shared(service_config.get_address())?.connect_timeout(connect_timeout);

        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = service_config.connect_retries;
        let mut retry_count = 0;

        while retry_count < max_retries {
            match timeout(connect_timeout, endpoint.connect()).await {
                Ok(Ok(channel)) => return Ok(channel),
                Ok(Err(e)) => {
                    tracing::error!("Failed to connect to gRPC server: {:?}", e);
                }
                Err(_) => {
                    tracing::error!("Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(RecognitionError::MaxRetriesExceeded)
    }
}

#[async_trait]
impl RecognitionClient for GrpcRecognitionClient {
    async fn ensure_collection(
        &self,
        collection_id: &str,
    ) -> Result<CollectionStatus, RecognitionError> {
        let request = self.metadata.apply(CreateCollectionRequest {
            collection_id: collection_id.to_string(),
        });

        let mut client = self.client.clone();
        match client.create_collection(request).await {
            Ok(response) => Ok(CollectionStatus::Created {
                arn: response.into_inner().collection_arn,
            }),
            Err(status) if status.code() == Code::AlreadyExists => {
                Ok(CollectionStatus::AlreadyExists)
            }
            Err(status) => Err(status.into()),
        }
    }

    async fn enroll(
        &self,
        collection_id: &str,
        identity: &Identity,
    ) -> Result<Vec<String>, RecognitionError> {
        let request = self.metadata.apply(IndexFacesRequest {
            collection_id: collection_id.to_string(),
            image: identity.reference_image.clone(),
            external_image_id: identity.external_id.clone(),
        });

        let mut client = self.client.clone();
        let records = client.index_faces(request).await?.into_inner().face_records;
        if records.is_empty() {
            return Err(RecognitionError::NoFaceIndexed(identity.external_id.clone()));
        }

        Ok(records.into_iter().map(|record| record.face_id).collect())
    }

    #[instrument(skip(self, frame), fields(bytes = frame.bytes.len()))]
    async fn search(
        &self,
        collection_id: &str,
        frame: EncodedFrame,
        threshold: f32,
        max_results: u32,
    ) -> Result<MatchResult, RecognitionError> {
        let request = self.metadata.apply(SearchFacesByImageRequest {
            collection_id: collection_id.to_string(),
            image: frame.bytes,
            face_match_threshold: threshold,
            max_faces: max_results,
        });

        let mut client = self.client.clone();
        let response = timeout(self.search_timeout, client.search_faces_by_image(request))
            .await
            .map_err(|_| RecognitionError::Timeout(self.search_timeout.as_millis() as u64))??;

        // Matches arrive sorted by similarity, so the first one is the best.
        let best = response.into_inner().face_matches.into_iter().next();
        match best {
            None => Ok(MatchResult::none()),
            Some(FaceMatch {
                similarity,
                face: Some(face),
            }) => Ok(MatchResult::found(face.external_image_id, similarity)),
            Some(FaceMatch { face: None, .. }) => {
                Err(Status::internal("face match returned without a face record").into())
            }
        }
    }
}
