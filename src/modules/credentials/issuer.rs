use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{Certificate, Changes, Entity, Filter, ListQuery, Sort, Store, Track, User};
use crate::error::{AppError, AppResult};
use crate::modules::aggregation::batch::{bounded, retry_once};
use crate::modules::aggregation::{AggregationService, BatchLoader};

pub const UNKNOWN_USER: &str = "Unknown user";
pub const UNKNOWN_TRACK: &str = "Unknown track";

/// What the public verification page is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicCertificateView {
    pub id: Uuid,
    pub user_full_name: String,
    pub track_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    pub valid: bool,
}

/// Input for the PDF/QR renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateArtifact {
    pub id: Uuid,
    pub user_name: String,
    pub track_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    pub verification_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateSummary {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub track_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    /// `false` when the pair already held a certificate.
    pub newly_issued: bool,
}

pub struct CredentialIssuer {
    certificates: Arc<dyn Store<Certificate>>,
    users: Arc<dyn Store<User>>,
    tracks: Arc<dyn Store<Track>>,
    aggregation: Arc<AggregationService>,
    clock: Arc<dyn Clock>,
    public_host: String,
    read_timeout: Duration,
}

impl CredentialIssuer {
    pub fn new(
        certificates: Arc<dyn Store<Certificate>>,
        users: Arc<dyn Store<User>>,
        tracks: Arc<dyn Store<Track>>,
        aggregation: Arc<AggregationService>,
        clock: Arc<dyn Clock>,
        public_host: impl Into<String>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            certificates,
            users,
            tracks,
            aggregation,
            clock,
            public_host: public_host.into(),
            read_timeout,
        }
    }

    pub fn verification_url(&self, certificate_id: Uuid) -> String {
        format!("https://{}/verify/{}", self.public_host, certificate_id)
    }

    /// Idempotent: an existing certificate for the pair is returned as is.
    /// The insert itself is guarded by the (user, track) unique key, so two
    /// concurrent calls still end with a single row.
    pub async fn issue_certificate(&self, user_id: Uuid, track_id: Uuid) -> AppResult<IssuedCertificate> {
        if let Some(existing) = self
            .certificates
            .find_one(&Certificate::key(user_id, track_id))
            .await?
        {
            debug!(%user_id, %track_id, certificate_id = %existing.id, "certificate already issued");
            return Ok(IssuedCertificate {
                certificate: existing,
                newly_issued: false,
            });
        }

        let created = self
            .certificates
            .create_unique(Certificate::new(user_id, track_id, self.clock.now()))
            .await?;
        if created.inserted {
            info!(%user_id, %track_id, certificate_id = %created.entity.id, "certificate issued");
        }

        Ok(IssuedCertificate {
            certificate: created.entity,
            newly_issued: created.inserted,
        })
    }

    /// Issues only when every video of the track is completed.
    pub async fn claim_certificate(&self, user_id: Uuid, track_id: Uuid) -> AppResult<IssuedCertificate> {
        if !self.aggregation.is_track_complete(user_id, track_id).await? {
            return Err(AppError::InvalidState(format!(
                "track {} is not completed by user {}",
                track_id, user_id
            )));
        }
        self.issue_certificate(user_id, track_id).await
    }

    async fn certificate(&self, certificate_id: Uuid) -> AppResult<Certificate> {
        bounded(
            self.read_timeout,
            retry_once(|| self.certificates.get_by_id(certificate_id)),
        )
        .await
        .map_err(AppError::from_lookup("certificate", certificate_id))
    }

    async fn display_name<E, F>(&self, store: &Arc<dyn Store<E>>, id: Uuid, label: F, placeholder: &str) -> String
    where
        E: Entity,
        F: FnOnce(&E) -> String,
    {
        BatchLoader::new(store.clone(), self.read_timeout)
            .load_or_empty([id])
            .await
            .get(&id)
            .map(label)
            .unwrap_or_else(|| placeholder.to_string())
    }

    async fn names(&self, certificate: &Certificate) -> (String, String) {
        futures_util::join!(
            self.display_name(&self.users, certificate.user_id, |u: &User| u.full_name.clone(), UNKNOWN_USER),
            self.display_name(&self.tracks, certificate.track_id, |t: &Track| t.name.clone(), UNKNOWN_TRACK),
        )
    }

    /// Public lookup. Missing or unreadable user/track rows resolve to
    /// placeholder labels; only a missing certificate is an error.
    pub async fn verify_certificate(&self, certificate_id: Uuid) -> AppResult<PublicCertificateView> {
        let certificate = self.certificate(certificate_id).await?;
        let (user_full_name, track_name) = self.names(&certificate).await;

        Ok(PublicCertificateView {
            id: certificate.id,
            user_full_name,
            track_name,
            issue_date: certificate.issue_date,
            valid: true,
        })
    }

    pub async fn certificate_artifact(&self, certificate_id: Uuid) -> AppResult<CertificateArtifact> {
        let certificate = self.certificate(certificate_id).await?;
        let (user_name, track_name) = self.names(&certificate).await;

        Ok(CertificateArtifact {
            id: certificate.id,
            user_name,
            track_name,
            issue_date: certificate.issue_date,
            verification_url: self.verification_url(certificate.id),
        })
    }

    /// Hard delete.
    pub async fn revoke_certificate(&self, certificate_id: Uuid) -> AppResult<()> {
        if !self.certificates.delete(certificate_id).await? {
            return Err(AppError::not_found("certificate", certificate_id));
        }
        info!(%certificate_id, "certificate revoked");
        Ok(())
    }

    /// Marks the certificate as downloaded; the first download date sticks.
    pub async fn record_download(&self, certificate_id: Uuid) -> AppResult<Certificate> {
        let changes = Changes::new()
            .set("downloaded", true)
            .set_once("download_date", self.clock.now());
        self.certificates
            .update(certificate_id, &changes)
            .await
            .map_err(AppError::from_lookup("certificate", certificate_id))
    }

    pub async fn certificates_for_user(&self, user_id: Uuid) -> AppResult<Vec<CertificateSummary>> {
        let query = ListQuery::filtered(Filter::new().eq("user_id", user_id))
            .sorted(Sort::desc("issue_date"));
        let certificates = bounded(
            self.read_timeout,
            retry_once(|| self.certificates.list(&query)),
        )
        .await?
        .rows;

        let tracks = BatchLoader::new(self.tracks.clone(), self.read_timeout)
            .load_or_empty(certificates.iter().map(|c| c.track_id))
            .await;

        Ok(certificates
            .into_iter()
            .map(|certificate| CertificateSummary {
                track_name: tracks
                    .get(&certificate.track_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| UNKNOWN_TRACK.to_string()),
                certificate,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MemoryStore, NewTrack, NewUser, Progress, ProgressStatus, Stores};

    struct Fixture {
        issuer: CredentialIssuer,
        stores: Stores,
        certificates: Arc<MemoryStore<Certificate>>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let certificates = Arc::new(MemoryStore::<Certificate>::new());
        let mut stores = Stores::in_memory();
        stores.certificates = certificates.clone();
        let clock = Arc::new(ManualClock::default());
        let aggregation = Arc::new(AggregationService::new(
            stores.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let issuer = CredentialIssuer::new(
            stores.certificates.clone(),
            stores.users.clone(),
            stores.tracks.clone(),
            aggregation,
            clock.clone(),
            "learn.example.com",
            Duration::from_secs(1),
        );
        Fixture {
            issuer,
            stores,
            certificates,
            clock,
        }
    }

    impl Fixture {
        async fn learner_and_track(&self) -> (User, Track) {
            let user = self
                .stores
                .users
                .create(User::new(NewUser {
                    full_name: "Ada Kaya".to_string(),
                    email: "ada@example.com".to_string(),
                    department_id: None,
                }))
                .await
                .unwrap();
            let track = self
                .stores
                .tracks
                .create(Track::new(
                    NewTrack {
                        name: "Fire safety".to_string(),
                        description: None,
                    },
                    self.clock.now(),
                ))
                .await
                .unwrap();
            (user, track)
        }
    }

    #[tokio::test]
    async fn issuing_twice_keeps_one_row() {
        let f = fixture();
        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());

        let first = f.issuer.issue_certificate(user, track).await.unwrap();
        let second = f.issuer.issue_certificate(user, track).await.unwrap();

        assert!(first.newly_issued);
        assert!(!second.newly_issued);
        assert_eq!(first.certificate, second.certificate);
        assert_eq!(f.certificates.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_issuance_keeps_one_row() {
        let f = fixture();
        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, b) = tokio::join!(
            f.issuer.issue_certificate(user, track),
            f.issuer.issue_certificate(user, track)
        );

        assert_eq!(a.unwrap().certificate.id, b.unwrap().certificate.id);
        assert_eq!(f.certificates.len().await, 1);
    }

    #[tokio::test]
    async fn claim_requires_a_completed_track() {
        let f = fixture();
        let (user, track) = f.learner_and_track().await;

        let err = f.issuer.claim_certificate(user.id, track.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(f.certificates.is_empty().await);
    }

    #[tokio::test]
    async fn claim_issues_once_every_video_is_done() {
        let f = fixture();
        let (user, track) = f.learner_and_track().await;
        let video = f
            .stores
            .videos
            .create(crate::db::Video::new(
                crate::db::NewVideo {
                    track_id: track.id,
                    title: "Extinguishers".to_string(),
                    duration_seconds: 300,
                },
                0,
                f.clock.now(),
            ))
            .await
            .unwrap();
        f.stores
            .tracks
            .update(track.id, &Changes::new().set("video_ids", vec![video.id]))
            .await
            .unwrap();
        let mut done = Progress::new(user.id, video.id, f.clock.now());
        done.status = ProgressStatus::Completed;
        f.stores.progress.create(done).await.unwrap();

        let issued = f.issuer.claim_certificate(user.id, track.id).await.unwrap();
        assert!(issued.newly_issued);
    }

    #[tokio::test]
    async fn verify_resolves_names() {
        let f = fixture();
        let (user, track) = f.learner_and_track().await;
        let issued = f.issuer.issue_certificate(user.id, track.id).await.unwrap();

        let view = f.issuer.verify_certificate(issued.certificate.id).await.unwrap();
        assert!(view.valid);
        assert_eq!(view.user_full_name, "Ada Kaya");
        assert_eq!(view.track_name, "Fire safety");
    }

    #[tokio::test]
    async fn verify_uses_placeholders_for_missing_references() {
        let f = fixture();
        let issued = f
            .issuer
            .issue_certificate(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let view = f.issuer.verify_certificate(issued.certificate.id).await.unwrap();
        assert_eq!(view.user_full_name, UNKNOWN_USER);
        assert_eq!(view.track_name, UNKNOWN_TRACK);
    }

    #[tokio::test]
    async fn verify_distinguishes_missing_from_unavailable() {
        let f = fixture();
        let missing = f.issuer.verify_certificate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));

        let issued = f
            .issuer
            .issue_certificate(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        f.certificates.fail_next_reads(2);
        let down = f
            .issuer
            .verify_certificate(issued.certificate.id)
            .await
            .unwrap_err();
        assert!(down.is_retryable());

        f.certificates.fail_next_reads(1);
        assert!(f.issuer.verify_certificate(issued.certificate.id).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_is_a_hard_delete() {
        let f = fixture();
        let issued = f
            .issuer
            .issue_certificate(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        f.issuer.revoke_certificate(issued.certificate.id).await.unwrap();
        assert!(f.certificates.is_empty().await);
        let again = f.issuer.revoke_certificate(issued.certificate.id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn artifact_carries_the_verification_url() {
        let f = fixture();
        let (user, track) = f.learner_and_track().await;
        let issued = f.issuer.issue_certificate(user.id, track.id).await.unwrap();

        let artifact = f.issuer.certificate_artifact(issued.certificate.id).await.unwrap();
        assert_eq!(
            artifact.verification_url,
            format!("https://learn.example.com/verify/{}", issued.certificate.id)
        );
        assert_eq!(artifact.user_name, "Ada Kaya");
    }

    #[tokio::test]
    async fn first_download_date_sticks() {
        let f = fixture();
        let issued = f
            .issuer
            .issue_certificate(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let first = f.issuer.record_download(issued.certificate.id).await.unwrap();
        f.clock.advance(time::Duration::days(1));
        let second = f.issuer.record_download(issued.certificate.id).await.unwrap();

        assert!(second.downloaded);
        assert_eq!(first.download_date, second.download_date);
    }

    #[tokio::test]
    async fn lists_user_certificates_with_track_names() {
        let f = fixture();
        let (user, track) = f.learner_and_track().await;
        f.issuer.issue_certificate(user.id, track.id).await.unwrap();
        f.issuer.issue_certificate(user.id, Uuid::new_v4()).await.unwrap();

        let list = f.issuer.certificates_for_user(user.id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|c| c.track_name == "Fire safety"));
        assert!(list.iter().any(|c| c.track_name == UNKNOWN_TRACK));
    }
}
