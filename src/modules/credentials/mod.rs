pub mod handlers;
pub mod issuer;
pub mod routes;

pub use issuer::{
    CertificateArtifact, CertificateSummary, CredentialIssuer, IssuedCertificate,
    PublicCertificateView,
};
pub use routes::credential_routes;
