use std::sync::Arc;

use rustls::RootCertStore;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use tracing::warn;

use crate::error::BuildError;
use crate::trust::{CertificatePinning, PinnedServerVerifier, TrustValidator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    RustlsAwsLcRs,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "rustls-ring",
            Self::RustlsAwsLcRs => "rustls-aws-lc-rs",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TlsRootStore {
    #[default]
    WebPki,
    System,
    Specific,
}

#[derive(Clone, Debug)]
pub(crate) enum TlsRootCertificate {
    Pem(Vec<u8>),
    Der(Vec<u8>),
}

#[derive(Clone, Debug, Default)]
pub(crate) struct TlsOptions {
    pub(crate) root_store: TlsRootStore,
    pub(crate) root_certificates: Vec<TlsRootCertificate>,
    pub(crate) pinned_certificates: Vec<Vec<u8>>,
    pub(crate) trust_validator: Option<Arc<dyn TrustValidator>>,
}

pub(crate) const fn default_tls_backend() -> TlsBackend {
    #[cfg(feature = "tls-rustls-ring")]
    {
        return TlsBackend::RustlsRing;
    }
    #[cfg(all(
        not(feature = "tls-rustls-ring"),
        feature = "tls-rustls-aws-lc-rs"
    ))]
    {
        return TlsBackend::RustlsAwsLcRs;
    }
    #[allow(unreachable_code)]
    TlsBackend::RustlsRing
}

pub(crate) fn tls_config_error(backend: TlsBackend, message: impl Into<String>) -> BuildError {
    BuildError::TlsConfig {
        backend: backend.as_str(),
        message: message.into(),
    }
}

#[cfg(feature = "tls-rustls-ring")]
fn ring_provider() -> Result<CryptoProvider, BuildError> {
    Ok(rustls::crypto::ring::default_provider())
}

#[cfg(not(feature = "tls-rustls-ring"))]
fn ring_provider() -> Result<CryptoProvider, BuildError> {
    Err(BuildError::TlsBackendUnavailable {
        backend: TlsBackend::RustlsRing.as_str(),
    })
}

#[cfg(feature = "tls-rustls-aws-lc-rs")]
fn aws_lc_rs_provider() -> Result<CryptoProvider, BuildError> {
    Ok(rustls::crypto::aws_lc_rs::default_provider())
}

#[cfg(not(feature = "tls-rustls-aws-lc-rs"))]
fn aws_lc_rs_provider() -> Result<CryptoProvider, BuildError> {
    Err(BuildError::TlsBackendUnavailable {
        backend: TlsBackend::RustlsAwsLcRs.as_str(),
    })
}

fn crypto_provider(tls_backend: TlsBackend) -> Result<Arc<CryptoProvider>, BuildError> {
    let provider = match tls_backend {
        TlsBackend::RustlsRing => ring_provider()?,
        TlsBackend::RustlsAwsLcRs => aws_lc_rs_provider()?,
    };
    Ok(Arc::new(provider))
}

impl TlsRootCertificate {
    /// A PEM bundle may carry several certificates; DER is always one.
    fn decode(
        &self,
        tls_backend: TlsBackend,
    ) -> Result<Vec<CertificateDer<'static>>, BuildError> {
        match self {
            Self::Der(der) => Ok(vec![CertificateDer::from(der.clone())]),
            Self::Pem(pem) => {
                let certificates = CertificateDer::pem_slice_iter(pem)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| {
                        tls_config_error(tls_backend, format!("invalid PEM root CA: {source}"))
                    })?;
                if certificates.is_empty() {
                    return Err(tls_config_error(
                        tls_backend,
                        "PEM root CA holds no CERTIFICATE block",
                    ));
                }
                Ok(certificates)
            }
        }
    }
}

fn build_root_store(
    tls_backend: TlsBackend,
    tls_options: &TlsOptions,
) -> Result<RootCertStore, BuildError> {
    let custom_roots = &tls_options.root_certificates;
    match (tls_options.root_store, custom_roots.is_empty()) {
        (TlsRootStore::Specific, true) => Err(tls_config_error(
            tls_backend,
            "tls_root_store(TlsRootStore::Specific) requires at least one root CA",
        )),
        (TlsRootStore::WebPki | TlsRootStore::System, false) => Err(tls_config_error(
            tls_backend,
            "custom root CAs require tls_root_store(TlsRootStore::Specific)",
        )),
        (TlsRootStore::WebPki, true) => Ok(RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        )),
        (TlsRootStore::System, true) => system_root_store(tls_backend),
        (TlsRootStore::Specific, false) => {
            let mut root_store = RootCertStore::empty();
            for root in custom_roots {
                for certificate in root.decode(tls_backend)? {
                    root_store.add(certificate).map_err(|source| {
                        tls_config_error(tls_backend, format!("unusable root CA: {source}"))
                    })?;
                }
            }
            Ok(root_store)
        }
    }
}

fn system_root_store(tls_backend: TlsBackend) -> Result<RootCertStore, BuildError> {
    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        warn!(
            backend = tls_backend.as_str(),
            error_count = loaded.errors.len(),
            "some system root certificates failed to load"
        );
    }
    let mut root_store = RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(loaded.certs);
    if added == 0 {
        return Err(tls_config_error(tls_backend, "no usable system root certificates"));
    }
    Ok(root_store)
}

/// Builds the client tls config. When pins or a custom validator are
/// configured, chain trust is decided by the [`TrustValidator`] instead of
/// plain root-store verification.
pub(crate) fn build_rustls_tls_config(
    tls_backend: TlsBackend,
    tls_options: &TlsOptions,
) -> Result<rustls::ClientConfig, BuildError> {
    let provider = crypto_provider(tls_backend)?;
    let root_store = build_root_store(tls_backend, tls_options)?;

    let validator: Option<Arc<dyn TrustValidator>> = match &tls_options.trust_validator {
        Some(validator) => Some(Arc::clone(validator)),
        None if !tls_options.pinned_certificates.is_empty() => {
            let chain_verifier = WebPkiServerVerifier::builder_with_provider(
                Arc::new(root_store.clone()),
                Arc::clone(&provider),
            )
            .build()
            .map_err(|source| {
                tls_config_error(
                    tls_backend,
                    format!("failed to build certificate verifier: {source}"),
                )
            })?;
            Some(Arc::new(CertificatePinning::new(
                chain_verifier,
                tls_options.pinned_certificates.iter().cloned(),
            )))
        }
        None => None,
    };

    let algorithms = provider.signature_verification_algorithms;
    let config_builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|source| BuildError::TlsBackendInit {
            backend: tls_backend.as_str(),
            message: source.to_string(),
        })?;

    let config = match validator {
        Some(validator) => config_builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedServerVerifier::new(
                validator, algorithms,
            )))
            .with_no_client_auth(),
        None => config_builder
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    };
    Ok(config)
}
