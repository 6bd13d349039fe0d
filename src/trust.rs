use std::collections::BTreeSet;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use tracing::warn;

/// Certificate chain presented by a server during the handshake.
#[derive(Debug)]
pub struct CertificateChain<'a> {
    pub end_entity: &'a CertificateDer<'a>,
    pub intermediates: &'a [CertificateDer<'a>],
    pub server_name: &'a ServerName<'a>,
    pub ocsp_response: &'a [u8],
    pub now: UnixTime,
}

impl CertificateChain<'_> {
    /// End-entity certificate first, then intermediates in presentation order.
    pub fn certificates(&self) -> impl Iterator<Item = &CertificateDer<'_>> {
        std::iter::once(self.end_entity).chain(self.intermediates.iter())
    }
}

/// Decides whether a server's certificate chain is trusted.
///
/// Runs inside the TLS handshake; a `false` aborts it and the attempt fails
/// with a tls transport error. Must not perform I/O.
pub trait TrustValidator: Send + Sync + std::fmt::Debug {
    fn validate(&self, chain: &CertificateChain<'_>) -> bool;
}

/// Standard chain evaluation followed by a pin check: at least one
/// certificate of the chain, in DER form, must be in the pinned set.
#[derive(Debug)]
pub struct CertificatePinning {
    chain_verifier: Arc<dyn ServerCertVerifier>,
    pinned: BTreeSet<Vec<u8>>,
}

impl CertificatePinning {
    pub fn new<I, C>(chain_verifier: Arc<dyn ServerCertVerifier>, pinned: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chain_verifier,
            pinned: pinned.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_pinned(&self, certificate_der: &[u8]) -> bool {
        self.pinned.contains(certificate_der)
    }
}

impl TrustValidator for CertificatePinning {
    fn validate(&self, chain: &CertificateChain<'_>) -> bool {
        if let Err(error) = self.chain_verifier.verify_server_cert(
            chain.end_entity,
            chain.intermediates,
            chain.server_name,
            chain.ocsp_response,
            chain.now,
        ) {
            warn!(server = ?chain.server_name, error = %error, "certificate chain rejected");
            return false;
        }

        let matched = chain
            .certificates()
            .any(|certificate| self.is_pinned(certificate.as_ref()));
        if !matched {
            warn!(server = ?chain.server_name, "no pinned certificate in chain");
        }
        matched
    }
}

/// Adapts a [`TrustValidator`] to rustls. Handshake signatures are still
/// checked with the crypto provider's algorithms.
#[derive(Debug)]
pub(crate) struct PinnedServerVerifier {
    validator: Arc<dyn TrustValidator>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedServerVerifier {
    pub(crate) fn new(
        validator: Arc<dyn TrustValidator>,
        algorithms: WebPkiSupportedAlgorithms,
    ) -> Self {
        Self {
            validator,
            algorithms,
        }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = CertificateChain {
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        };
        if self.validator.validate(&chain) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    use super::{CertificateChain, CertificatePinning, TrustValidator};

    #[derive(Debug)]
    struct FixedChainVerifier {
        accept: bool,
    }

    impl ServerCertVerifier for FixedChainVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            if self.accept {
                Ok(ServerCertVerified::assertion())
            } else {
                Err(rustls::Error::General("untrusted chain".to_owned()))
            }
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Err(rustls::Error::General("not used in tests".to_owned()))
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Err(rustls::Error::General("not used in tests".to_owned()))
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            Vec::new()
        }
    }

    fn validate_with(accept: bool, pins: Vec<Vec<u8>>, leaf: &[u8], intermediate: &[u8]) -> bool {
        let pinning = CertificatePinning::new(Arc::new(FixedChainVerifier { accept }), pins);
        let end_entity = CertificateDer::from(leaf.to_vec());
        let intermediates = vec![CertificateDer::from(intermediate.to_vec())];
        let server_name = ServerName::try_from("api.example.com").expect("valid dns name");
        let chain = CertificateChain {
            end_entity: &end_entity,
            intermediates: &intermediates,
            server_name: &server_name,
            ocsp_response: &[],
            now: UnixTime::now(),
        };
        pinning.validate(&chain)
    }

    #[test]
    fn accepts_valid_chain_with_pinned_leaf() {
        assert!(validate_with(
            true,
            vec![b"leaf-der".to_vec()],
            b"leaf-der",
            b"intermediate-der"
        ));
    }

    #[test]
    fn accepts_valid_chain_with_pinned_intermediate() {
        assert!(validate_with(
            true,
            vec![b"intermediate-der".to_vec()],
            b"leaf-der",
            b"intermediate-der"
        ));
    }

    #[test]
    fn rejects_valid_chain_without_pinned_certificate() {
        assert!(!validate_with(
            true,
            vec![b"someone-else".to_vec()],
            b"leaf-der",
            b"intermediate-der"
        ));
    }

    #[test]
    fn rejects_pinned_certificate_when_chain_evaluation_fails() {
        assert!(!validate_with(
            false,
            vec![b"leaf-der".to_vec()],
            b"leaf-der",
            b"intermediate-der"
        ));
    }

    #[test]
    fn pin_lookup_is_exact_bytes() {
        let pinning = CertificatePinning::new(
            Arc::new(FixedChainVerifier { accept: true }),
            [b"abc".to_vec()],
        );
        assert_eq!(pinning.pinned_count(), 1);
        assert!(pinning.is_pinned(b"abc"));
        assert!(!pinning.is_pinned(b"abcd"));
    }
}
