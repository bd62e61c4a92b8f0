#![forbid(unsafe_code)]

//! Outbound HTTP for the proxy.
//!
//! The [`Fetcher`] trait is the seam between the link-rewriting core and the
//! network. [`UreqFetcher`] is the production implementation; tests plug in
//! canned responses instead.

use std::{io::Read, sync::Arc, time::Duration};

use rustls::{
    ClientConfig, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{WebPkiSupportedAlgorithms, ring},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FetchError;

/// Default upper bound for a single proxied page body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Accept self-signed or otherwise unverifiable upstream certificates.
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).fetch(request)
    }
}

/// Blocking fetcher backed by two `ureq` agents, one of which skips
/// certificate verification.
pub struct UreqFetcher {
    verified: ureq::Agent,
    insecure: ureq::Agent,
    max_body_bytes: u64,
}

impl UreqFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let verified = ureq::AgentBuilder::new().timeout(timeout).build();
        let insecure = ureq::AgentBuilder::new()
            .timeout(timeout)
            .tls_config(Arc::new(insecure_tls_config()?))
            .build();
        Ok(Self {
            verified,
            insecure,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    /// Bodies longer than `limit` bytes are cut off with a warning.
    pub fn with_body_limit(mut self, limit: u64) -> Self {
        self.max_body_bytes = limit;
        self
    }

    fn agent(&self, skip_tls_verify: bool) -> &ureq::Agent {
        if skip_tls_verify {
            &self.insecure
        } else {
            &self.verified
        }
    }
}

impl Fetcher for UreqFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut call = self.agent(request.skip_tls_verify).get(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        // Error statuses still carry a page worth showing.
        let response = match call.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                debug!(url = %request.url, status, "upstream returned an error status");
                response
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(FetchError::transport(&request.url, err));
            }
        };

        let status = response.status();
        let headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();

        let content_type = response.header("content-type").map(str::to_owned);
        let mut raw = Vec::new();
        response
            .into_reader()
            .take(self.max_body_bytes.saturating_add(1))
            .read_to_end(&mut raw)
            .map_err(|source| FetchError::Body {
                url: request.url.clone(),
                source,
            })?;
        if raw.len() as u64 > self.max_body_bytes {
            warn!(
                url = %request.url,
                limit = self.max_body_bytes,
                "upstream body exceeds the size limit; truncating"
            );
            raw.truncate(self.max_body_bytes as usize);
        }

        Ok(FetchResponse {
            status,
            body: decode_body(&raw, content_type.as_deref()),
            headers,
        })
    }
}

/// Decodes a body with the charset named in its `Content-Type`. A byte order
/// mark wins over the header; anything unlabelled or unknown is read as UTF-8.
pub fn decode_body(raw: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(raw);
    if had_errors {
        debug!(encoding = used.name(), "body contained undecodable bytes");
    }
    text.into_owned()
}

fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']))
    })
}

fn insecure_tls_config() -> Result<ClientConfig, FetchError> {
    let provider = Arc::new(ring::default_provider());
    let verifier = AcceptAnyCertificate {
        algorithms: provider.signature_verification_algorithms,
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| FetchError::Tls(err.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Certificate verifier that trusts any chain but still checks handshake
/// signatures, so the session keys belong to whoever presented the chain.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
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
