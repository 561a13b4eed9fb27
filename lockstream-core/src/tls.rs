//! TLS configuration and the rustls client setup.
//!
//! Certificates and keys arrive as PEM. The client identity is validated at
//! configuration time so a bad certificate fails the setter, not the
//! connect attempt: the key must be present and the leaf certificate must be
//! inside its validity window.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};

/// Minimum protocol version offered during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

/// Transport-layer TLS settings.
pub struct TlsOptions {
    /// Lowest protocol version the client will negotiate.
    pub min_protocol: TlsVersion,
    /// Kept for API compatibility with platforms that check OCSP/CRL at the
    /// OS layer; rustls performs no online revocation lookups.
    pub check_revocation: bool,
    /// Certificate presented when the server requests client auth.
    pub client_identity: Option<ClientIdentity>,
    /// Custom certificate policy. Defaults to webpki validation against the
    /// bundled Mozilla roots.
    pub verifier: Option<Arc<dyn ServerCertVerifier>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            min_protocol: TlsVersion::default(),
            check_revocation: true,
            client_identity: None,
            verifier: None,
        }
    }
}

impl Clone for TlsOptions {
    fn clone(&self) -> Self {
        Self {
            min_protocol: self.min_protocol,
            check_revocation: self.check_revocation,
            client_identity: self.client_identity.clone(),
            verifier: self.verifier.clone(),
        }
    }
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("min_protocol", &self.min_protocol)
            .field("check_revocation", &self.check_revocation)
            .field("client_identity", &self.client_identity.is_some())
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

/// Client certificate chain plus its private key.
#[derive(Debug)]
pub struct ClientIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl ClientIdentity {
    /// Build an identity from PEM-encoded certificate chain and private key.
    ///
    /// Fails when no key block is present, or when the leaf certificate is
    /// expired or not yet valid.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_chain: Vec<CertificateDer<'static>> =
            pem_blocks(cert_pem, "CERTIFICATE")?
                .into_iter()
                .map(CertificateDer::from)
                .collect();
        if cert_chain.is_empty() {
            return Err(Error::config("no certificate found in PEM input"));
        }

        let key = parse_private_key(key_pem)?;

        let (not_before, not_after) = validity_window(cert_chain[0].as_ref())?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        if now < not_before {
            return Err(Error::config("client certificate is not yet valid"));
        }
        if now > not_after {
            return Err(Error::config("client certificate has expired"));
        }

        Ok(Self { cert_chain, key })
    }
}

/// Translate [`TlsOptions`] into a rustls client configuration.
pub(crate) fn build_client_config(options: &TlsOptions) -> Result<rustls::ClientConfig> {
    let versions: &[&rustls::SupportedProtocolVersion] = match options.min_protocol {
        TlsVersion::Tls12 => rustls::ALL_VERSIONS,
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_protocol_versions(versions)
        .with_root_certificates(root_store);

    let mut config = match &options.client_identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.cert_chain.clone(), identity.key.clone_key())
            .map_err(|e| Error::tls_with_source("client certificate rejected", e))?,
        None => builder.with_no_client_auth(),
    };

    if let Some(verifier) = &options.verifier {
        config
            .dangerous()
            .set_certificate_verifier(verifier.clone());
    }

    if !options.check_revocation {
        tracing::debug!("certificate revocation checking disabled by configuration");
    }

    Ok(config)
}

/// Extract every DER blob delimited by `BEGIN <marker>` / `END <marker>`.
fn pem_blocks(pem: &[u8], marker: &str) -> Result<Vec<Vec<u8>>> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| Error::config("PEM input is not valid UTF-8"))?;
    let begin = format!("-----BEGIN {}-----", marker);
    let end = format!("-----END {}-----", marker);

    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&begin) {
        let after_begin = &rest[start + begin.len()..];
        let stop = after_begin
            .find(&end)
            .ok_or_else(|| Error::config(format!("missing {}", end)))?;
        let body: String = after_begin[..stop]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = general_purpose::STANDARD
            .decode(body)
            .map_err(|_| Error::config(format!("invalid base64 in {} block", marker)))?;
        blocks.push(der);
        rest = &after_begin[stop + end.len()..];
    }
    Ok(blocks)
}

fn parse_private_key(key_pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    // PKCS#8, PKCS#1 and SEC1 markers, same set the servers hand out
    if let Some(der) = pem_blocks(key_pem, "PRIVATE KEY")?.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs8(der.into()));
    }
    if let Some(der) = pem_blocks(key_pem, "RSA PRIVATE KEY")?.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs1(der.into()));
    }
    if let Some(der) = pem_blocks(key_pem, "EC PRIVATE KEY")?.into_iter().next() {
        return Ok(PrivateKeyDer::Sec1(der.into()));
    }
    Err(Error::config("client certificate has no private key"))
}

/// Minimal DER reader, just enough to walk to the certificate validity.
struct DerCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the element at the cursor, returning (tag, content).
    fn next(&mut self) -> Result<(u8, &'a [u8])> {
        let err = || Error::config("malformed DER in certificate");
        let tag = *self.data.get(self.pos).ok_or_else(err)?;
        let mut pos = self.pos + 1;

        let first = *self.data.get(pos).ok_or_else(err)?;
        pos += 1;
        let len = if first < 0x80 {
            first as usize
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 4 {
                return Err(err());
            }
            let mut len = 0usize;
            for _ in 0..n {
                let b = *self.data.get(pos).ok_or_else(err)?;
                pos += 1;
                len = (len << 8) | b as usize;
            }
            len
        };

        let content = self.data.get(pos..pos + len).ok_or_else(err)?;
        self.pos = pos + len;
        Ok((tag, content))
    }
}

/// Walk a DER certificate to its `Validity` and return the window as unix
/// timestamps `(not_before, not_after)`.
fn validity_window(cert_der: &[u8]) -> Result<(i64, i64)> {
    let mut outer = DerCursor::new(cert_der);
    let (_, cert_body) = outer.next()?;

    let mut cert = DerCursor::new(cert_body);
    let (_, tbs_body) = cert.next()?;

    let mut tbs = DerCursor::new(tbs_body);
    let (tag, _) = tbs.next()?;
    if tag == 0xa0 {
        // explicit version was present; the serial number follows
        tbs.next()?;
    }
    tbs.next()?; // signature algorithm
    tbs.next()?; // issuer

    let (tag, validity) = tbs.next()?;
    if tag != 0x30 {
        return Err(Error::config("certificate validity field not found"));
    }
    let mut validity = DerCursor::new(validity);
    let (nb_tag, nb) = validity.next()?;
    let (na_tag, na) = validity.next()?;
    Ok((parse_der_time(nb_tag, nb)?, parse_der_time(na_tag, na)?))
}

/// Decode a UTCTime (`YYMMDDHHMMSSZ`) or GeneralizedTime (`YYYYMMDDHHMMSSZ`).
fn parse_der_time(tag: u8, raw: &[u8]) -> Result<i64> {
    let err = || Error::config("malformed time in certificate validity");
    let text = std::str::from_utf8(raw).map_err(|_| err())?;
    let digits = |s: &str| -> Result<i64> { s.parse::<i64>().map_err(|_| err()) };

    let (year, rest) = match tag {
        0x17 => {
            if text.len() != 13 || !text.ends_with('Z') {
                return Err(err());
            }
            let yy = digits(&text[0..2])?;
            // RFC 5280 century rule
            let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
            (year, &text[2..12])
        }
        0x18 => {
            if text.len() != 15 || !text.ends_with('Z') {
                return Err(err());
            }
            (digits(&text[0..4])?, &text[4..14])
        }
        _ => return Err(err()),
    };

    let month = digits(&rest[0..2])?;
    let day = digits(&rest[2..4])?;
    let hour = digits(&rest[4..6])?;
    let minute = digits(&rest[6..8])?;
    let second = digits(&rest[8..10])?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(err());
    }

    Ok(days_from_civil(year, month, day) * 86_400 + hour * 3_600 + minute * 60 + second)
}

/// Days since the unix epoch for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
