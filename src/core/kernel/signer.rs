use crate::core::errors::ExchangeError;
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as Ed25519SignerTrait, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Headers to attach to an authenticated request.
pub type SignatureResult = Result<HashMap<String, String>, ExchangeError>;

/// Signer trait for request authentication
///
/// The REST client hands every authenticated call to a `Signer`, which owns the
/// exchange-specific decision of what to sign and which headers carry the result.
/// The HTTP method is an explicit argument so one signer can serve concurrent
/// requests without shared mutable state.
pub trait Signer: Send + Sync {
    /// Sign a request and return the headers to attach
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path
    /// * `query_params` - Query parameters in call order
    /// * `body` - Raw JSON request body bytes (empty for GET/DELETE)
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;
}

/// ED25519 key holder producing base64 signatures over canonical auth strings.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("verifying_key", &self.verifying_key_base64())
            .finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    /// Build a signer from a base64-encoded 32-byte seed.
    ///
    /// A malformed seed is a configuration error and is never retried.
    pub fn new(private_key: &str) -> Result<Self, ExchangeError> {
        let seed = Zeroizing::new(
            general_purpose::STANDARD
                .decode(private_key.trim())
                .map_err(|e| {
                    ExchangeError::ConfigurationError(format!("Invalid base64 secret key: {}", e))
                })?,
        );

        if seed.len() != 32 {
            return Err(ExchangeError::ConfigurationError(format!(
                "Secret key must decode to 32 bytes, got {}",
                seed.len()
            )));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&seed);

        Ok(Self::from_seed(&key_bytes))
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// `instruction=<i>[&k=v...]&timestamp=<t>&window=<w>` with params sorted by key.
    ///
    /// Values are concatenated as-is, without percent-encoding.
    pub fn canonical_string<K, V>(
        instruction: &str,
        params: &[(K, V)],
        timestamp: u64,
        window: u64,
    ) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut sorted: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = format!("instruction={}", instruction);
        for (key, value) in sorted {
            out.push('&');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out.push_str(&format!("&timestamp={}&window={}", timestamp, window));
        out
    }

    /// Base64 of the 64-byte signature over the UTF-8 bytes of `message`.
    pub fn sign(&self, message: &str) -> String {
        let signature = self.signing_key.sign(message.as_bytes());
        general_purpose::STANDARD.encode(signature.to_bytes())
    }

    pub fn verify(&self, message: &str, signature_b64: &str) -> bool {
        verify(&self.signing_key.verifying_key(), message, signature_b64)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The public key in the base64 form the exchange uses as the API key.
    pub fn verifying_key_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }
}

/// Check a base64 signature against `message` with the given public key.
pub fn verify(verifying_key: &VerifyingKey, message: &str, signature_b64: &str) -> bool {
    let Ok(bytes) = general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    verifying_key.verify(message.as_bytes(), &signature).is_ok()
}
