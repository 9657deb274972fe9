//! HMAC signing of classification results.
//!
//! The signature binds (target folder, confidence, provider, model,
//! message id) so the client can detect tampering with the sorting
//! metadata it stores on the message.

pub mod secrets;

pub use secrets::{
    EnvSecretStore, FileSecretStore, MemorySecretStore, SecretStore, SecretStoreError,
};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs decisions with a key resolved once from the secret store.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never leak through Debug output.
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Canonical serialization of the signed subset: fixed field order,
    /// comma separated, no whitespace, confidence to three decimals.
    pub fn canonical(
        target_folder: &str,
        confidence: f64,
        provider_name: &str,
        model_name: &str,
        message_id: &str,
    ) -> String {
        format!(
            "{},{:.3},{},{},{}",
            target_folder, confidence, provider_name, model_name, message_id
        )
    }

    /// Hex HMAC-SHA256 over the canonical serialization.
    pub fn sign(
        &self,
        target_folder: &str,
        confidence: f64,
        provider_name: &str,
        model_name: &str,
        message_id: &str,
    ) -> String {
        let canonical =
            Self::canonical(target_folder, confidence, provider_name, model_name, message_id);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a hex signature.
    pub fn verify(
        &self,
        target_folder: &str,
        confidence: f64,
        provider_name: &str,
        model_name: &str,
        message_id: &str,
        signature: &str,
    ) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let canonical =
            Self::canonical(target_folder, confidence, provider_name, model_name, message_id);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Classification header the client attaches to the message: category,
/// confidence to three decimals, optional hex HMAC, in a stable
/// client-agnostic key/value form.
pub fn render_header(target_folder: &str, confidence: f64, signature: Option<&str>) -> String {
    match signature {
        Some(signature) => format!(
            "category={}; confidence={:.3}; signature={}",
            target_folder, confidence, signature
        ),
        None => format!("category={}; confidence={:.3}", target_folder, confidence),
    }
}
