use base64::Engine;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;

const VERIFIER_BYTES: usize = 64;
const STATE_BYTES: usize = 32;

/// Per-attempt PKCE secrets. Never persisted, never reused.
#[derive(Debug, Clone)]
pub struct PkceMaterial {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

pub fn generate_pkce() -> PkceMaterial {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    // Verifier: URL-safe base64 without padding (43..128 chars)
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let challenge = s256_challenge(&verifier);

    PkceMaterial {
        verifier,
        challenge,
        state: generate_state(),
    }
}

/// BASE64URL-ENCODE(SHA256(verifier)) without padding.
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
