//! Fresh credentials for sessions with nothing stored yet

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::types::{AccountSettings, AuthenticationCreds, KeyPair, SignedKeyPair};
use crate::codec::Binary;

/// Produces the initial credentials record for a new session.
pub trait CredsFactory: Send + Sync {
    fn init_creds(&self) -> AuthenticationCreds;
}

/// Random X25519 identity material.
///
/// The signed pre-key is generated but left unsigned (empty signature). The
/// protocol layer signs it with the identity key before first upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCredsFactory;

impl CredsFactory for RandomCredsFactory {
    fn init_creds(&self) -> AuthenticationCreds {
        let signed_identity_key = generate_key_pair();
        AuthenticationCreds {
            noise_key: generate_key_pair(),
            pairing_ephemeral_key_pair: generate_key_pair(),
            signed_identity_key,
            signed_pre_key: SignedKeyPair {
                key_pair: generate_key_pair(),
                signature: Binary::default(),
                key_id: 1,
                timestamp_s: None,
            },
            registration_id: generate_registration_id(),
            adv_secret_key: STANDARD.encode(random_bytes::<32>().as_slice()),
            first_unuploaded_pre_key_id: 1,
            next_pre_key_id: 1,
            account_sync_counter: 0,
            account_settings: AccountSettings::default(),
            device_id: URL_SAFE_NO_PAD.encode(random_bytes::<16>().as_slice()),
            phone_id: uuid::Uuid::new_v4().to_string(),
            identity_id: Binary::new(random_bytes::<20>().to_vec()),
            registered: false,
            backup_token: Binary::new(random_bytes::<20>().to_vec()),
            ..Default::default()
        }
    }
}

fn random_bytes<const N: usize>() -> Zeroizing<[u8; N]> {
    Zeroizing::new(rand::random::<[u8; N]>())
}

/// New Curve25519 key pair from the OS-seeded thread RNG.
pub fn generate_key_pair() -> KeyPair {
    let secret = StaticSecret::from(*random_bytes::<32>());
    let public = PublicKey::from(&secret);
    KeyPair {
        public: Binary::new(public.as_bytes().to_vec()),
        private: Binary::new(Zeroizing::new(secret.to_bytes()).to_vec()),
    }
}

/// 14-bit registration id.
pub fn generate_registration_id() -> u32 {
    u32::from(rand::random::<u16>() & 0x3fff)
}
