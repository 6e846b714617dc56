//! Secure Remote Password (SRP-6a) client for Cognito `USER_SRP_AUTH`.
//!
//! Cognito's variant uses the RFC 3526 3072-bit group, SHA-256 over
//! padded big-endian hex, and HKDF to derive a 16-byte key that signs the
//! `PASSWORD_VERIFIER` challenge. The password itself never leaves the
//! process.

use crate::error::{AwsError, AwsResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;
use sha2::{Digest, Sha256};

const SERVICE: &str = "cognito-idp";

/// RFC 3526 3072-bit MODP group prime.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

const G: u32 = 2;
const DERIVED_KEY_INFO: &[u8] = b"Caldera Derived Key";
const DERIVED_KEY_LEN: usize = 16;
const TIMESTAMP_FORMAT: &str = "%a %b %-d %H:%M:%S UTC %Y";

/// Answer to a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordClaim {
    /// Base64 HMAC over pool name, user id, secret block, and timestamp.
    pub signature: String,
    /// The timestamp string that was signed.
    pub timestamp: String,
}

/// One SRP session: a fresh ephemeral key pair bound to a user pool.
pub struct SrpClient {
    pool_name: String,
    n: BigUint,
    g: BigUint,
    k: BigUint,
    a: BigUint,
    big_a: BigUint,
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpClient")
            .field("pool_name", &self.pool_name)
            .field("a", &"<redacted>")
            .finish()
    }
}

impl SrpClient {
    /// Start a session for `user_pool_id` (e.g. `us-east-1_AbCdEf`).
    pub fn new(user_pool_id: &str) -> AwsResult<Self> {
        let mut bytes = [0u8; 128];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::with_private_key(user_pool_id, BigUint::from_bytes_be(&bytes))
    }

    fn with_private_key(user_pool_id: &str, a: BigUint) -> AwsResult<Self> {
        let pool_name = user_pool_id
            .split_once('_')
            .map(|(_, name)| name.to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AwsError::validation(SERVICE, &format!("malformed user pool id '{}'", user_pool_id))
            })?;

        let n = group_prime()?;
        let g = BigUint::from(G);
        let k = hex_to_big(&hash_hex(&format!("{}{}", pad_hex(&n), pad_hex(&g)))?)?;
        let big_a = g.modpow(&a, &n);
        if (&big_a % &n).is_zero() {
            return Err(AwsError::internal(SERVICE, "SRP public value A is zero mod N"));
        }

        Ok(Self {
            pool_name,
            n,
            g,
            k,
            a,
            big_a,
        })
    }

    /// Public ephemeral value A as hex, sent as `SRP_A`.
    pub fn public_a_hex(&self) -> String {
        self.big_a.to_str_radix(16)
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Answer the `PASSWORD_VERIFIER` challenge using the server's
    /// `SALT`, `SRP_B`, and `SECRET_BLOCK`, stamping the claim at `now`.
    pub fn password_claim(
        &self,
        user_id_for_srp: &str,
        password: &str,
        salt_hex: &str,
        srp_b_hex: &str,
        secret_block_b64: &str,
        now: DateTime<Utc>,
    ) -> AwsResult<PasswordClaim> {
        let salt = hex_to_big(salt_hex)?;
        let big_b = hex_to_big(srp_b_hex)?;
        if (&big_b % &self.n).is_zero() {
            return Err(AwsError::validation(SERVICE, "SRP_B is zero mod N"));
        }

        let u = self.scrambler(&big_b)?;
        let x = self.private_x(user_id_for_srp, password, &salt)?;
        let s = self.premaster_secret(&big_b, &x, &u);
        let key = derive_key(&u, &s)?;

        let secret_block = BASE64
            .decode(secret_block_b64)
            .map_err(|e| AwsError::validation(SERVICE, &format!("SECRET_BLOCK is not base64: {}", e)))?;
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| AwsError::internal(SERVICE, &e.to_string()))?;
        mac.update(self.pool_name.as_bytes());
        mac.update(user_id_for_srp.as_bytes());
        mac.update(&secret_block);
        mac.update(timestamp.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(PasswordClaim {
            signature,
            timestamp,
        })
    }

    /// u = H(pad(A) | pad(B))
    fn scrambler(&self, big_b: &BigUint) -> AwsResult<BigUint> {
        let u = hex_to_big(&hash_hex(&format!(
            "{}{}",
            pad_hex(&self.big_a),
            pad_hex(big_b)
        ))?)?;
        if u.is_zero() {
            return Err(AwsError::validation(SERVICE, "SRP scrambling parameter is zero"));
        }
        Ok(u)
    }

    /// x = H(pad(salt) | H(poolName | userId | ":" | password))
    fn private_x(&self, user_id: &str, password: &str, salt: &BigUint) -> AwsResult<BigUint> {
        let identity = sha256_hex(format!("{}{}:{}", self.pool_name, user_id, password).as_bytes());
        hex_to_big(&hash_hex(&format!("{}{}", pad_hex(salt), identity))?)
    }

    /// S = (B - k * g^x) ^ (a + u * x) mod N
    fn premaster_secret(&self, big_b: &BigUint, x: &BigUint, u: &BigUint) -> BigUint {
        let g_x = self.g.modpow(x, &self.n);
        let k_g_x = (&self.k * g_x) % &self.n;
        let base = ((big_b % &self.n) + &self.n - k_g_x) % &self.n;
        let exponent = &self.a + u * x;
        base.modpow(&exponent, &self.n)
    }
}

fn group_prime() -> AwsResult<BigUint> {
    hex_to_big(N_HEX)
}

fn hex_to_big(hex_str: &str) -> AwsResult<BigUint> {
    BigUint::parse_bytes(hex_str.as_bytes(), 16)
        .ok_or_else(|| AwsError::validation(SERVICE, &format!("invalid hex value '{:.16}'", hex_str)))
}

/// Hex of `n` padded so it decodes as a positive two's-complement value:
/// even length, and a leading `00` when the top bit would be set.
fn pad_hex(n: &BigUint) -> String {
    let hex_str = n.to_str_radix(16);
    if hex_str.len() % 2 == 1 {
        format!("0{}", hex_str)
    } else if hex_str.starts_with(['8', '9', 'a', 'b', 'c', 'd', 'e', 'f']) {
        format!("00{}", hex_str)
    } else {
        hex_str
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of the bytes a hex string encodes, as 64 hex characters.
fn hash_hex(hex_str: &str) -> AwsResult<String> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| AwsError::internal(SERVICE, &format!("hex decode failed: {}", e)))?;
    Ok(sha256_hex(&bytes))
}

fn derive_key(u: &BigUint, s: &BigUint) -> AwsResult<[u8; DERIVED_KEY_LEN]> {
    let salt = hex::decode(pad_hex(u))
        .map_err(|e| AwsError::internal(SERVICE, &e.to_string()))?;
    let ikm = hex::decode(pad_hex(s))
        .map_err(|e| AwsError::internal(SERVICE, &e.to_string()))?;
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), &ikm);
    let mut okm = [0u8; DERIVED_KEY_LEN];
    hk.expand(DERIVED_KEY_INFO, &mut okm)
        .map_err(|e| AwsError::internal(SERVICE, &e.to_string()))?;
    Ok(okm)
}
