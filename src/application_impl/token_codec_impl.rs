use crate::application_port::{IssuedToken, TokenCodec, TokenError};
use crate::domain_model::*;
use crate::domain_port::Clock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyringError {
    #[error("no signing keys configured")]
    NoKeys,
    #[error("active key id {0:?} is not in the keyring")]
    ActiveKeyMissing(String),
    #[error("duplicate key id {0:?}")]
    DuplicateKey(String),
    #[error("secret for key {0:?} is shorter than {MIN_SECRET_LEN} bytes")]
    SecretTooShort(String),
}

/// One HMAC secret and the id stamped into the `kid` header of tokens it signs.
#[derive(Clone)]
pub struct SigningKey {
    pub id: String,
    pub secret: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

struct KeyEntry {
    encoding: EncodingKey,
    decoding: DecodingKey,
    fingerprint: String,
}

/// Immutable set of signing keys. The active key signs; every key verifies,
/// so retiring a key is a config change, not a mass logout.
pub struct Keyring {
    active: String,
    keys: HashMap<String, KeyEntry>,
}

impl Keyring {
    pub fn new(active: &str, keys: Vec<SigningKey>) -> Result<Self, KeyringError> {
        if keys.is_empty() {
            return Err(KeyringError::NoKeys);
        }
        let mut entries = HashMap::with_capacity(keys.len());
        for key in keys {
            if key.secret.len() < MIN_SECRET_LEN {
                return Err(KeyringError::SecretTooShort(key.id));
            }
            let digest = Sha256::digest(&key.secret);
            let fingerprint = hex::encode(digest.as_slice())[..16].to_string();
            let entry = KeyEntry {
                encoding: EncodingKey::from_secret(&key.secret),
                decoding: DecodingKey::from_secret(&key.secret),
                fingerprint,
            };
            if entries.insert(key.id.clone(), entry).is_some() {
                return Err(KeyringError::DuplicateKey(key.id));
            }
        }
        if !entries.contains_key(active) {
            return Err(KeyringError::ActiveKeyMissing(active.to_string()));
        }
        Ok(Keyring {
            active: active.to_string(),
            keys: entries,
        })
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    /// `(key id, short sha256 fingerprint)` pairs, safe to log.
    pub fn fingerprints(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .keys
            .iter()
            .map(|(id, entry)| (id.clone(), entry.fingerprint.clone()))
            .collect();
        out.sort();
        out
    }

    fn active_entry(&self) -> &KeyEntry {
        &self.keys[&self.active]
    }

    fn decoding_key(&self, id: &str) -> Option<&DecodingKey> {
        self.keys.get(id).map(|entry| &entry.decoding)
    }
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub clock_skew: Duration,
}

// Field order here is the wire order; keep it stable.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    typ: TokenKind,
    iat: i64,
    exp: i64,
    iss: String,
    aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
}

pub struct JwtHs256Codec {
    cfg: TokenConfig,
    keyring: Arc<Keyring>,
    clock: Arc<dyn Clock>,
    validation: Validation,
}

impl JwtHs256Codec {
    pub fn new(cfg: TokenConfig, keyring: Arc<Keyring>, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against the injected clock in `parse`
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_audience(&[cfg.audience.clone()]);
        validation.set_issuer(&[cfg.issuer.clone()]);
        JwtHs256Codec {
            cfg,
            keyring,
            clock,
            validation,
        }
    }

    fn sign(
        &self,
        subject: UserId,
        kind: TokenKind,
        jti: Option<Jti>,
        iat: DateTime<Utc>,
        exp: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = WireClaims {
            sub: subject.to_string(),
            typ: kind,
            iat: iat.timestamp(),
            exp: exp.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
            jti: jti.map(|j| j.to_string()),
        };
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.keyring.active_id().to_string());
        let token = encode(&header, &claims, &self.keyring.active_entry().encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))?;
        Ok(IssuedToken {
            token,
            jti,
            issued_at: to_datetime(claims.iat)?,
            expires_at: to_datetime(claims.exp)?,
        })
    }
}

fn to_datetime(ts: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::<Utc>::from_timestamp(ts, 0).ok_or(TokenError::Malformed)
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

impl TokenCodec for JwtHs256Codec {
    fn issue(
        &self,
        subject: UserId,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let iat = self.clock.now();
        let jti = match kind {
            TokenKind::Access => None,
            TokenKind::Refresh => Some(Jti::new_random()),
        };
        self.sign(subject, kind, jti, iat, iat + ttl)
    }

    fn issue_refresh(&self, session: &SessionRecord) -> Result<IssuedToken, TokenError> {
        self.sign(
            session.user_id,
            TokenKind::Refresh,
            Some(session.jti),
            session.issued_at,
            session.expires_at,
        )
    }

    fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        let kid = header.kid.ok_or(TokenError::Malformed)?;
        let key = self
            .keyring
            .decoding_key(&kid)
            .ok_or(TokenError::InvalidSignature)?;

        let claims = decode::<WireClaims>(token, key, &self.validation)
            .map_err(map_decode_error)?
            .claims;

        if self.clock.now().timestamp() >= claims.exp + self.cfg.clock_skew.num_seconds() {
            return Err(TokenError::Expired);
        }

        let subject = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| TokenError::Malformed)?;
        let jti = claims
            .jti
            .as_deref()
            .map(str::parse::<Jti>)
            .transpose()
            .map_err(|_| TokenError::Malformed)?;
        if claims.typ == TokenKind::Refresh && jti.is_none() {
            return Err(TokenError::Malformed);
        }

        Ok(Claims {
            subject,
            kind: claims.typ,
            issued_at: to_datetime(claims.iat)?,
            expires_at: to_datetime(claims.exp)?,
            jti,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;
    use crate::domain_port::ManualClock;

    fn codec_with(keyring: Arc<Keyring>, clock: Arc<ManualClock>) -> JwtHs256Codec {
        JwtHs256Codec::new(test_config(), keyring, clock)
    }

    fn setup() -> (JwtHs256Codec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (codec_with(test_keyring(), clock.clone()), clock)
    }

    #[test]
    fn access_token_round_trips_within_ttl() {
        let (codec, clock) = setup();
        let user = UserId::new_random();
        let issued = codec
            .issue(user, TokenKind::Access, Duration::minutes(15))
            .unwrap();
        assert!(issued.jti.is_none());

        clock.advance(Duration::minutes(14));
        let claims = codec.parse(&issued.token).unwrap();
        assert_eq!(claims.subject, user);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.expires_at, issued.expires_at);
        assert_eq!(claims.jti, None);
    }

    #[test]
    fn expires_once_ttl_and_skew_have_elapsed() {
        let (codec, clock) = setup();
        let issued = codec
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(15))
            .unwrap();

        // inside the skew window
        clock.advance(Duration::minutes(15) + Duration::seconds(2));
        assert!(codec.parse(&issued.token).is_ok());

        clock.advance(Duration::seconds(10));
        assert_eq!(codec.parse(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn refresh_tokens_carry_fresh_jti() {
        let (codec, _clock) = setup();
        let user = UserId::new_random();
        let a = codec.issue(user, TokenKind::Refresh, Duration::days(7)).unwrap();
        let b = codec.issue(user, TokenKind::Refresh, Duration::days(7)).unwrap();

        assert!(a.jti.is_some());
        assert_ne!(a.jti, b.jti);
        let claims = codec.parse(&a.token).unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.jti, a.jti);
    }

    #[test]
    fn refresh_for_session_binds_its_jti_and_expiry() {
        let (codec, clock) = setup();
        let now = clock.now();
        let session = SessionRecord {
            jti: Jti::new_random(),
            user_id: UserId::new_random(),
            issued_at: now,
            expires_at: now + Duration::days(7),
            revoked: false,
            replaced_by: None,
        };
        let issued = codec.issue_refresh(&session).unwrap();
        let claims = codec.parse(&issued.token).unwrap();

        assert_eq!(claims.jti, Some(session.jti));
        assert_eq!(claims.subject, session.user_id);
        assert_eq!(claims.expires_at.timestamp(), session.expires_at.timestamp());
    }

    #[test]
    fn encoding_is_deterministic() {
        let (codec, _clock) = setup();
        let user = UserId::new_random();
        let a = codec.issue(user, TokenKind::Access, Duration::minutes(5)).unwrap();
        let b = codec.issue(user, TokenKind::Access, Duration::minutes(5)).unwrap();
        assert_eq!(a.token, b.token);
    }

    #[test]
    fn spliced_payload_fails_signature() {
        let (codec, _clock) = setup();
        let mine = codec
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap()
            .token;
        let theirs = codec
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap()
            .token;

        let mine: Vec<&str> = mine.split('.').collect();
        let theirs: Vec<&str> = theirs.split('.').collect();
        let forged = format!("{}.{}.{}", mine[0], theirs[1], mine[2]);

        assert_eq!(codec.parse(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn foreign_secret_under_same_kid_fails_signature() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let forger = codec_with(
            Arc::new(
                Keyring::new(
                    "k1",
                    vec![SigningKey {
                        id: "k1".into(),
                        secret: b"ffffffffffffffffffffffffffffffff".to_vec(),
                    }],
                )
                .unwrap(),
            ),
            clock.clone(),
        );
        let codec = codec_with(test_keyring(), clock);
        let forged = forger
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap();

        assert_eq!(codec.parse(&forged.token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let (codec, _clock) = setup();
        assert_eq!(codec.parse(""), Err(TokenError::Malformed));
        assert_eq!(codec.parse("abc"), Err(TokenError::Malformed));
        assert_eq!(codec.parse("a.b.c"), Err(TokenError::Malformed));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let other = JwtHs256Codec::new(
            TokenConfig {
                audience: "someone-else".into(),
                ..test_config()
            },
            test_keyring(),
            clock.clone(),
        );
        let codec = codec_with(test_keyring(), clock);
        let token = other
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap();

        assert_eq!(codec.parse(&token.token), Err(TokenError::Malformed));
    }

    #[test]
    fn retired_key_still_verifies_until_removed() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let old = codec_with(test_keyring(), clock.clone());
        let token = old
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap();

        let k1 = SigningKey {
            id: "k1".into(),
            secret: b"0123456789abcdef0123456789abcdef".to_vec(),
        };
        let k2 = SigningKey {
            id: "k2".into(),
            secret: b"abcdefabcdefabcdefabcdefabcdefab".to_vec(),
        };
        let rotated = codec_with(
            Arc::new(Keyring::new("k2", vec![k1, k2.clone()]).unwrap()),
            clock.clone(),
        );
        assert!(rotated.parse(&token.token).is_ok());

        let fresh = rotated
            .issue(UserId::new_random(), TokenKind::Access, Duration::minutes(5))
            .unwrap();
        assert!(rotated.parse(&fresh.token).is_ok());

        let dropped = codec_with(Arc::new(Keyring::new("k2", vec![k2]).unwrap()), clock);
        assert_eq!(
            dropped.parse(&token.token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn keyring_rejects_bad_configuration() {
        let short = SigningKey {
            id: "k1".into(),
            secret: b"short".to_vec(),
        };
        assert_eq!(
            Keyring::new("k1", vec![short]).err(),
            Some(KeyringError::SecretTooShort("k1".into()))
        );
        assert_eq!(Keyring::new("k1", vec![]).err(), Some(KeyringError::NoKeys));

        let key = SigningKey {
            id: "k1".into(),
            secret: vec![7; 32],
        };
        assert_eq!(
            Keyring::new("k9", vec![key.clone()]).err(),
            Some(KeyringError::ActiveKeyMissing("k9".into()))
        );
        assert_eq!(
            Keyring::new("k1", vec![key.clone(), key]).err(),
            Some(KeyringError::DuplicateKey("k1".into()))
        );
    }

    #[test]
    fn fingerprints_do_not_leak_secrets() {
        let keyring = test_keyring();
        let prints = keyring.fingerprints();
        assert_eq!(prints.len(), 1);
        assert_eq!(prints[0].0, "k1");
        assert_eq!(prints[0].1.len(), 16);
        assert!(!prints[0].1.contains("0123456789abcdef"));
    }
}
