// JWT spec for APNs: https://developer.apple.com/documentation/usernotifications/setting_up_a_remote_notification_server/establishing_a_token-based_connection_to_apns

use base64::{engine::general_purpose, Engine};
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bearer credential for the push gateway. APNs wants the token
/// regenerated every 20-60 minutes; `refresh` re-signs with a fresh
/// `iat` claim.
pub struct AuthToken {
    pub token: String,
    jwt_header: String,
    team_id: String,
    key_path: String,
}

impl AuthToken {
    pub fn new(
        team_id: String,
        key_id: String,
        key_path: String,
    ) -> Result<AuthToken, AuthTokenError> {
        let jwt_header = AuthToken::generate_jwt_header(&key_id);
        let mut auth = AuthToken {
            token: String::new(),
            jwt_header,
            team_id,
            key_path,
        };
        auth.refresh()?;
        Ok(auth)
    }

    pub fn refresh(&mut self) -> Result<(), AuthTokenError> {
        let jwt_claims = AuthToken::generate_jwt_claims(&self.team_id);
        let jwt_signed = self.generate_jwt_signed(&self.jwt_header, &jwt_claims)?;
        self.token = format!("{}.{}.{}", self.jwt_header, jwt_claims, jwt_signed);
        Ok(())
    }

    fn generate_jwt_header(key_id: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{{ \"alg\": \"ES256\", \"kid\": \"{}\" }}", key_id).as_bytes())
    }

    fn generate_jwt_claims(team_id: &str) -> String {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        general_purpose::URL_SAFE_NO_PAD.encode(
            format!("{{ \"iss\": \"{}\", \"iat\": {} }}", team_id, since_epoch).as_bytes(),
        )
    }

    /// Signing using ECDSA
    fn generate_jwt_signed(&self, header: &str, claims: &str) -> Result<String, AuthTokenError> {
        let header_claims = format!("{header}.{claims}");

        let private_key_bytes = fs::read(&self.key_path).map_err(AuthTokenError::IO)?;
        let key = PKey::private_key_from_pem(&private_key_bytes)
            .map_err(|_| AuthTokenError::BadPrivateKey)?;

        let mut signer =
            Signer::new(MessageDigest::sha256(), &key).map_err(|_| AuthTokenError::BadSignature)?;

        signer
            .update(header_claims.as_bytes())
            .map_err(|_| AuthTokenError::BadSignature)?;
        let signed = signer
            .sign_to_vec()
            .map_err(|_| AuthTokenError::BadSignature)?;

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(signed))
    }
}

#[derive(Debug)]
pub enum AuthTokenError {
    IO(std::io::Error),
    BadPrivateKey,
    BadSignature,
}
