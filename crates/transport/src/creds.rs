//! Credential material persisted between sessions.
//!
//! The key material is owned and mutated by the transport library; herald
//! only stores and restores it. Field names match the library's JSON so a
//! bootstrap blob deserializes directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use herald_domain::Jid;

/// A public/private key pair, base64-encoded by the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public: String,
    pub private: String,
}

/// A signed pre-key: key pair plus signature and rotating id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    pub key_pair: KeyPair,
    pub signature: String,
    pub key_id: u32,
}

/// The credential set. Everything beyond the three required keys is
/// carried opaquely in `extra` and round-trips untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creds {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    #[serde(default)]
    pub registration_id: u32,
    /// The authenticated account, filled in after first login.
    #[serde(default)]
    pub me: Option<Jid>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "noiseKey": {"public": "cHVi", "private": "cHJpdg=="},
            "signedIdentityKey": {"public": "aWQ=", "private": "aWRw"},
            "signedPreKey": {
                "keyPair": {"public": "cHJl", "private": "cHJlcA=="},
                "signature": "c2ln",
                "keyId": 1
            },
            "registrationId": 42,
            "advSecretKey": "opaque-extra-field"
        })
    }

    #[test]
    fn deserializes_with_extra_fields() {
        let creds: Creds = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(creds.registration_id, 42);
        assert_eq!(creds.signed_pre_key.key_id, 1);
        assert!(creds.me.is_none());
        assert!(creds.extra.contains_key("advSecretKey"));
    }

    #[test]
    fn extra_fields_roundtrip() {
        let creds: Creds = serde_json::from_value(sample_json()).unwrap();
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["advSecretKey"], "opaque-extra-field");
        let back: Creds = serde_json::from_value(json).unwrap();
        assert_eq!(back, creds);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let mut json = sample_json();
        json.as_object_mut().unwrap().remove("noiseKey");
        assert!(serde_json::from_value::<Creds>(json).is_err());
    }
}
