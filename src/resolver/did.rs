/// DID string handling and self-certification
use serde::Deserialize;

/// Nym record payload carried in a GET_NYM reply's `data` field
#[derive(Debug, Clone, Deserialize)]
pub struct NymRecord {
    pub dest: String,
    pub verkey: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Normalize a ledger object identifier to its leading DID segment.
///
/// Object identifiers are either fully-qualified (`did:<method>:<id>`) or
/// ledger-scoped composites whose first segment is the bare DID
/// (`<id>:<marker>:...`, as in schema and cred-def ids). Either way the
/// bare identifier comes back, with any `did:<method>:` prefix stripped.
pub fn extract_did_from_identifier(identifier: &str) -> String {
    let unqualified = match identifier.strip_prefix("did:") {
        Some(rest) => rest.split_once(':').map(|(_, id)| id).unwrap_or(rest),
        None => identifier,
    };
    unqualified
        .split(':')
        .next()
        .unwrap_or(unqualified)
        .to_string()
}

/// Whether a DID is self-certified by its verification key.
///
/// An abbreviated verkey (`~` prefix) extends the DID bytes by
/// construction. A full verkey certifies the DID when the DID's 16 decoded
/// bytes equal the verkey's leading 16 bytes.
pub fn is_self_certified(did: &str, verkey: &str) -> bool {
    if verkey.starts_with('~') {
        return true;
    }

    let did_bytes = match bs58::decode(did).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let verkey_bytes = match bs58::decode(verkey).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    did_bytes.len() == 16 && verkey_bytes.len() >= 16 && verkey_bytes[..16] == did_bytes[..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_qualified_did() {
        assert_eq!(
            extract_did_from_identifier("did:sov:V4SGRU86Z58d6TV7PBUe6f"),
            "V4SGRU86Z58d6TV7PBUe6f"
        );
    }

    #[test]
    fn test_extract_from_schema_id() {
        assert_eq!(
            extract_did_from_identifier("V4SGRU86Z58d6TV7PBUe6f:2:prefs:1.0"),
            "V4SGRU86Z58d6TV7PBUe6f"
        );
    }

    #[test]
    fn test_extract_from_cred_def_id() {
        assert_eq!(
            extract_did_from_identifier("V4SGRU86Z58d6TV7PBUe6f:3:CL:18:tag"),
            "V4SGRU86Z58d6TV7PBUe6f"
        );
    }

    #[test]
    fn test_extract_bare_did_is_identity() {
        assert_eq!(
            extract_did_from_identifier("V4SGRU86Z58d6TV7PBUe6f"),
            "V4SGRU86Z58d6TV7PBUe6f"
        );
    }

    #[test]
    fn test_abbreviated_verkey_is_self_certified() {
        assert!(is_self_certified(
            "V4SGRU86Z58d6TV7PBUe6f",
            "~CoRER63DVYnWZtK8uAzNbx"
        ));
    }

    #[test]
    fn test_full_verkey_prefix_match() {
        // DID encodes exactly the first 16 bytes of the verkey.
        let verkey_bytes: Vec<u8> = (1..=32).collect();
        let verkey = bs58::encode(&verkey_bytes).into_string();
        let did = bs58::encode(&verkey_bytes[..16]).into_string();
        assert!(is_self_certified(&did, &verkey));
    }

    #[test]
    fn test_unrelated_verkey_is_not_self_certified() {
        let verkey = bs58::encode([9u8; 32]).into_string();
        let did = bs58::encode([1u8; 16]).into_string();
        assert!(!is_self_certified(&did, &verkey));
    }

    #[test]
    fn test_undecodable_material_is_not_self_certified() {
        assert!(!is_self_certified("not-base58-0OIl", "also-not-base58-0OIl"));
    }

    #[test]
    fn test_nym_record_parses_reply_data() {
        let data = r#"{"dest":"V4SGRU86Z58d6TV7PBUe6f","verkey":"GJ1SzoWzavQYfNL9XkaJdrQejfztN4XqdsiV4ct3LXKL","role":"101"}"#;
        let nym: NymRecord = serde_json::from_str(data).unwrap();
        assert_eq!(nym.dest, "V4SGRU86Z58d6TV7PBUe6f");
        assert_eq!(nym.role.as_deref(), Some("101"));
    }
}
