//! CP identification and the optional Redis-backed auth cache, matching
//! `original_source/src/csms-server/auth.go`.

use ocpp_proto::constants::NETWORKID_MAXLEN;
use ocpp_proto::OcppError;

const CP_AUTH_PREFIX: &str = "CP_";

/// Extracts and validates the `networkId` from a connection path's final
/// segment: truncated to [`NETWORKID_MAXLEN`], alphanumeric or `-` only.
pub fn network_id_from_path(path: &str) -> Result<String, OcppError> {
    let raw = path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OcppError::malformed("no networkId in path"))?;

    let truncated: String = raw.chars().take(NETWORKID_MAXLEN).collect();
    if truncated.is_empty()
        || !truncated
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(OcppError::malformed("invalid characters in networkId"));
    }
    Ok(truncated)
}

/// Looks up `CP_<networkId>` in the auth cache. A cache miss or Redis error
/// both fail the auth check; the caller decides whether auth is enabled.
pub async fn is_authorized(
    cache: &redis::aio::ConnectionManager,
    network_id: &str,
) -> bool {
    let mut cache = cache.clone();
    let key = format!("{CP_AUTH_PREFIX}{network_id}");
    match redis::cmd("GET")
        .arg(&key)
        .query_async::<_, Option<String>>(&mut cache)
        .await
    {
        Ok(Some(_)) => true,
        Ok(None) => {
            tracing::warn!(network_id, "auth cache miss");
            false
        }
        Err(e) => {
            tracing::error!(network_id, error = %e, "auth cache error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_segment() {
        assert_eq!(network_id_from_path("/ocpp/cp-1").unwrap(), "cp-1");
    }

    #[test]
    fn truncates_to_max_length() {
        let long = "a".repeat(NETWORKID_MAXLEN + 10);
        let got = network_id_from_path(&format!("/ocpp/{long}")).unwrap();
        assert_eq!(got.len(), NETWORKID_MAXLEN);
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(network_id_from_path("/ocpp/cp$1").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(network_id_from_path("/ocpp/").is_err());
    }
}
