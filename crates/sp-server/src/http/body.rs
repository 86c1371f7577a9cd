//! Request body decoding with transparent gzip support.
//!
//! Agents may send `Content-Encoding: gzip`. Decoding failures, unsupported
//! encodings, oversized payloads, and malformed JSON all map to
//! `InvalidInput` before any session state is touched.

use std::io::Read;

use axum::http::HeaderMap;
use axum::http::header;
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use session_pulse_core::ApiError;

/// Upper bound on a request body, before and after decompression.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Decode a JSON request body, honoring the declared content encoding.
pub fn decode_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::InvalidInput(format!(
            "request body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }

    let decoded: Vec<u8>;
    let bytes: &[u8] = match declared_encoding(headers)? {
        Encoding::Identity => body,
        Encoding::Gzip => {
            decoded = gunzip(body)?;
            &decoded
        }
    };

    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::InvalidInput(format!("malformed JSON body: {e}")))
}

enum Encoding {
    Identity,
    Gzip,
}

fn declared_encoding(headers: &HeaderMap) -> Result<Encoding, ApiError> {
    let Some(value) = headers.get(header::CONTENT_ENCODING) else {
        return Ok(Encoding::Identity);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::InvalidInput("unreadable content-encoding header".into()))?;
    match value.trim().to_ascii_lowercase().as_str() {
        "identity" => Ok(Encoding::Identity),
        "gzip" => Ok(Encoding::Gzip),
        other => Err(ApiError::InvalidInput(format!(
            "unsupported content encoding: {other}"
        ))),
    }
}

fn gunzip(body: &[u8]) -> Result<Vec<u8>, ApiError> {
    let mut decoder = GzDecoder::new(body).take((MAX_BODY_BYTES + 1) as u64);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ApiError::InvalidInput(format!("invalid gzip body: {e}")))?;
    if out.len() > MAX_BODY_BYTES {
        return Err(ApiError::InvalidInput(format!(
            "decompressed body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::Value;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn headers_with_encoding(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_plain_json_decodes() {
        let value: Value = decode_json(&HeaderMap::new(), br#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_gzip_json_decodes() {
        let body = gzip(br#"{"a": 1}"#);
        let value: Value = decode_json(&headers_with_encoding("gzip"), &body).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_declared_gzip_with_plain_body_is_invalid_input() {
        let result: Result<Value, _> =
            decode_json(&headers_with_encoding("gzip"), br#"{"a": 1}"#);
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_encoding_is_invalid_input() {
        let result: Result<Value, _> = decode_json(&headers_with_encoding("zstd"), b"{}");
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_malformed_json_is_invalid_input() {
        let result: Result<Value, _> = decode_json(&HeaderMap::new(), b"{nope");
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_oversized_body_is_invalid_input() {
        let body = vec![b' '; MAX_BODY_BYTES + 1];
        let result: Result<Value, _> = decode_json(&HeaderMap::new(), &body);
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }
}
