//! Payload encoding: raw bytes ⇄ base64 data URL.
//!
//! The size-limited facility only stores strings, so every staged payload is
//! a `data:<mime>;base64,<data>` URL. The same string doubles as the image
//! attachment handed to the OCR engine, which accepts base64 data directly.

use crate::error::DocDeskError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Encode raw bytes as a base64 data URL.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let mime = if mime_type.is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} bytes → {} bytes base64", bytes.len(), b64.len());
    format!("data:{mime};base64,{b64}")
}

/// Length of the data URL [`encode_data_url`] would produce, without encoding.
pub fn data_url_len(mime_type: &str, raw_len: usize) -> usize {
    let mime_len = if mime_type.is_empty() {
        FALLBACK_MIME.len()
    } else {
        mime_type.len()
    };
    "data:".len() + mime_len + ";base64,".len() + raw_len.div_ceil(3) * 4
}

/// Split a data URL into its mime type and base64 body without decoding.
///
/// A bare base64 string (no `data:` prefix) is accepted with the fallback
/// mime type.
pub fn split_data_url(url: &str) -> Result<(&str, &str), DocDeskError> {
    let Some(rest) = url.strip_prefix("data:") else {
        return Ok((FALLBACK_MIME, url));
    };
    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| DocDeskError::InvalidPayload("data URL has no ',' separator".into()))?;
    let mime = header.strip_suffix(";base64").ok_or_else(|| {
        DocDeskError::InvalidPayload(format!("data URL is not base64-encoded: '{header}'"))
    })?;
    let mime = if mime.is_empty() { FALLBACK_MIME } else { mime };
    Ok((mime, body))
}

/// Decode a data URL (or bare base64) into its mime type and raw bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), DocDeskError> {
    let (mime, body) = split_data_url(url)?;
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| DocDeskError::InvalidPayload(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_is_exact() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let url = encode_data_url("application/pdf", &bytes);
        assert!(url.starts_with("data:application/pdf;base64,"));
        let (mime, back) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "application/pdf");
        assert_eq!(back, bytes);
    }

    #[test]
    fn predicted_length_matches() {
        for n in [0usize, 1, 2, 3, 4, 5, 1024, 4097] {
            let bytes = vec![7u8; n];
            assert_eq!(
                data_url_len("image/png", n),
                encode_data_url("image/png", &bytes).len(),
                "n = {n}"
            );
        }
        assert_eq!(data_url_len("", 3), encode_data_url("", &[1, 2, 3]).len());
    }

    #[test]
    fn bare_base64_is_accepted() {
        let (mime, bytes) = decode_data_url("aGVsbG8=").unwrap();
        assert_eq!(mime, FALLBACK_MIME);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn malformed_urls_are_rejected() {
        assert!(matches!(
            decode_data_url("data:text/plain,hello"),
            Err(DocDeskError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(DocDeskError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(DocDeskError::InvalidPayload(_))
        ));
    }
}
