//! Resolve inbound media references into bytes.

use std::time::Duration;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    bytes::{Bytes, BytesMut},
    tracing::debug,
};

use crate::{Error, Result, plugin::MediaSource};

/// Largest inbound media payload the gateway will buffer.
pub const MAX_MEDIA_BYTES: usize = 25 * 1024 * 1024;

/// Decode or download `source`.
///
/// `bearer` is attached as an `Authorization` header for channels whose
/// media URLs are private (Slack).
pub async fn resolve_media(
    client: &reqwest::Client,
    source: &MediaSource,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<Bytes> {
    resolve_media_limited(client, source, bearer, timeout, MAX_MEDIA_BYTES).await
}

async fn resolve_media_limited(
    client: &reqwest::Client,
    source: &MediaSource,
    bearer: Option<&str>,
    timeout: Duration,
    limit: usize,
) -> Result<Bytes> {
    let bytes = match source {
        MediaSource::Bytes(b) => b.clone(),
        MediaSource::Base64(encoded) => decode_base64(encoded)?,
        MediaSource::Url(url) => return download(client, url, bearer, timeout, limit).await,
    };
    if bytes.len() > limit {
        return Err(too_large(bytes.len() as u64, limit));
    }
    Ok(bytes)
}

/// Stream `url` into memory, stopping as soon as the body passes `limit`.
async fn download(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    timeout: Duration,
    limit: usize,
) -> Result<Bytes> {
    debug!(url, "downloading inbound media");
    let mut req = client.get(url).timeout(timeout);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let mut resp = req
        .send()
        .await
        .map_err(|e| Error::external("media download", e))?;
    if !resp.status().is_success() {
        return Err(Error::unavailable(format!(
            "media download returned HTTP {}",
            resp.status()
        )));
    }
    if let Some(declared) = resp.content_length()
        && declared > limit as u64
    {
        return Err(too_large(declared, limit));
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| Error::external("media download body", e))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(too_large((buf.len() + chunk.len()) as u64, limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn too_large(size: u64, limit: usize) -> Error {
    Error::invalid_input(format!(
        "media payload of {size} bytes exceeds the {limit} byte limit"
    ))
}

/// Decode base64, tolerating a `data:<mime>;base64,` prefix and whitespace.
pub fn decode_base64(encoded: &str) -> Result<Bytes> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map(Bytes::from)
        .map_err(|e| Error::invalid_input(format!("invalid base64 media: {e}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{header, method, path},
        },
    };

    #[test]
    fn decodes_plain_and_data_uri_base64() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(
            decode_base64("data:audio/ogg;base64,aGVs\nbG8=").unwrap(),
            Bytes::from_static(b"hello")
        );
        assert!(decode_base64("***").is_err());
    }

    #[tokio::test]
    async fn downloads_url_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/voice.ogg"))
            .and(header("authorization", "Bearer xoxb-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"OggS....".to_vec()))
            .mount(&server)
            .await;

        let src = MediaSource::Url(format!("{}/files/voice.ogg", server.uri()));
        let bytes = resolve_media(
            &reqwest::Client::new(),
            &src,
            Some("xoxb-1"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(&bytes[..4], b"OggS");
    }

    #[tokio::test]
    async fn download_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let src = MediaSource::Url(format!("{}/missing", server.uri()));
        let err = resolve_media(&reqwest::Client::new(), &src, None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn oversized_download_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let src = MediaSource::Url(format!("{}/big.ogg", server.uri()));
        let client = reqwest::Client::new();
        let err = resolve_media_limited(&client, &src, None, Duration::from_secs(5), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }), "{err}");
        assert!(err.to_string().contains("exceeds the 16 byte limit"));

        let ok = resolve_media_limited(&client, &src, None, Duration::from_secs(5), 64)
            .await
            .unwrap();
        assert_eq!(ok.len(), 64);
    }

    #[tokio::test]
    async fn oversized_inline_payload_is_rejected() {
        let src = MediaSource::Bytes(Bytes::from_static(b"0123456789"));
        let err = resolve_media_limited(&reqwest::Client::new(), &src, None, Duration::from_secs(1), 4)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds the 4 byte limit"));
    }
}
