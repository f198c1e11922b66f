//! services/api/src/adapters/upload.rs
//!
//! SOAP adapter for the legacy document-scan upload service. Signature and
//! photo files captured at stop completion are pushed here; the service
//! answers with the server-side file path the row stores.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pickup_route_core::ports::{DocumentUploadService, UploadError};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, warn};

const SOAP_ACTION: &str = "http://tempuri.org/ScanUpload";

/// Substrings the legacy service embeds in an HTTP-200 body when the upload
/// actually failed.
const FAILURE_MARKERS: &[&str] = &["Please Contact With Administrator", "Alert"];

pub struct SoapUploadAdapter {
    client: reqwest::Client,
    url: String,
}

impl SoapUploadAdapter {
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn build_envelope(payload_b64: &str, filename: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <ScanUpload xmlns="http://tempuri.org/">
      <ScanDocument>{payload}</ScanDocument>
      <FileName>{filename}</FileName>
    </ScanUpload>
  </soap:Body>
</soap:Envelope>"#,
        payload = payload_b64,
        filename = xml_escape(filename),
    )
}

/// Pulls the text content of `<ScanUploadResult>` out of a response
/// envelope.
fn parse_upload_result(body: &str) -> Result<String, UploadError> {
    let mut reader = Reader::from_reader(body.as_bytes());
    let mut inside_result = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"ScanUploadResult" => {
                inside_result = true;
            }
            Ok(Event::Text(t)) if inside_result => {
                let text = t
                    .unescape()
                    .map_err(|e| UploadError::BadResponse(e.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"ScanUploadResult" => {
                // Element present but empty.
                return Err(UploadError::BadResponse(
                    "empty ScanUploadResult".to_string(),
                ));
            }
            Ok(Event::Eof) => {
                return Err(UploadError::BadResponse(
                    "no ScanUploadResult element in response".to_string(),
                ));
            }
            Err(e) => return Err(UploadError::BadResponse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

#[async_trait]
impl DocumentUploadService for SoapUploadAdapter {
    async fn upload(&self, bytes: &[u8], filename: &str) -> Result<String, UploadError> {
        let envelope = build_envelope(&BASE64.encode(bytes), filename);
        debug!(filename, size = bytes.len(), "uploading document scan");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::Timeout
                } else {
                    UploadError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        if !status.is_success() {
            warn!(%status, "upload service returned an error status");
            return Err(UploadError::Service(format!(
                "upload service returned HTTP {}",
                status
            )));
        }

        let result = parse_upload_result(&body)?;
        // The service reports its own failures inside a successful envelope.
        if FAILURE_MARKERS.iter().any(|m| result.contains(m)) {
            return Err(UploadError::Service(result));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_with_result(result: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <ScanUploadResponse xmlns="http://tempuri.org/">
      <ScanUploadResult>{result}</ScanUploadResult>
    </ScanUploadResponse>
  </soap:Body>
</soap:Envelope>"#
        )
    }

    #[test]
    fn extracts_the_uploaded_file_path() {
        let body = envelope_with_result("/ScanDoc/2025/signature_42_3.png");
        assert_eq!(
            parse_upload_result(&body).unwrap(),
            "/ScanDoc/2025/signature_42_3.png"
        );
    }

    #[test]
    fn missing_result_element_is_a_bad_response() {
        let err = parse_upload_result("<soap:Envelope></soap:Envelope>").unwrap_err();
        assert!(matches!(err, UploadError::BadResponse(_)));
    }

    #[test]
    fn empty_result_element_is_a_bad_response() {
        let body = envelope_with_result("");
        assert!(matches!(
            parse_upload_result(&body).unwrap_err(),
            UploadError::BadResponse(_)
        ));
    }

    #[test]
    fn failure_markers_cover_the_known_service_sentinels() {
        for marker in FAILURE_MARKERS {
            let body = envelope_with_result(&format!("{marker}: something went wrong"));
            let result = parse_upload_result(&body).unwrap();
            assert!(FAILURE_MARKERS.iter().any(|m| result.contains(m)));
        }
    }

    #[test]
    fn filenames_are_escaped_in_the_envelope() {
        let envelope = build_envelope("cGF5bG9hZA==", r#"a<b>&"c".png"#);
        assert!(envelope.contains("a&lt;b&gt;&amp;&quot;c&quot;.png"));
        assert!(!envelope.contains("a<b>"));
    }
}
