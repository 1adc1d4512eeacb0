//! Client side HTTP/1.1 framing: encodes JSON requests and decodes JSON responses.

use std::marker::PhantomData;

use anyhow::{bail, Error, Result};
use http::response::Builder as ResponseBuilder;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

const MAX_HEADERS: usize = 32;

/// Sends `Request<Req>` and receives `Response<Res>`, both carried as JSON bodies.
pub struct JsonHttp<Req, Res> {
    _marker: PhantomData<(Req, Res)>,
}

impl<Req, Res> JsonHttp<Req, Res> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Res> Default for JsonHttp<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn date_header_now() -> String {
    let date = chrono::Utc::now();
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn encode_headers_and_body(headers: &HeaderMap<HeaderValue>, body: &[u8], dst: &mut BytesMut) {
    for (k, v) in headers {
        dst.extend_from_slice(k.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(v.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    dst.extend_from_slice(b"\r\n");
    dst.extend_from_slice(body);
}

fn convert_httparse_response(parsed: &httparse::Response) -> Result<ResponseBuilder> {
    // Only HTTP/1.x is spoken here.
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) | None => Version::HTTP_11,
        Some(other) => bail!("invalid HTTP version 1.{}", other),
    };

    let status = StatusCode::from_u16(parsed.code.unwrap_or(200))?;
    let mut builder = Response::builder().status(status).version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }

    Ok(builder)
}

fn content_length(parsed: &httparse::Response) -> Result<Option<usize>> {
    match parsed
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
    {
        Some(header) => {
            let value = std::str::from_utf8(header.value)?.trim();
            Ok(Some(value.parse()?))
        }
        None => Ok(None),
    }
}

fn build_response<Res: DeserializeOwned>(builder: ResponseBuilder, body: &[u8]) -> Result<Response<Res>> {
    let body = serde_json::from_slice::<Res>(body)?;
    builder.body(body).map_err(Error::from)
}

impl<Req: Serialize, Res> Encoder<Request<Req>> for JsonHttp<Req, Res> {
    type Error = Error;

    fn encode(&mut self, item: Request<Req>, dst: &mut BytesMut) -> Result<()> {
        use std::fmt::Write;

        let body = serde_json::to_vec(item.body())?;

        write!(
            dst,
            "\
            {} {} HTTP/1.1\r\n\
            Content-Length: {}\r\n\
            Date: {}\r\n\
            ",
            item.method(),
            item.uri(),
            body.len(),
            date_header_now(),
        )
        .map_err(Error::from)?;

        encode_headers_and_body(item.headers(), &body, dst);

        Ok(())
    }
}

impl<Req, Res: DeserializeOwned> Decoder for JsonHttp<Req, Res> {
    type Item = Response<Res>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (builder, header_len, body_len) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut headers);
            let header_len = match res.parse(src)? {
                httparse::Status::Complete(amt) => amt,
                httparse::Status::Partial => return Ok(None),
            };
            (convert_httparse_response(&res)?, header_len, content_length(&res)?)
        };

        // Without a Content-Length the body runs until the server closes the connection.
        let Some(body_len) = body_len else {
            return Ok(None);
        };

        if src.len() < header_len + body_len {
            src.reserve(header_len + body_len - src.len());
            return Ok(None);
        }

        let _headers = src.split_to(header_len);
        let body = src.split_to(body_len);
        build_response(builder, &body).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(response) = self.decode(src)? {
            return Ok(Some(response));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let (builder, header_len) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut headers);
            match res.parse(src)? {
                httparse::Status::Complete(amt) => (convert_httparse_response(&res)?, amt),
                httparse::Status::Partial => bail!("connection closed inside the response headers"),
            }
        };

        let _headers = src.split_to(header_len);
        let body = src.split_to(src.len());
        build_response(builder, &body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    type Codec = JsonHttp<Value, Value>;

    #[test]
    fn test_encode_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("Host", "localhost:9933")
            .header("Content-Type", "application/json")
            .body(json!({"jsonrpc": "2.0", "method": "system_version"}))
            .unwrap();

        let mut dst = BytesMut::new();
        Codec::new().encode(request, &mut dst).unwrap();
        let text = String::from_utf8(dst.to_vec()).unwrap();

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("POST / HTTP/1.1\r\n"));
        assert!(head.contains("host: localhost:9933"));
        assert!(head.contains("content-type: application/json"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        let parsed: Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["method"], "system_version");
    }

    #[test]
    fn test_decode_waits_for_full_body() {
        let body = r#"{"jsonrpc":"2.0","result":"1.0.0","id":"a"}"#;
        let raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );

        let mut codec = Codec::new();
        let mut src = BytesMut::from(&raw[..raw.len() - 5]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(raw[raw.len() - 5..].as_bytes());
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body()["result"], "1.0.0");
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_eof_without_length() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"result\":7}";
        let mut codec = Codec::new();
        let mut src = BytesMut::from(raw);
        assert!(codec.decode(&mut src).unwrap().is_none());
        let response = codec.decode_eof(&mut src).unwrap().unwrap();
        assert_eq!(response.body()["result"], 7);
    }

    #[test]
    fn test_decode_garbage() {
        let mut src = BytesMut::from("definitely not http\r\n\r\n");
        assert!(Codec::new().decode(&mut src).is_err());
    }
}
