use crate::connection::{ClientError, Exchange, HttpClient, Request};
use reqwest::blocking::Client;
use std::time::{Duration, Instant};

pub struct BlockingClient {
    inner: Client,
}

impl BlockingClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let inner = Client::builder().timeout(timeout).build()?;
        Ok(Self { inner })
    }
}

impl HttpClient for BlockingClient {
    fn send(&self, request: Request) -> Result<Exchange, ClientError> {
        let mut builder = self.inner.request(request.method.clone(), request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let now = Instant::now();
        let response = builder.send()?;
        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let response_body = response.text()?;
        let elapsed = now.elapsed();
        debug!(
            "{} {} responded {} in {} ms",
            request.method,
            request.url,
            status,
            elapsed.as_millis()
        );
        trace!("Response body {:#?}", response_body);
        Ok(Exchange {
            method: request.method.to_string(),
            url: request.url,
            request_headers: request.headers,
            request_body: request.body,
            status,
            response_headers,
            response_body,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
