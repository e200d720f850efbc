//! A minimal client for the Kubernetes REST api, built on hyper and openssl. It only supports
//! the handful of operations that `ApiServerStore` needs.
mod request;

use crate::config::{CAData, ClientConfig, Credentials};
use crate::k8s_types::K8sType;
use crate::resource::ResourceKey;
use crate::runner::metrics::ClientMetrics;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use hyper::client::Client as HyperClient;
use hyper::client::HttpConnector;
use hyper::Body;
use hyper_openssl::HttpsConnector;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use serde::de::DeserializeOwned;
use serde_json::Value;

use std::fmt::{self, Display};
use std::io;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub enum Error {
    Io(hyper::Error),
    Serde(serde_json::Error),
    /// The request could not be built
    Request(http::Error),
    /// `api_server_endpoint` in the client config is not a usable base url
    InvalidEndpoint(String),
    /// The api server responded with a non-success status. The `Status` object from the
    /// response body is included when the body could be parsed.
    Http(StatusCode, Option<ApiError>),
}

impl Error {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(status, _) => Some(*status),
            _ => None,
        }
    }

    pub fn is_http_status(&self, code: u16) -> bool {
        self.status().map(|s| s.as_u16() == code).unwrap_or(false)
    }

    /// The `reason` from the api server's `Status` response, for example `AlreadyExists`
    pub fn reason(&self) -> Option<&str> {
        match self {
            Error::Http(_, Some(api_error)) => Some(api_error.reason.as_str()),
            _ => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Serde(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Request(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Http(_, Some(e)) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "Io Error: {}", e),
            Error::Serde(e) => write!(f, "(De)Serialization error: {}", e),
            Error::Request(e) => write!(f, "Invalid request: {}", e),
            Error::InvalidEndpoint(endpoint) => write!(f, "Invalid api server endpoint: '{}'", endpoint),
            Error::Http(status, Some(api_error)) => write!(f, "Http Error: {}, {}", status, api_error),
            Error::Http(status, None) => write!(f, "Http Error: {}", status),
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Serde(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Error {
        Error::Request(e)
    }
}

/// The `Status` object that the api server returns in the body of failed requests
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub code: u16,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Api Error: status: '{}', code: {}, reason: '{}', message: '{}'",
            self.status, self.code, self.reason, self.message
        )
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug)]
struct ClientInner {
    http_client: HyperClient<HttpsConnector<HttpConnector>>,
    config: ClientConfig,
    metrics: ClientMetrics,
}

#[derive(Debug, Clone)]
pub struct Client(Arc<ClientInner>);

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn decode_base64(value: &str, field: &str) -> Result<Vec<u8>, io::Error> {
    base64::decode(value.trim())
        .map_err(|err| invalid_data(format!("Invalid base64 content of {}: {}", field, err)))
}

fn set_client_certificate(ssl: &mut SslConnectorBuilder, cert_pem: &[u8], key_pem: &[u8]) -> Result<(), io::Error> {
    let cert = X509::from_pem(cert_pem)?;
    let pkey = PKey::private_key_from_pem(key_pem)?;
    ssl.set_certificate(&cert)?;
    ssl.set_private_key(&pkey)?;
    // fails if the key doesn't belong to the certificate
    ssl.check_private_key()?;
    Ok(())
}

impl Client {
    pub fn new(config: ClientConfig, metrics: ClientMetrics) -> Result<Client, io::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut ssl = SslConnector::builder(SslMethod::tls())?;
        // enable http2 using alpn
        ssl.set_alpn_protos(b"\x02h2\x08http/1.1")?;

        match config.ca_data.as_ref() {
            Some(CAData::Contents(certs)) => {
                let decoded = decode_base64(certs, "certificate-authority-data")?;
                let cert_store = ssl.cert_store_mut();
                for cert in X509::stack_from_pem(decoded.as_slice())? {
                    cert_store.add_cert(cert)?;
                }
            }
            Some(CAData::File(path)) => ssl.set_ca_file(path.as_str())?,
            None => {}
        }

        match &config.credentials {
            Credentials::PemPath {
                certificate_path,
                private_key_path,
            } => {
                let cert = std::fs::read(certificate_path)?;
                let key = std::fs::read(private_key_path)?;
                set_client_certificate(&mut ssl, &cert, &key)?;
            }
            Credentials::Pem {
                certificate_base64,
                private_key_base64,
            } => {
                let cert = decode_base64(certificate_base64, "client-certificate-data")?;
                let key = decode_base64(private_key_base64, "client-key-data")?;
                set_client_certificate(&mut ssl, &cert, &key)?;
            }
            Credentials::Header(_) => {}
        }

        if config.verify_ssl_certs {
            ssl.set_verify(SslVerifyMode::PEER);
        } else {
            log::warn!("TLS certificate verification is disabled! All connections to the api server will be insecure!");
            ssl.set_verify(SslVerifyMode::NONE);
        }

        let https = HttpsConnector::with_connector(http, ssl)?;
        let http_client = HyperClient::builder().build(https);

        Ok(Client(Arc::new(ClientInner {
            http_client,
            config,
            metrics,
        })))
    }

    pub async fn get_resource(&self, k8s_type: &K8sType, key: &ResourceKey) -> Result<Value, Error> {
        let req = request::get_request(&self.0.config, k8s_type, key)?;
        self.get_response_body(req).await
    }

    pub async fn create_resource(&self, k8s_type: &K8sType, resource: &Value) -> Result<Value, Error> {
        let req = request::create_request(&self.0.config, k8s_type, resource)?;
        self.get_response_body(req).await
    }

    pub async fn replace_resource(
        &self,
        k8s_type: &K8sType,
        key: &ResourceKey,
        resource: &Value,
    ) -> Result<Value, Error> {
        let req = request::replace_request(&self.0.config, k8s_type, key, resource)?;
        self.get_response_body(req).await
    }

    pub async fn delete_resource(&self, k8s_type: &K8sType, key: &ResourceKey) -> Result<(), Error> {
        log::info!("Deleting resource '{}' with type: {}", key, k8s_type);
        let req = request::delete_request(&self.0.config, k8s_type, key)?;
        let response = self.get_response(req).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Client::error_from_response(response).await)
        }
    }

    async fn get_response(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        log::debug!("Starting {} request to: {}", method, uri);

        let start_time = Instant::now();
        let timer = self.0.metrics.request_started();
        let result = self.0.http_client.request(req).await;
        timer.observe_duration();
        let duration = start_time.elapsed().as_millis();

        match result {
            Ok(resp) => {
                log::debug!(
                    "Response status received for {} to: {}, status: {}, duration: {}ms",
                    method,
                    uri,
                    resp.status().as_u16(),
                    duration
                );
                Ok(resp)
            }
            Err(err) => {
                log::error!("Failed to execute {} request to: {}, err: {}", method, uri, err);
                Err(err.into())
            }
        }
    }

    async fn get_response_body<T: DeserializeOwned>(&self, req: Request<Body>) -> Result<T, Error> {
        let response = self.get_response(req).await?;
        if !response.status().is_success() {
            return Err(Client::error_from_response(response).await);
        }
        let body = hyper::body::aggregate(response.into_body()).await?;
        let deserialized = serde_json::from_reader(body.reader())?;
        Ok(deserialized)
    }

    async fn error_from_response(response: Response<Body>) -> Error {
        let status = response.status();
        let api_error = match hyper::body::to_bytes(response.into_body()).await {
            Ok(body) => {
                log::debug!(
                    "Error response status: {}, body: {}",
                    status,
                    String::from_utf8_lossy(body.as_ref())
                );
                serde_json::from_slice::<ApiError>(body.as_ref()).ok()
            }
            Err(err) => {
                log::debug!("Failed to read error response body: {}", err);
                None
            }
        };
        Error::Http(status, api_error)
    }
}
