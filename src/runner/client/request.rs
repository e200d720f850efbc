use crate::config::ClientConfig;
use crate::k8s_types::K8sType;
use crate::resource::ResourceKey;
use crate::runner::client::Error;

use http::{header, HeaderValue, Method, Request};
use hyper::Body;
use serde_json::Value;
use url::Url;

const APPLICATION_JSON: &str = "application/json";

pub fn get_request(
    config: &ClientConfig,
    k8s_type: &K8sType,
    key: &ResourceKey,
) -> Result<Request<Body>, Error> {
    let url = make_url(config, k8s_type, key.namespace(), Some(key.name()))?;
    make_req(url, Method::GET, config)?
        .body(Body::empty())
        .map_err(Error::from)
}

pub fn create_request(
    config: &ClientConfig,
    k8s_type: &K8sType,
    resource: &Value,
) -> Result<Request<Body>, Error> {
    let namespace = if k8s_type.namespaced {
        resource
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
    } else {
        None
    };
    let url = make_url(config, k8s_type, namespace, None)?;
    let body = serde_json::to_vec(resource)?;
    make_req(url, Method::POST, config)?
        .header(header::CONTENT_TYPE, APPLICATION_JSON)
        .body(Body::from(body))
        .map_err(Error::from)
}

pub fn replace_request(
    config: &ClientConfig,
    k8s_type: &K8sType,
    key: &ResourceKey,
    resource: &Value,
) -> Result<Request<Body>, Error> {
    let url = make_url(config, k8s_type, key.namespace(), Some(key.name()))?;
    let body = serde_json::to_vec(resource)?;
    make_req(url, Method::PUT, config)?
        .header(header::CONTENT_TYPE, APPLICATION_JSON)
        .body(Body::from(body))
        .map_err(Error::from)
}

pub fn delete_request(
    config: &ClientConfig,
    k8s_type: &K8sType,
    key: &ResourceKey,
) -> Result<Request<Body>, Error> {
    let url = make_url(config, k8s_type, key.namespace(), Some(key.name()))?;
    make_req(url, Method::DELETE, config)?
        .body(Body::empty())
        .map_err(Error::from)
}

fn make_req(url: Url, method: Method, config: &ClientConfig) -> Result<http::request::Builder, Error> {
    let mut builder = Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(header::ACCEPT, APPLICATION_JSON)
        .header(header::USER_AGENT, config.user_agent.as_str());

    if let Some(auth) = config.credentials.header_value() {
        let mut value = HeaderValue::from_str(auth).map_err(http::Error::from)?;
        value.set_sensitive(true);
        builder = builder.header(header::AUTHORIZATION, value);
    }
    if let Some(user) = config.impersonate.as_ref() {
        builder = builder.header("Impersonate-User", user.as_str());
    }
    for group in config.impersonate_groups.iter() {
        builder = builder.header("Impersonate-Group", group.as_str());
    }
    Ok(builder)
}

fn make_url(
    config: &ClientConfig,
    k8s_type: &K8sType,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Url, Error> {
    let endpoint = config.api_server_endpoint.as_str();
    let invalid = || Error::InvalidEndpoint(endpoint.to_owned());
    let mut url = Url::parse(endpoint).map_err(|_| invalid())?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
        segments.pop_if_empty();
        if k8s_type.group.is_empty() {
            segments.push("api");
        } else {
            segments.push("apis");
            segments.push(k8s_type.group);
        }
        segments.push(k8s_type.version);
        if let Some(ns) = namespace.filter(|_| k8s_type.namespaced) {
            segments.push("namespaces");
            segments.push(ns);
        }
        segments.push(k8s_type.plural_kind);
        if let Some(n) = name {
            segments.push(n);
        }
    }
    Ok(url)
}
