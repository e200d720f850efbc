use super::{CAData, ClientConfig, Credentials};

use dirs::home_dir;

use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Failure to load a kubeconfig file, or to build a `ClientConfig` from it
#[derive(Debug)]
pub enum KubeConfigError {
    Io(io::Error),
    Format(serde_yaml::Error),
    /// The selected user has none of the supported credential types
    MissingCredentials(String),
    NoHomeDir,
    Invalid(String),
}

impl From<serde_yaml::Error> for KubeConfigError {
    fn from(err: serde_yaml::Error) -> KubeConfigError {
        KubeConfigError::Format(err)
    }
}

impl From<io::Error> for KubeConfigError {
    fn from(err: io::Error) -> KubeConfigError {
        KubeConfigError::Io(err)
    }
}

impl Display for KubeConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KubeConfigError::Io(e) => write!(f, "IO error: {}", e),
            KubeConfigError::Format(e) => write!(f, "Kubeconfig format error: {}", e),
            KubeConfigError::MissingCredentials(user) => write!(
                f,
                "User '{}' has no supported credentials. Only token, username/password and client certificates are supported",
                user
            ),
            KubeConfigError::NoHomeDir => {
                f.write_str("Unable to determine HOME directory to load ~/.kube/config")
            }
            KubeConfigError::Invalid(msg) => write!(f, "Invalid kubeconfig file: {}", msg),
        }
    }
}

impl std::error::Error for KubeConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KubeConfigError::Io(e) => Some(e as &(dyn std::error::Error + 'static)),
            KubeConfigError::Format(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

fn kubeconfig_path() -> Result<PathBuf, KubeConfigError> {
    std::env::var_os("KUBECONFIG")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".kube").join("config")))
        .ok_or(KubeConfigError::NoHomeDir)
}

pub(super) fn load_from_kubeconfig(user_agent: String) -> Result<ClientConfig, KubeConfigError> {
    let path = kubeconfig_path()?;
    log::debug!("Loading kubeconfig from '{}'", path.display());
    let kubeconfig = KubeConfig::load_file(&path)?;
    kubeconfig.create_client_config(user_agent, parent_dir(&path))
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

// The structs below only cover the parts of a kubeconfig that are needed to build a
// `ClientConfig`, so they stay private to this module.

#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
struct ClusterInfo {
    server: String,
    certificate_authority_data: Option<String>,
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedCluster {
    name: String,
    cluster: ClusterInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
struct UserInfo {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
    client_certificate: Option<PathBuf>,
    client_key: Option<PathBuf>,
    #[serde(rename = "as")]
    as_user: Option<String>,
    #[serde(default)]
    as_groups: Vec<String>,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ContextInfo {
    cluster: String,
    user: String,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedContext {
    name: String,
    context: ContextInfo,
}

/// A kubeconfig file that's been loaded into memory
#[derive(Deserialize, Debug, PartialEq, Clone)]
pub struct KubeConfig {
    #[serde(rename = "current-context")]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

impl KubeConfig {
    pub fn load_file(path: &Path) -> Result<KubeConfig, KubeConfigError> {
        let reader = File::open(path)?;
        let conf = serde_yaml::from_reader(reader)?;
        Ok(conf)
    }

    pub fn from_yaml(yaml: &str) -> Result<KubeConfig, KubeConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Builds a `ClientConfig` for the current context. Relative file paths in the kubeconfig
    /// are resolved against `kubeconfig_dir`.
    pub fn create_client_config(
        &self,
        user_agent: String,
        kubeconfig_dir: &Path,
    ) -> Result<ClientConfig, KubeConfigError> {
        let context = find_named(&self.contexts, |c| &c.name, &self.current_context, "context")?;
        let cluster = find_named(&self.clusters, |c| &c.name, &context.context.cluster, "cluster")?;
        let user = find_named(&self.users, |u| &u.name, &context.context.user, "user")?;

        let credentials = credentials(&user.name, &user.user, kubeconfig_dir)?;
        let ca_data = match (
            cluster.cluster.certificate_authority_data.as_ref(),
            cluster.cluster.certificate_authority.as_ref(),
        ) {
            (Some(data), _) => Some(CAData::Contents(data.clone())),
            (None, Some(path)) => Some(CAData::File(resolve(kubeconfig_dir, path))),
            (None, None) => None,
        };

        Ok(ClientConfig {
            api_server_endpoint: cluster.cluster.server.clone(),
            credentials,
            ca_data,
            user_agent,
            verify_ssl_certs: !cluster.cluster.insecure_skip_tls_verify,
            impersonate: user.user.as_user.clone(),
            impersonate_groups: user.user.as_groups.clone(),
        })
    }
}

fn find_named<'a, T>(
    items: &'a [T],
    name_of: impl Fn(&T) -> &String,
    name: &str,
    what: &str,
) -> Result<&'a T, KubeConfigError> {
    items
        .iter()
        .find(|item| name_of(item).as_str() == name)
        .ok_or_else(|| KubeConfigError::Invalid(format!("No {} found with name: '{}'", what, name)))
}

fn resolve(dir: &Path, path: &Path) -> String {
    dir.join(path).to_string_lossy().into_owned()
}

fn credentials(name: &str, user: &UserInfo, dir: &Path) -> Result<Credentials, KubeConfigError> {
    if let Some(token) = user.token.as_ref() {
        log::debug!("Using bearer token for user '{}'", name);
        return Ok(Credentials::bearer_token(token));
    }
    if let Some(username) = user.username.as_ref() {
        let password = user.password.as_ref().ok_or_else(|| {
            KubeConfigError::Invalid(format!("User '{}' has a username but no password", name))
        })?;
        log::debug!("Using basic auth for user '{}'", name);
        return Ok(Credentials::basic(username, password));
    }
    if let Some(cert) = user.client_certificate.as_ref() {
        let key = user.client_key.as_ref().ok_or_else(|| {
            KubeConfigError::Invalid(format!(
                "User '{}' has 'client-certificate' but no 'client-key'",
                name
            ))
        })?;
        return Ok(Credentials::PemPath {
            certificate_path: resolve(dir, cert),
            private_key_path: resolve(dir, key),
        });
    }
    if let Some(cert) = user.client_certificate_data.as_ref() {
        let key = user.client_key_data.as_ref().ok_or_else(|| {
            KubeConfigError::Invalid(format!(
                "User '{}' has 'client-certificate-data' but no 'client-key-data'",
                name
            ))
        })?;
        return Ok(Credentials::Pem {
            certificate_base64: cert.clone(),
            private_key_base64: key.clone(),
        });
    }
    Err(KubeConfigError::MissingCredentials(name.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loads_kubeconfig_with_cluster_ca_file() {
        let path = Path::new("src/config/test-data/kubeconfig-with-ca-file.yaml");
        let kubeconfig = KubeConfig::load_file(path).expect("failed to load kubeconfig");

        let config = kubeconfig
            .create_client_config("my-user-agent".to_owned(), parent_dir(path))
            .expect("failed to create client config");

        assert_eq!("https://127.0.0.1:6443", config.api_server_endpoint);
        assert_eq!(
            Some(CAData::File("src/config/test-data/./dummy-ca.crt".to_owned())),
            config.ca_data
        );
        assert_eq!(Credentials::bearer_token("dev-token"), config.credentials);
        assert_eq!("my-user-agent", config.user_agent);
        assert!(config.verify_ssl_certs);
    }

    #[test]
    fn uses_current_context_and_inline_certificates() {
        let yaml = r#"
current-context: prod
clusters:
- name: dev
  cluster:
    server: https://dev.example.com
- name: prod
  cluster:
    server: https://prod.example.com
    certificate-authority-data: Y2EtZGF0YQ==
    insecure-skip-tls-verify: true
users:
- name: admin
  user:
    client-certificate-data: Y2VydA==
    client-key-data: a2V5
    as: someone-else
contexts:
- name: dev
  context:
    cluster: dev
    user: admin
- name: prod
  context:
    cluster: prod
    user: admin
"#;
        let config = KubeConfig::from_yaml(yaml)
            .unwrap()
            .create_client_config("ua".to_owned(), Path::new("/tmp"))
            .unwrap();

        assert_eq!("https://prod.example.com", config.api_server_endpoint);
        assert_eq!(Some(CAData::Contents("Y2EtZGF0YQ==".to_owned())), config.ca_data);
        assert_eq!(
            Credentials::Pem {
                certificate_base64: "Y2VydA==".to_owned(),
                private_key_base64: "a2V5".to_owned(),
            },
            config.credentials
        );
        assert_eq!(Some("someone-else".to_owned()), config.impersonate);
        assert!(!config.verify_ssl_certs);
    }

    #[test]
    fn missing_context_is_an_error() {
        let yaml = "current-context: nope\nclusters: []\nusers: []\ncontexts: []\n";
        let err = KubeConfig::from_yaml(yaml)
            .unwrap()
            .create_client_config("ua".to_owned(), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, KubeConfigError::Invalid(_)));
    }

    #[test]
    fn user_without_credentials_is_an_error() {
        let yaml = r#"
current-context: ctx
clusters:
- name: c
  cluster:
    server: https://c.example.com
users:
- name: nobody
  user: {}
contexts:
- name: ctx
  context:
    cluster: c
    user: nobody
"#;
        let err = KubeConfig::from_yaml(yaml)
            .unwrap()
            .create_client_config("ua".to_owned(), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, KubeConfigError::MissingCredentials(ref user) if user == "nobody"));
    }
}
