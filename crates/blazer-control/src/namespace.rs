//! Pass-through to the REST API of a running instance.

use std::{sync::OnceLock, time::Duration};

use blazer_process::{Instance, InstanceId, InstanceStatus};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("{0}")]
    Invalid(String),
    #[error("instance {0} is not running")]
    NotRunning(InstanceId),
    #[error("request to instance failed: {0}")]
    Upstream(String),
    #[error("instance rejected the request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl NamespaceError {
    pub fn code(&self) -> &'static str {
        match self {
            NamespaceError::Invalid(_) => "invalid",
            NamespaceError::NotRunning(_) => "not_running",
            NamespaceError::Upstream(_) | NamespaceError::Rejected { .. } => "upstream_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    #[default]
    Triples,
    Quads,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamespaceOptions {
    pub name: String,
    #[serde(default)]
    pub mode: NamespaceMode,
    #[serde(default)]
    pub inference: bool,
    #[serde(default)]
    pub isolatable_indices: bool,
    #[serde(default)]
    pub text_index: bool,
    #[serde(default)]
    pub geo_spatial: bool,
}

impl NamespaceOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: NamespaceMode::default(),
            inference: false,
            isolatable_indices: false,
            text_index: false,
            geo_spatial: false,
        }
    }
}

pub fn validate_namespace_name(name: &str) -> Result<(), NamespaceError> {
    if name.is_empty() || name.len() > 255 {
        return Err(NamespaceError::Invalid(
            "namespace name must be 1..=255 bytes".to_string(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(NamespaceError::Invalid(format!(
            "namespace name may only contain letters, digits, '_' and '-': {name}"
        )));
    }
    Ok(())
}

/// The `text/plain` property list the namespace endpoint expects.
pub fn namespace_properties(opts: &NamespaceOptions) -> String {
    let ns = &opts.name;
    [
        format!("com.bigdata.rdf.sail.namespace={ns}"),
        format!("com.bigdata.rdf.sail.truthMaintenance={}", opts.inference),
        format!(
            "com.bigdata.rdf.store.AbstractTripleStore.textIndex={}",
            opts.text_index
        ),
        "com.bigdata.rdf.store.AbstractTripleStore.justify=false".to_string(),
        format!("com.bigdata.namespace.{ns}.spo.com.bigdata.btree.BTree.branchingFactor=1024"),
        "com.bigdata.rdf.store.AbstractTripleStore.statementIdentifiers=false".to_string(),
        "com.bigdata.rdf.store.AbstractTripleStore.axiomsClass=com.bigdata.rdf.axioms.NoAxioms"
            .to_string(),
        format!(
            "com.bigdata.rdf.store.AbstractTripleStore.quads={}",
            opts.mode == NamespaceMode::Quads
        ),
        format!(
            "com.bigdata.rdf.store.AbstractTripleStore.geoSpatial={}",
            opts.geo_spatial
        ),
        "com.bigdata.journal.Journal.groupCommit=false".to_string(),
        format!(
            "com.bigdata.rdf.sail.isolatableIndices={}",
            opts.isolatable_indices
        ),
        format!("com.bigdata.namespace.{ns}.lex.com.bigdata.btree.BTree.branchingFactor=400"),
    ]
    .join("\n")
}

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const KB_NS: &str = "http://www.bigdata.com/rdf#/features/KB/";

/// Names from the RDF/XML namespace listing: the `kb:Namespace` of each
/// top-level `rdf:Description`.
pub fn parse_namespace_names(xml: &str) -> Result<Vec<String>, NamespaceError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| NamespaceError::Upstream(format!("unreadable namespace listing: {e}")))?;
    let names = doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name((RDF_NS, "Description")))
        .filter_map(|desc| {
            desc.children()
                .find(|n| n.has_tag_name((KB_NS, "Namespace")))
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .collect();
    Ok(names)
}

fn base_url(inst: &Instance) -> String {
    format!("http://{}:{}/blazegraph", inst.ip_address, inst.port)
}

fn ensure_running(inst: &Instance) -> Result<(), NamespaceError> {
    if inst.status != InstanceStatus::Running {
        return Err(NamespaceError::NotRunning(inst.id));
    }
    Ok(())
}

fn http_client() -> Result<&'static reqwest::Client, NamespaceError> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client);
    }
    let client = reqwest::Client::builder()
        .user_agent(concat!("blazer-control/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| NamespaceError::Upstream(format!("build http client: {e}")))?;
    Ok(CLIENT.get_or_init(|| client))
}

/// What the instance answered to a forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceClient;

impl NamespaceClient {
    pub async fn create(
        &self,
        inst: &Instance,
        opts: &NamespaceOptions,
    ) -> Result<String, NamespaceError> {
        ensure_running(inst)?;
        validate_namespace_name(&opts.name)?;

        let url = format!("{}/namespace", base_url(inst));
        tracing::info!(instance = %inst.name, namespace = %opts.name, %url, "creating namespace");
        let resp = http_client()?
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(namespace_properties(opts))
            .send()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;
        if !status.is_success() {
            tracing::warn!(instance = %inst.name, namespace = %opts.name, status = status.as_u16(), "namespace creation rejected");
            return Err(NamespaceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(format!("Namespace {} created successfully", opts.name))
    }

    pub async fn list(&self, inst: &Instance) -> Result<Vec<String>, NamespaceError> {
        ensure_running(inst)?;

        let url = format!("{}/namespace", base_url(inst));
        tracing::debug!(instance = %inst.name, %url, "listing namespaces");
        let resp = http_client()?
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/rdf+xml")
            .send()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;
        if !status.is_success() {
            return Err(NamespaceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        parse_namespace_names(&body)
    }

    /// POST `body` to the namespace's SPARQL endpoint and relay the answer,
    /// whatever its status.
    pub async fn forward_sparql(
        &self,
        inst: &Instance,
        namespace: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<UpstreamReply, NamespaceError> {
        ensure_running(inst)?;
        validate_namespace_name(namespace)?;

        let url = format!("{}/namespace/{namespace}/sparql", base_url(inst));
        tracing::debug!(instance = %inst.name, namespace, content_type, bytes = body.len(), "forwarding sparql request");
        let resp = http_client()?
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| NamespaceError::Upstream(e.to_string()))?;
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instance_at(server: &MockServer, status: InstanceStatus) -> Instance {
        instance_on_port(server.address().port(), status)
    }

    fn instance_on_port(port: u16, status: InstanceStatus) -> Instance {
        Instance {
            id: InstanceId(1),
            name: "alpha".to_string(),
            port,
            pid: Some(4242),
            status,
            folder: "instances/alpha".to_string(),
            install_path: "/opt/inst".to_string(),
            min_memory: None,
            max_memory: None,
            ip_address: "127.0.0.1".to_string(),
        }
    }

    #[test]
    fn properties_follow_the_options() {
        let mut opts = NamespaceOptions::named("kb");
        opts.mode = NamespaceMode::Quads;
        opts.text_index = true;
        let props = namespace_properties(&opts);

        let lines: Vec<&str> = props.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], "com.bigdata.rdf.sail.namespace=kb");
        assert!(lines.contains(&"com.bigdata.rdf.store.AbstractTripleStore.quads=true"));
        assert!(lines.contains(&"com.bigdata.rdf.store.AbstractTripleStore.textIndex=true"));
        assert!(lines.contains(&"com.bigdata.rdf.sail.truthMaintenance=false"));
        assert!(lines.contains(
            &"com.bigdata.namespace.kb.lex.com.bigdata.btree.BTree.branchingFactor=400"
        ));
    }

    #[test]
    fn options_default_to_triples_without_extras() {
        let opts: NamespaceOptions = serde_json::from_str(r#"{"name":"kb"}"#).unwrap();
        assert_eq!(opts, NamespaceOptions::named("kb"));
    }

    #[test]
    fn namespace_names_cannot_escape_the_path() {
        assert!(validate_namespace_name("kb_1-a").is_ok());
        assert!(validate_namespace_name("../kb").is_err());
        assert!(validate_namespace_name("kb/sparql").is_err());
        assert!(validate_namespace_name("").is_err());
    }

    #[tokio::test]
    async fn create_posts_the_property_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blazegraph/namespace"))
            .and(header("content-type", "text/plain"))
            .and(body_string_contains("com.bigdata.rdf.sail.namespace=kb"))
            .respond_with(ResponseTemplate::new(201).set_body_string("CREATED: kb"))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance_at(&server, InstanceStatus::Running);
        let msg = NamespaceClient
            .create(&inst, &NamespaceOptions::named("kb"))
            .await
            .unwrap();
        assert_eq!(msg, "Namespace kb created successfully");
    }

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:dc="http://purl.org/dc/terms/"
         xmlns:void="http://rdfs.org/ns/void#"
         xmlns:bds="http://www.bigdata.com/rdf#/features/KB/">
  <rdf:Description rdf:nodeID="kb">
    <bds:Namespace>kb</bds:Namespace>
    <dc:title>kb</dc:title>
  </rdf:Description>
  <rdf:Description rdf:nodeID="other">
    <dc:title>no namespace here</dc:title>
  </rdf:Description>
  <rdf:Description rdf:nodeID="wiki">
    <bds:Namespace>wiki_2024</bds:Namespace>
  </rdf:Description>
</rdf:RDF>"#;

    #[test]
    fn listing_yields_each_described_namespace() {
        assert_eq!(
            parse_namespace_names(LISTING).unwrap(),
            vec!["kb".to_string(), "wiki_2024".to_string()]
        );
    }

    #[test]
    fn malformed_listing_is_an_upstream_failure() {
        let err = parse_namespace_names("<rdf:RDF><unclosed>").unwrap_err();
        assert!(matches!(err, NamespaceError::Upstream(_)));
    }

    #[tokio::test]
    async fn list_reads_the_namespace_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blazegraph/namespace"))
            .and(header("accept", "application/rdf+xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(LISTING, "application/rdf+xml"))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance_at(&server, InstanceStatus::Running);
        let names = NamespaceClient.list(&inst).await.unwrap();
        assert_eq!(names, vec!["kb", "wiki_2024"]);
    }

    #[tokio::test]
    async fn rejected_creation_carries_the_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blazegraph/namespace"))
            .respond_with(ResponseTemplate::new(409).set_body_string("EXISTS: kb"))
            .mount(&server)
            .await;

        let inst = instance_at(&server, InstanceStatus::Running);
        let err = NamespaceClient
            .create(&inst, &NamespaceOptions::named("kb"))
            .await
            .unwrap_err();
        match err {
            NamespaceError::Rejected { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "EXISTS: kb");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stopped_instances_are_not_contacted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let inst = instance_at(&server, InstanceStatus::Stopped);
        let err = NamespaceClient
            .create(&inst, &NamespaceOptions::named("kb"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_running");
    }

    #[tokio::test]
    async fn sparql_is_relayed_with_its_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blazegraph/namespace/kb/sparql"))
            .and(header("content-type", "application/sparql-query"))
            .and(body_string("SELECT * { ?s ?p ?o } LIMIT 1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"results":{"bindings":[]}}"#, "application/sparql-results+json"),
            )
            .mount(&server)
            .await;

        let inst = instance_at(&server, InstanceStatus::Running);
        let reply = NamespaceClient
            .forward_sparql(
                &inst,
                "kb",
                "application/sparql-query",
                b"SELECT * { ?s ?p ?o } LIMIT 1".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.content_type.as_deref(),
            Some("application/sparql-results+json")
        );
        assert!(reply.body.contains("bindings"));
    }

    #[tokio::test]
    async fn unreachable_instance_is_an_upstream_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let inst = instance_on_port(port, InstanceStatus::Running);

        let err = NamespaceClient
            .forward_sparql(&inst, "kb", "text/turtle", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NamespaceError::Upstream(_)));
    }
}
