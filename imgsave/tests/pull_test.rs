use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use imgsave::{LayerMaterializer, MaterializeError, PullConfig, PullError, pull_image};
use ociclient::media_type::{MANIFEST_LIST_V2, MANIFEST_V2};
use ociclient::{Client, Credential, Descriptor, ImageManifest};

const REPO: &str = "library/demo";
const CONFIG_TYPE: &str = "application/vnd.docker.container.image.v1+json";
const LAYER_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    content_type: String,
    body: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    authorization: Option<String>,
    accept: Option<String>,
}

#[derive(Default)]
struct MockRegistry {
    challenge: Option<String>,
    routes: HashMap<String, Canned>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockRegistry {
    fn route(&mut self, path: &str, status: StatusCode, content_type: &str, body: impl Into<Vec<u8>>) {
        self.routes.insert(
            path.to_string(),
            Canned {
                status,
                content_type: content_type.to_string(),
                body: body.into(),
            },
        );
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle(State(registry): State<Arc<MockRegistry>>, request: Request) -> Response {
    let header_value = |name| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = request.uri().path().to_string();
    registry.requests.lock().unwrap().push(Recorded {
        path: path.clone(),
        authorization: header_value(header::AUTHORIZATION),
        accept: header_value(header::ACCEPT),
    });

    if path == "/v2/" {
        return match &registry.challenge {
            Some(challenge) => Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header(header::WWW_AUTHENTICATE, challenge)
                .body(Body::from(r#"{"errors":[{"code":"UNAUTHORIZED"}]}"#))
                .unwrap(),
            None => Response::new(Body::from("{}")),
        };
    }

    match registry.routes.get(&path) {
        Some(canned) => Response::builder()
            .status(canned.status)
            .header(header::CONTENT_TYPE, &canned.content_type)
            .body(Body::from(canned.body.clone()))
            .unwrap(),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
    }
}

// Helper function to start the mock registry; `setup` receives the base URL
async fn start_test_server(
    setup: impl FnOnce(&str, &mut MockRegistry),
) -> (JoinHandle<()>, String, Arc<MockRegistry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let mut registry = MockRegistry::default();
    setup(&base, &mut registry);
    let registry = Arc::new(registry);

    let app = Router::new().fallback(handle).with_state(Arc::clone(&registry));
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (server, base, registry)
}

fn sha256(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

struct LayerFixture {
    digest: String,
    legacy_id: String,
    plaintext: Vec<u8>,
    compressed: Vec<u8>,
}

struct ImageFixture {
    manifest: String,
    config_digest: String,
    config: Vec<u8>,
    layers: Vec<LayerFixture>,
}

fn image_fixture(architecture: &str, layers: &[&[u8]]) -> ImageFixture {
    let layers: Vec<LayerFixture> = layers
        .iter()
        .map(|plaintext| {
            let compressed = gzip(plaintext);
            LayerFixture {
                digest: sha256(&compressed),
                legacy_id: sha256(plaintext).trim_start_matches("sha256:").to_string(),
                plaintext: plaintext.to_vec(),
                compressed,
            }
        })
        .collect();

    let config = serde_json::to_vec(&json!({
        "architecture": architecture,
        "os": "linux",
        "rootfs": {
            "type": "layers",
            "diff_ids": layers.iter().map(|l| format!("sha256:{}", l.legacy_id)).collect::<Vec<_>>(),
        },
    }))
    .unwrap();
    let config_digest = sha256(&config);

    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_V2,
        "config": {"mediaType": CONFIG_TYPE, "size": config.len(), "digest": config_digest},
        "layers": layers
            .iter()
            .map(|l| json!({"mediaType": LAYER_TYPE, "size": l.compressed.len(), "digest": l.digest}))
            .collect::<Vec<_>>(),
    })
    .to_string();

    ImageFixture {
        manifest,
        config_digest,
        config,
        layers,
    }
}

fn blob_path(digest: &str) -> String {
    format!("/v2/{}/blobs/{}", REPO, digest)
}

fn serve_blobs(registry: &mut MockRegistry, image: &ImageFixture) {
    registry.route(
        &blob_path(&image.config_digest),
        StatusCode::OK,
        "application/octet-stream",
        image.config.clone(),
    );
    for layer in &image.layers {
        registry.route(
            &blob_path(&layer.digest),
            StatusCode::OK,
            "application/octet-stream",
            layer.compressed.clone(),
        );
    }
}

fn serve_image(registry: &mut MockRegistry, reference: &str, image: &ImageFixture) {
    registry.route(
        &format!("/v2/{}/manifests/{}", REPO, reference),
        StatusCode::OK,
        MANIFEST_V2,
        image.manifest.clone(),
    );
    serve_blobs(registry, image);
}

fn pull_config(base: &str, reference: &str, output_dir: &Path) -> PullConfig {
    PullConfig {
        registry_url: base.to_string(),
        image: REPO.to_string(),
        reference: reference.to_string(),
        os: "linux".to_string(),
        arch: "amd64".to_string(),
        output_dir: output_dir.to_path_buf(),
        timeout: Duration::from_secs(10),
    }
}

fn hex_of(digest: &str) -> &str {
    digest.trim_start_matches("sha256:")
}

#[tokio::test]
async fn test_pull_writes_legacy_layout() {
    let image = image_fixture("amd64", &[b"base layer tar bytes"]);
    let (server, base, registry) = start_test_server(|base, r| {
        r.challenge = Some(format!(r#"Bearer realm="{}/token",service="registry.docker.io""#, base));
        r.route("/token", StatusCode::OK, "application/json", r#"{"token":"abc123"}"#);
        serve_image(r, "v1", &image);
    })
    .await;

    let out = tempdir().unwrap();
    let output_dir = out.path().join("demo");
    let report = pull_image(&pull_config(&base, "v1", &output_dir)).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.layers.len(), 1);

    // manifest.json round-trips to the resolved manifest
    let written: ImageManifest =
        serde_json::from_slice(&fs::read(output_dir.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(written, report.manifest);

    // config blob stored verbatim under its digest
    let config_file = output_dir.join(format!("{}.json", hex_of(&image.config_digest)));
    assert_eq!(report.config_file, config_file);
    assert_eq!(fs::read(&config_file).unwrap(), image.config);

    // one legacy layer directory named by diff id
    let layer = &image.layers[0];
    let layer_dir = output_dir.join(&layer.legacy_id);
    assert_eq!(fs::read_to_string(layer_dir.join("VERSION")).unwrap(), "1.0");
    let sidecar: serde_json::Value =
        serde_json::from_slice(&fs::read(layer_dir.join("json")).unwrap()).unwrap();
    assert_eq!(sidecar, json!({"id": layer.legacy_id, "parent": ""}));
    assert_eq!(fs::read(layer_dir.join("layer.tar")).unwrap(), layer.plaintext);
    assert_eq!(
        report.layers[0].result.as_ref().ok(),
        Some(&(layer.plaintext.len() as u64))
    );

    // every registry call after discovery carries the token
    for request in registry.requests().iter().filter(|r| r.path.starts_with("/v2/library")) {
        assert_eq!(request.authorization.as_deref(), Some("Bearer abc123"), "{}", request.path);
    }
    let layer_request = registry
        .requests()
        .into_iter()
        .find(|r| r.path == blob_path(&layer.digest))
        .unwrap();
    assert_eq!(layer_request.accept.as_deref(), Some(LAYER_TYPE));

    server.abort();
}

#[tokio::test]
async fn test_layer_failure_does_not_stop_the_pull() {
    let image = image_fixture("amd64", &[b"layer one", b"layer two", b"layer three"]);
    let broken = image.layers[1].digest.clone();
    let (server, base, _) = start_test_server(|_, r| {
        serve_image(r, "v1", &image);
        r.route(&blob_path(&broken), StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "boom");
    })
    .await;

    let out = tempdir().unwrap();
    let report = pull_image(&pull_config(&base, "v1", out.path())).await.unwrap();

    assert!(!report.is_complete());
    let failed: Vec<_> = report.failed_layers().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].digest, broken);
    assert!(matches!(
        failed[0].result,
        Err(MaterializeError::BlobFetchFailed { .. })
    ));

    let [first, second, third] = &image.layers[..] else {
        panic!("expected three layers");
    };
    assert_eq!(
        fs::read(out.path().join(&first.legacy_id).join("layer.tar")).unwrap(),
        first.plaintext
    );
    assert!(!out.path().join(&second.legacy_id).join("layer.tar").exists());
    assert_eq!(
        fs::read(out.path().join(&third.legacy_id).join("layer.tar")).unwrap(),
        third.plaintext
    );
    assert!(out.path().join("manifest.json").exists());

    // the parent chain is kept across the failed layer
    let sidecar: serde_json::Value =
        serde_json::from_slice(&fs::read(out.path().join(&third.legacy_id).join("json")).unwrap()).unwrap();
    assert_eq!(sidecar["parent"], second.legacy_id.as_str());
    let sidecar: serde_json::Value =
        serde_json::from_slice(&fs::read(out.path().join(&second.legacy_id).join("json")).unwrap()).unwrap();
    assert_eq!(sidecar["parent"], first.legacy_id.as_str());

    server.abort();
}

#[tokio::test]
async fn test_corrupt_layer_reports_decompression_failure() {
    let image = image_fixture("amd64", &[b"layer one", b"layer two"]);
    let corrupt = image.layers[0].digest.clone();
    let (server, base, _) = start_test_server(|_, r| {
        serve_image(r, "v1", &image);
        r.route(&blob_path(&corrupt), StatusCode::OK, "application/octet-stream", "not gzip at all");
    })
    .await;

    let out = tempdir().unwrap();
    let report = pull_image(&pull_config(&base, "v1", out.path())).await.unwrap();

    assert!(matches!(
        report.layers[0].result,
        Err(MaterializeError::DecompressionFailed { .. })
    ));
    assert!(report.layers[1].result.is_ok());
    assert_eq!(report.failed_layers().count(), 1);

    server.abort();
}

#[tokio::test]
async fn test_manifest_list_resolves_to_requested_platform() {
    let amd64 = image_fixture("amd64", &[b"amd64 layer"]);
    let arm64 = image_fixture("arm64", &[b"arm64 layer"]);
    let amd64_manifest = sha256(amd64.manifest.as_bytes());
    let arm64_manifest = sha256(arm64.manifest.as_bytes());

    let (server, base, _) = start_test_server(|_, r| {
        let list = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_LIST_V2,
            "manifests": [
                {"mediaType": MANIFEST_V2, "size": amd64.manifest.len(), "digest": amd64_manifest,
                 "platform": {"architecture": "amd64", "os": "linux"}},
                {"mediaType": MANIFEST_V2, "size": arm64.manifest.len(), "digest": arm64_manifest,
                 "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}},
            ],
        });
        r.route(&format!("/v2/{}/manifests/latest", REPO), StatusCode::OK, MANIFEST_LIST_V2, list.to_string());
        r.route(&format!("/v2/{}/manifests/{}", REPO, amd64_manifest), StatusCode::OK, MANIFEST_V2, amd64.manifest.clone());
        r.route(&format!("/v2/{}/manifests/{}", REPO, arm64_manifest), StatusCode::OK, MANIFEST_V2, arm64.manifest.clone());
        serve_blobs(r, &amd64);
        serve_blobs(r, &arm64);
    })
    .await;

    let out = tempdir().unwrap();
    let mut config = pull_config(&base, "latest", out.path());
    config.arch = "arm64".to_string();
    let report = pull_image(&config).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.manifest.config.digest, arm64.config_digest);
    assert_eq!(
        fs::read(out.path().join(&arm64.layers[0].legacy_id).join("layer.tar")).unwrap(),
        arm64.layers[0].plaintext
    );
    assert!(!out.path().join(&amd64.layers[0].legacy_id).exists());

    server.abort();
}

#[tokio::test]
async fn test_diff_id_count_mismatch_is_fatal() {
    let mut image = image_fixture("amd64", &[b"layer one", b"layer two"]);
    image.config = serde_json::to_vec(&json!({
        "rootfs": {"type": "layers", "diff_ids": [format!("sha256:{}", image.layers[0].legacy_id)]},
    }))
    .unwrap();
    let (server, base, _) = start_test_server(|_, r| serve_image(r, "v1", &image)).await;

    let out = tempdir().unwrap();
    let result = pull_image(&pull_config(&base, "v1", out.path())).await;

    assert!(matches!(
        result,
        Err(PullError::LayerCountMismatch { expected: 2, found: 1 })
    ));
    assert!(!out.path().join("manifest.json").exists());

    server.abort();
}

#[tokio::test]
async fn test_config_digest_cannot_leave_output_dir() {
    let image = image_fixture("amd64", &[b"layer"]);
    let evil = "sha256:../../escaped";
    let manifest = image.manifest.replace(&image.config_digest, evil);
    let (server, base, _) = start_test_server(|_, r| {
        r.route(&format!("/v2/{}/manifests/v1", REPO), StatusCode::OK, MANIFEST_V2, manifest.clone());
    })
    .await;

    let out = tempdir().unwrap();
    let output_dir = out.path().join("a").join("b");
    let result = pull_image(&pull_config(&base, "v1", &output_dir)).await;

    assert!(matches!(
        result,
        Err(PullError::ConfigBlob(MaterializeError::InvalidDigest { .. }))
    ));
    assert!(!out.path().join("escaped.json").exists());
    assert_eq!(fs::read_dir(&output_dir).unwrap().count(), 0);

    server.abort();
}

#[tokio::test]
async fn test_protocol_failures_leave_no_output() {
    let image = image_fixture("amd64", &[b"layer"]);
    let (server, base, _) = start_test_server(|base, r| {
        r.challenge = Some(format!(r#"Bearer realm="{}/token",service="registry.docker.io""#, base));
        r.route("/token", StatusCode::FORBIDDEN, "application/json", "{}");
        serve_image(r, "v1", &image);
    })
    .await;

    let out = tempdir().unwrap();
    let output_dir = out.path().join("demo");
    let result = pull_image(&pull_config(&base, "v1", &output_dir)).await;
    assert!(matches!(result, Err(PullError::Auth(_))));
    assert!(!output_dir.exists());
    server.abort();

    // no challenge, no such tag

    let (server, base, _) = start_test_server(|_, _| {}).await;
    let result = pull_image(&pull_config(&base, "v1", &output_dir)).await;
    assert!(matches!(result, Err(PullError::Resolve(_))));
    assert!(!output_dir.exists());
    server.abort();
}

#[tokio::test]
async fn test_anonymous_registry_sends_no_authorization() {
    let image = image_fixture("amd64", &[b"layer"]);
    let (server, base, registry) = start_test_server(|_, r| serve_image(r, "v1", &image)).await;

    let out = tempdir().unwrap();
    let report = pull_image(&pull_config(&base, "v1", out.path())).await.unwrap();
    assert!(report.is_complete());

    let requests = registry.requests();
    assert!(requests.iter().all(|r| r.authorization.is_none()));
    assert!(requests.iter().all(|r| r.path != "/token"));

    server.abort();
}

#[tokio::test]
async fn test_materializer_gunzips_known_plaintext() {
    let plaintext = b"0123456789abcdef".repeat(4096);
    let compressed = gzip(&plaintext);
    let digest = sha256(&compressed);
    let (server, base, _) = start_test_server(|_, r| {
        r.route(&blob_path(&digest), StatusCode::OK, "application/octet-stream", compressed.clone());
    })
    .await;

    let client = Client::new(base).unwrap();
    let session = client.new_session(REPO.to_string(), Credential::Anonymous);
    let materializer = LayerMaterializer::new(&session);
    let out = tempdir().unwrap();
    fs::create_dir_all(out.path().join("d1ff")).unwrap();

    let layer = Descriptor {
        media_type: LAYER_TYPE.to_string(),
        size: compressed.len() as i64,
        digest: digest.clone(),
    };
    let written = materializer
        .materialize(&layer, out.path(), Some("d1ff"))
        .await
        .unwrap();

    assert_eq!(written, plaintext.len() as u64);
    assert_eq!(fs::read(out.path().join("d1ff").join("layer.tar")).unwrap(), plaintext);

    let empty = Descriptor {
        digest: String::new(),
        ..layer.clone()
    };
    assert!(matches!(
        materializer.materialize(&empty, out.path(), Some("d1ff")).await,
        Err(MaterializeError::EmptyDigest)
    ));
    assert!(matches!(
        materializer.materialize(&layer, out.path(), None).await,
        Err(MaterializeError::MissingLegacyId { .. })
    ));
    assert!(matches!(
        materializer.materialize(&layer, &out.path().join("absent"), Some("d1ff")).await,
        Err(MaterializeError::WriteFailed { .. })
    ));

    server.abort();
}
