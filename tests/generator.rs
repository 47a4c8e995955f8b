//! Orchestration: validation, dispatch, fan-out and random selection.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{context, endpoints_at};
use imagegen::config::{ProviderConfig, StaticCatalog};
use imagegen::credentials::Credentials;
use imagegen::dispatch::registry::ProviderRegistry;
use imagegen::dispatch::{
    GenerateOptions, GenerationRequest, ImageProvider, ProviderContext, ProviderMetadata,
};
use imagegen::generator::{ImageGenerator, MAX_CONCURRENT_PROVIDERS, RandomOptions};
use imagegen::response::{
    ErrorKind, ErrorOptions, GenerationResult, RequestMeta, create_error_result,
    create_success_result,
};

/// Answers with its own catalog key as the payload and records what it was sent.
struct EchoProvider {
    label: String,
    delay: Duration,
    seen: Arc<Mutex<Vec<GenerationRequest>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ImageProvider for EchoProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(req.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let payload = req.model.clone().unwrap_or_default();
        create_success_result(payload, RequestMeta::new(&self.label))
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        true
    }

    fn available_models(&self) -> Vec<String> {
        Vec::new()
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.label.clone(),
            display_name: self.label.clone(),
            models: Vec::new(),
            capabilities: Vec::new(),
            supports_cancellation: false,
        }
    }
}

struct PanickingProvider;

#[async_trait]
impl ImageProvider for PanickingProvider {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn generate_image(&self, _req: &GenerationRequest) -> GenerationResult {
        panic!("vendor SDK blew up");
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        true
    }

    fn available_models(&self) -> Vec<String> {
        Vec::new()
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "panicky".into(),
            display_name: "panicky".into(),
            models: Vec::new(),
            capabilities: Vec::new(),
            supports_cancellation: false,
        }
    }
}

struct FailingProvider;

#[async_trait]
impl ImageProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate_image(&self, _req: &GenerationRequest) -> GenerationResult {
        create_error_result(
            ErrorKind::RateLimit,
            "slow down",
            ErrorOptions {
                retryable: true,
                meta: Some(RequestMeta::new("failing")),
                ..Default::default()
            },
        )
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        false
    }

    fn available_models(&self) -> Vec<String> {
        Vec::new()
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "failing".into(),
            display_name: "failing".into(),
            models: Vec::new(),
            capabilities: Vec::new(),
            supports_cancellation: false,
        }
    }
}

struct Harness {
    generator: ImageGenerator,
    seen: Arc<Mutex<Vec<GenerationRequest>>>,
    peak: Arc<AtomicUsize>,
}

/// Every catalog key `k` maps to type `echo` with model `k`, except the
/// `panic*`/`fail*` keys which route to the misbehaving providers.
fn harness(keys: &[&str], delay: Duration) -> Harness {
    let mut catalog = StaticCatalog::new();
    for key in keys {
        let kind = if key.starts_with("panic") {
            "panicky"
        } else if key.starts_with("fail") {
            "failing"
        } else {
            "echo"
        };
        catalog.insert(*key, ProviderConfig::new(kind).with_model(*key));
    }
    let ctx = context(
        Credentials::default(),
        endpoints_at("http://127.0.0.1:9"),
        catalog,
    );
    let registry = ProviderRegistry::with_defaults(ctx);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let (seen, in_flight, peak) = (seen.clone(), in_flight.clone(), peak.clone());
        registry.register_provider("echo", move |_ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(EchoProvider {
                label: "echo".into(),
                delay,
                seen: seen.clone(),
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            })
        });
    }
    registry.register_provider("panicky", |_ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
        Arc::new(PanickingProvider)
    });
    registry.register_provider("failing", |_ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
        Arc::new(FailingProvider)
    });

    Harness {
        generator: ImageGenerator::new(Arc::new(registry)),
        seen,
        peak,
    }
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// generate_provider_image
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatches_by_catalog_type() {
    let h = harness(&["alpha"], Duration::ZERO);
    let result = h
        .generator
        .generate_provider_image("alpha", "a cat", Some(7.0), Some("u1"), GenerateOptions::default())
        .await;
    assert_eq!(result.data(), Some("alpha"));

    let seen = h.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].prompt, "a cat");
    assert_eq!(seen[0].guidance, Some(7.0));
    assert_eq!(seen[0].user_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn invalid_params_never_reach_a_provider() {
    let h = harness(&["alpha"], Duration::ZERO);
    let g = &h.generator;

    let cases = [
        ("alpha", "   ", None),
        ("alpha", "a cat", Some(21.0)),
        ("missing", "a cat", None),
        ("", "a cat", None),
    ];
    for (key, prompt, guidance) in cases {
        let result = g
            .generate_provider_image(key, prompt, guidance, None, GenerateOptions::default())
            .await;
        assert_eq!(
            result.error_code(),
            Some(ErrorKind::InvalidParams),
            "{key:?} {prompt:?} {guidance:?}"
        );
        assert!(!result.failure().unwrap().retryable);
    }
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_provider_type_is_invalid_params() {
    let catalog = StaticCatalog::new().with("mj", ProviderConfig::new("midjourney"));
    let ctx = context(Credentials::default(), endpoints_at("http://127.0.0.1:9"), catalog);
    let generator = ImageGenerator::new(Arc::new(ProviderRegistry::with_defaults(ctx)));

    let result = generator
        .generate_provider_image("mj", "a cat", None, None, GenerateOptions::default())
        .await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.error_code, ErrorKind::InvalidParams);
    assert!(failure.details.as_deref().unwrap().contains("valid providers"));
}

#[tokio::test]
async fn dezgo_config_without_url_is_rejected() {
    let catalog = StaticCatalog::new().with("dz", ProviderConfig::new("dezgo").with_model("m"));
    let ctx = context(Credentials::default(), endpoints_at("http://127.0.0.1:9"), catalog);
    let generator = ImageGenerator::new(Arc::new(ProviderRegistry::with_defaults(ctx)));

    let result = generator
        .generate_provider_image("dz", "a cat", None, None, GenerateOptions::default())
        .await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.error_code, ErrorKind::InvalidParams);
    assert!(failure.details.as_deref().unwrap().contains("url"));
}

#[tokio::test]
async fn builtin_provider_result_passes_through_unchanged() {
    let catalog = StaticCatalog::new().with("dalle", ProviderConfig::new("openai"));
    let ctx = context(Credentials::default(), endpoints_at("http://127.0.0.1:9"), catalog);
    let generator = ImageGenerator::new(Arc::new(ProviderRegistry::with_defaults(ctx)));

    let result = generator
        .generate_provider_image("dalle", "a cat", None, None, GenerateOptions::default())
        .await;
    assert_eq!(result.error_code(), Some(ErrorKind::MissingCredentials));
    assert_eq!(result.meta().provider, "openai");
}

#[tokio::test]
async fn call_options_override_catalog_defaults() {
    let mut catalog = StaticCatalog::new();
    catalog.insert(
        "sized",
        ProviderConfig::new("echo")
            .with_model("sized")
            .with_size("1024x1024")
            .with_quality("hd"),
    );
    let ctx = context(Credentials::default(), endpoints_at("http://127.0.0.1:9"), catalog);
    let registry = ProviderRegistry::with_defaults(ctx);
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        registry.register_provider("echo", move |_ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(EchoProvider {
                label: "echo".into(),
                delay: Duration::ZERO,
                seen: seen.clone(),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            })
        });
    }
    let generator = ImageGenerator::new(Arc::new(registry));

    generator
        .generate_provider_image("sized", "p", None, None, GenerateOptions::default())
        .await;
    generator
        .generate_provider_image(
            "sized",
            "p",
            None,
            None,
            GenerateOptions {
                size: Some(String::new()),
                ..Default::default()
            },
        )
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].options.size.as_deref(), Some("1024x1024"));
    assert_eq!(seen[0].options.quality.as_deref(), Some("hd"));
    assert_eq!(seen[1].options.size.as_deref(), Some(""));
    assert_eq!(seen[1].options.quality.as_deref(), Some("hd"));
}

// ---------------------------------------------------------------------------
// generate_multiple_provider_images
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multiple_settles_all_including_panics() {
    let h = harness(&["a", "panic-b", "fail-c"], Duration::ZERO);
    let results = h
        .generator
        .generate_multiple_provider_images(
            &keys(&["a", "panic-b", "fail-c"]),
            "a cat",
            None,
            None,
            GenerateOptions::default(),
        )
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].data(), Some("a"));

    let panicked = results[1].failure().unwrap();
    assert_eq!(panicked.error_code, ErrorKind::Unknown);
    assert_eq!(panicked.meta.provider, "panic-b");

    assert_eq!(results[2].error_code(), Some(ErrorKind::RateLimit));
}

#[tokio::test]
async fn multiple_preserves_input_order_and_bounds_concurrency() {
    let names: Vec<String> = (0..12).map(|i| format!("k{i:02}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let h = harness(&refs, Duration::from_millis(40));

    let started = Instant::now();
    let results = h
        .generator
        .generate_multiple_provider_images(&names, "p", None, None, GenerateOptions::default())
        .await;

    assert_eq!(results.len(), names.len());
    for (result, name) in results.iter().zip(&names) {
        assert_eq!(result.data(), Some(name.as_str()));
    }
    let peak = h.peak.load(Ordering::SeqCst);
    assert!(peak <= MAX_CONCURRENT_PROVIDERS, "peak {peak}");
    assert!(peak > 1, "calls should overlap");
    // 12 calls at 40ms, five at a time, need at least three rounds.
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn multiple_with_few_providers_runs_all_at_once() {
    let h = harness(&["a", "b", "c"], Duration::from_millis(50));
    let results = h
        .generator
        .generate_multiple_provider_images(&keys(&["a", "b", "c"]), "p", None, None, GenerateOptions::default())
        .await;
    assert!(results.iter().all(GenerationResult::is_success));
    assert_eq!(h.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn multiple_with_empty_list_returns_nothing() {
    let h = harness(&["a"], Duration::ZERO);
    let results = h
        .generator
        .generate_multiple_provider_images(&[], "p", None, None, GenerateOptions::default())
        .await;
    assert!(results.is_empty());
}

// ---------------------------------------------------------------------------
// generate_random_provider_image
// ---------------------------------------------------------------------------

#[tokio::test]
async fn random_with_empty_list_is_invalid_params() {
    let h = harness(&["a"], Duration::ZERO);
    let result = h
        .generator
        .generate_random_provider_image(&[], "p", None, None, RandomOptions::default())
        .await;
    assert_eq!(result.error_code(), Some(ErrorKind::InvalidParams));
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn random_seed_selects_modulo_index() {
    let h = harness(&["p1", "p2", "p3"], Duration::ZERO);
    let providers = keys(&["p1", "p2", "p3"]);

    for _ in 0..5 {
        let nested = GenerateOptions {
            seed: Some(5),
            ..Default::default()
        };
        let result = h
            .generator
            .generate_random_provider_image(&providers, "p", None, None, nested)
            .await;
        assert_eq!(result.data(), Some("p3"));
    }

    // A bare seed works the same way.
    let result = h
        .generator
        .generate_random_provider_image(&providers, "p", None, None, 4u64)
        .await;
    assert_eq!(result.data(), Some("p2"));
}

#[tokio::test]
async fn random_without_seed_picks_a_listed_provider() {
    let h = harness(&["p1", "p2", "p3"], Duration::ZERO);
    let providers = keys(&["p1", "p2", "p3"]);
    for _ in 0..10 {
        let result = h
            .generator
            .generate_random_provider_image(&providers, "p", None, None, GenerateOptions::default())
            .await;
        let picked = result.data().unwrap().to_string();
        assert!(providers.contains(&picked), "{picked}");
    }
}

// ---------------------------------------------------------------------------
// Catalog accessors
// ---------------------------------------------------------------------------

#[test]
fn catalog_accessors_are_plain_reads() {
    let h = harness(&["zeta", "alpha"], Duration::ZERO);
    assert_eq!(h.generator.available_providers(), vec!["alpha", "zeta"]);
    assert!(h.generator.is_provider_available("alpha"));
    assert!(!h.generator.is_provider_available("omega"));
    let cfg = h.generator.provider_config("zeta").unwrap();
    assert_eq!(cfg.provider_type.as_deref(), Some("echo"));
    assert!(h.generator.provider_config("omega").is_none());
}
