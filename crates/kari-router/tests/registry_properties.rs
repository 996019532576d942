#![allow(missing_docs)]

//! Generative checks over runtime compatibility matching.

use kari_router::{LlmRegistry, ModelMetadata, RuntimeSpec, StartupTime, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FORMATS: [&str; 4] = ["gguf", "safetensors", "fp16", "onnx"];
const FAMILIES: [&str; 5] = ["llama", "mistral", "qwen", "bert", "phi"];

fn random_runtime(rng: &mut StdRng, index: usize) -> RuntimeSpec {
    let format_count = rng.gen_range(1..=3);
    let mut supports = Vec::new();
    for _ in 0..format_count {
        let format = FORMATS[rng.gen_range(0..FORMATS.len())].to_string();
        if !supports.contains(&format) {
            supports.push(format);
        }
    }
    let family_count = rng.gen_range(0..=3);
    let mut family = Vec::new();
    for _ in 0..family_count {
        let candidate = FAMILIES[rng.gen_range(0..FAMILIES.len())].to_string();
        if !family.contains(&candidate) {
            family.push(candidate);
        }
    }
    RuntimeSpec {
        name: format!("rt{index}"),
        description: String::new(),
        family,
        supports,
        requires_gpu: rng.gen_bool(0.3),
        memory_efficient: rng.gen_bool(0.5),
        supports_streaming: rng.gen_bool(0.7),
        supports_batching: rng.gen_bool(0.4),
        startup_time: StartupTime::Medium,
        throughput: Throughput::Medium,
        priority: rng.gen_range(0..=100),
        adapter: None,
    }
}

fn random_model(rng: &mut StdRng) -> ModelMetadata {
    ModelMetadata {
        id: "m".to_string(),
        name: "m".to_string(),
        provider: "p".to_string(),
        family: FAMILIES[rng.gen_range(0..FAMILIES.len())].to_string(),
        format: FORMATS[rng.gen_range(0..FORMATS.len())].to_string(),
        ..ModelMetadata::default()
    }
}

fn satisfies(model: &ModelMetadata, spec: &RuntimeSpec) -> bool {
    let format_ok = spec.supports.iter().any(|format| format == &model.format);
    let family_ok =
        spec.family.is_empty() || spec.family.iter().any(|family| family == &model.family);
    format_ok && family_ok
}

#[test]
fn compatible_runtimes_are_sorted_and_every_element_is_compatible() {
    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..25 {
        let registry = LlmRegistry::new();
        let runtime_count = rng.gen_range(1..10);
        for index in 0..runtime_count {
            registry.register_runtime(random_runtime(&mut rng, index));
        }
        let model = random_model(&mut rng);
        let compatible = registry.compatible_runtimes(&model);

        let priorities: Vec<u8> = compatible
            .iter()
            .filter_map(|name| registry.runtime_spec(name))
            .map(|spec| spec.priority)
            .collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted, "round {round}: not priority-sorted");

        for name in &compatible {
            let spec = registry
                .runtime_spec(name)
                .unwrap_or_else(|| panic!("round {round}: missing spec for {name}"));
            assert!(
                satisfies(&model, &spec),
                "round {round}: {name} listed but incompatible with {model:?}"
            );
        }

        // Every excluded runtime is genuinely incompatible.
        for name in registry.list_runtimes() {
            if compatible.contains(&name) {
                continue;
            }
            let spec = registry
                .runtime_spec(&name)
                .unwrap_or_else(|| panic!("round {round}: missing spec for {name}"));
            assert!(
                !satisfies(&model, &spec),
                "round {round}: {name} excluded but compatible"
            );
        }
    }
}

#[test]
fn optimal_runtime_output_is_always_from_the_compatible_set() {
    let mut rng = StdRng::seed_from_u64(1337);
    for _ in 0..25 {
        let registry = LlmRegistry::new();
        for index in 0..rng.gen_range(1..8) {
            registry.register_runtime(random_runtime(&mut rng, index));
        }
        let model = random_model(&mut rng);
        let requirements = kari_router::RuntimeRequirements {
            requires_gpu: rng.gen_bool(0.3),
            memory_efficient: rng.gen_bool(0.3),
            streaming: rng.gen_bool(0.3),
            ..kari_router::RuntimeRequirements::default()
        };
        let compatible = registry.compatible_runtimes(&model);
        let optimal = registry.optimal_runtime(&model, &requirements);
        match optimal {
            Some(name) => assert!(compatible.contains(&name)),
            None => assert!(compatible.is_empty()),
        }
    }
}
