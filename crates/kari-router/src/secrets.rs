//! API key resolution with an explicit per-provider precedence list.
//!
//! Probing is pure: every lookup walks the precedence list against the
//! configured sources, and negative results are never cached across config
//! reloads.

use std::collections::HashMap;

/// A place secrets can come from.
pub trait SecretSource: Send + Sync {
    /// Fetch a secret by key, `None` when absent or blank.
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment source.
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Fixed-map source for tests and injected configuration.
pub struct MapSecretSource(pub HashMap<String, String>);

impl SecretSource for MapSecretSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Resolves provider API keys through an ordered source list.
pub struct SecretResolver {
    sources: Vec<Box<dyn SecretSource>>,
    precedence: HashMap<String, Vec<String>>,
}

fn default_precedence() -> HashMap<String, Vec<String>> {
    let mut precedence = HashMap::new();
    for (provider, key) in [
        ("openai", "OPENAI_API_KEY"),
        ("anthropic", "ANTHROPIC_API_KEY"),
        ("gemini", "GEMINI_API_KEY"),
        ("deepseek", "DEEPSEEK_API_KEY"),
        ("huggingface", "HUGGINGFACE_API_KEY"),
        ("cohere", "COHERE_API_KEY"),
        ("copilotkit", "COPILOT_API_KEY"),
    ] {
        precedence.insert(provider.to_string(), vec![key.to_string()]);
    }
    precedence
}

impl SecretResolver {
    /// Resolver over the process environment with the contractual
    /// provider-to-variable mapping.
    pub fn from_env() -> Self {
        Self::with_sources(vec![Box::new(EnvSecretSource)])
    }

    /// Resolver over explicit sources, first match wins.
    pub fn with_sources(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self {
            sources,
            precedence: default_precedence(),
        }
    }

    /// Replace the precedence list for one provider.
    pub fn set_precedence(&mut self, provider: impl Into<String>, keys: Vec<String>) {
        self.precedence.insert(provider.into(), keys);
    }

    /// Resolve the API key for a provider. Unknown providers probe the
    /// conventional `{NAME}_API_KEY` spelling.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let conventional;
        let keys: &[String] = match self.precedence.get(provider) {
            Some(keys) => keys,
            None => {
                conventional = [format!("{}_API_KEY", provider.to_uppercase())];
                &conventional
            }
        };
        for key in keys {
            for source in &self.sources {
                if let Some(value) = source.get(key) {
                    return Some(value);
                }
            }
        }
        None
    }
}
