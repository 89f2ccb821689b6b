use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use orchestrator_core::{ChatModel, OrchestratorError, OrchestratorResult, RoleKey};
use tokio::sync::RwLock;

use crate::http_model::HttpChatModel;
use crate::secrets::{decrypt_secret, mask_secret, EncryptedSecret};
use crate::usage::UsageAggregator;

/// Wire protocol family a provider speaks (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompatible,
    Google,
    Anthropic,
}

/// One row of the provider table (§4.1). `api_key_encrypted` is never logged or
/// serialized back to an admin surface in plaintext — see `ProviderRecord::masked`.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key_encrypted: Option<EncryptedSecret>,
    pub enabled_models: Vec<String>,
    pub priority: u32,
    pub enabled: bool,
}

impl ProviderRecord {
    /// Admin-surface view: secrets are masked, never decrypted (§4.1, §6).
    pub fn masked_api_key(&self, encryption_key: &[u8; 32]) -> Option<String> {
        let encrypted = self.api_key_encrypted.as_ref()?;
        let plain = decrypt_secret(encrypted, encryption_key).ok()?;
        Some(mask_secret(&plain))
    }
}

/// One row of the role -> (provider, model) binding table (§4.1).
#[derive(Debug, Clone)]
pub struct Binding {
    pub provider_id: String,
    pub model_name: String,
}

/// C1: resolves a `role_key` to a live `ChatModel`, caches instances, and supports
/// environment-variable fallback when the bound provider lacks credentials.
///
/// Grounded on the teacher's `MLClient`/`HttpMLProvider` split: one shared HTTP client,
/// several thin per-capability wrappers. Here the wrappers are per-(provider, model)
/// `HttpChatModel` instances cached in a `DashMap`, the same concurrent-cache shape the
/// teacher uses for TTL caches elsewhere in the orchestrator.
pub struct ModelGateway {
    http_client: reqwest::Client,
    providers: RwLock<HashMap<String, ProviderRecord>>,
    bindings: RwLock<HashMap<RoleKey, Binding>>,
    cache: DashMap<RoleKey, Arc<dyn ChatModel>>,
    encryption_key: [u8; 32],
    usage: Arc<UsageAggregator>,
}

impl ModelGateway {
    pub fn new(encryption_key: [u8; 32], usage: Arc<UsageAggregator>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build shared model-gateway HTTP client"),
            providers: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
            encryption_key,
            usage,
        }
    }

    pub async fn upsert_provider(&self, record: ProviderRecord) {
        self.providers.write().await.insert(record.id.clone(), record);
        self.reload().await;
    }

    pub async fn bind(&self, role: RoleKey, binding: Binding) {
        self.bindings.write().await.insert(role, binding);
        self.reload().await;
    }

    /// Admin-surface listing (§6.2): every configured provider, in insertion order
    /// undefined (backed by a `HashMap`); callers mask secrets themselves via
    /// `ProviderRecord::masked_api_key`.
    pub async fn list_providers(&self) -> Vec<ProviderRecord> {
        self.providers.read().await.values().cloned().collect()
    }

    /// Admin-surface listing (§6.2): every role -> (provider, model) binding.
    pub async fn list_bindings(&self) -> Vec<(RoleKey, Binding)> {
        self.bindings.read().await.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    /// Clears cached instances; the next `resolve` re-reads configuration. Any
    /// mutation to the provider or binding tables MUST call this (§4.1).
    pub async fn reload(&self) {
        self.cache.clear();
    }

    /// Resolve `role_key -> ChatModel` (§4.1). Falls through to an environment-variable
    /// configured provider of the same kind if the bound provider fails credential
    /// checks, per the fallback policy in §4.1.
    pub async fn resolve(&self, role: RoleKey) -> OrchestratorResult<Arc<dyn ChatModel>> {
        let binding = {
            let bindings = self.bindings.read().await;
            bindings
                .get(&role)
                .cloned()
                .ok_or_else(|| OrchestratorError::ProviderMissing(role.as_str().to_string()))?
        };

        if let Some(cached) = self.cache.get(&role) {
            return Ok(cached.clone());
        }

        let record = {
            let providers = self.providers.read().await;
            providers.get(&binding.provider_id).cloned()
        };

        let model = match record {
            Some(record) if record.enabled => match self.instantiate(role, &record, &binding.model_name) {
                Ok(model) => model,
                Err(_) => self.env_fallback(role, &binding.model_name)?,
            },
            _ => self.env_fallback(role, &binding.model_name)?,
        };

        self.cache.insert(role, model.clone());
        Ok(model)
    }

    fn instantiate(
        &self,
        role: RoleKey,
        record: &ProviderRecord,
        model_name: &str,
    ) -> OrchestratorResult<Arc<dyn ChatModel>> {
        let encrypted = record
            .api_key_encrypted
            .as_ref()
            .ok_or_else(|| OrchestratorError::ProviderMissing(record.id.clone()))?;
        let api_key = decrypt_secret(encrypted, &self.encryption_key)
            .map_err(|_| OrchestratorError::ProviderMissing(record.id.clone()))?;

        Ok(Arc::new(HttpChatModel::new(
            self.http_client.clone(),
            role,
            record.id.clone(),
            model_name.to_string(),
            record.kind,
            record.base_url.clone(),
            api_key,
            self.usage.clone(),
        )))
    }

    /// Environment-variable fallback: `MODEL_GATEWAY_<ROLE>_API_KEY` /
    /// `MODEL_GATEWAY_<ROLE>_BASE_URL`, same-kind as the originally bound provider is
    /// assumed unresolvable without a provider table entry, so this only fires when an
    /// operator has pre-provisioned the role directly via the environment (§4.1).
    fn env_fallback(&self, role: RoleKey, model_name: &str) -> OrchestratorResult<Arc<dyn ChatModel>> {
        let prefix = role.as_str().to_uppercase();
        let api_key = std::env::var(format!("MODEL_GATEWAY_{prefix}_API_KEY"))
            .map_err(|_| OrchestratorError::ProviderMissing(role.as_str().to_string()))?;
        let base_url = std::env::var(format!("MODEL_GATEWAY_{prefix}_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Arc::new(HttpChatModel::new(
            self.http_client.clone(),
            role,
            format!("env:{}", role.as_str()),
            model_name.to_string(),
            ProviderKind::OpenAiCompatible,
            base_url,
            api_key,
            self.usage.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::encrypt_secret;

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[tokio::test]
    async fn resolve_without_binding_is_provider_missing() {
        let gateway = ModelGateway::new(test_key(), Arc::new(UsageAggregator::new()));
        let err = gateway.resolve(RoleKey::DeepThink).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProviderMissing(_)));
    }

    #[tokio::test]
    async fn reload_clears_cached_instances() {
        let gateway = ModelGateway::new(test_key(), Arc::new(UsageAggregator::new()));
        let encrypted = encrypt_secret("sk-live-abcdef", &test_key());
        gateway
            .upsert_provider(ProviderRecord {
                id: "openai-primary".to_string(),
                kind: ProviderKind::OpenAiCompatible,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_encrypted: Some(encrypted),
                enabled_models: vec!["gpt-4o".to_string()],
                priority: 0,
                enabled: true,
            })
            .await;
        gateway
            .bind(
                RoleKey::DeepThink,
                Binding { provider_id: "openai-primary".to_string(), model_name: "gpt-4o".to_string() },
            )
            .await;

        let first = gateway.resolve(RoleKey::DeepThink).await.unwrap();
        assert!(Arc::ptr_eq(&first, &gateway.resolve(RoleKey::DeepThink).await.unwrap()));

        gateway.reload().await;
        assert!(gateway.cache.is_empty());
    }

    #[test]
    fn masked_api_key_retains_only_first_and_last_four() {
        let key = test_key();
        let encrypted = encrypt_secret("sk-abcdefghijklmnop", &key);
        let record = ProviderRecord {
            id: "p".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            base_url: "https://example.com".to_string(),
            api_key_encrypted: Some(encrypted),
            enabled_models: vec![],
            priority: 0,
            enabled: true,
        };
        let masked = record.masked_api_key(&key).unwrap();
        assert!(masked.starts_with("sk-a"));
        assert!(masked.ends_with("mnop"));
        assert!(masked.contains('*'));
    }
}
