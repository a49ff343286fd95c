//! Parts registry
//!
//! Holds the six ordered collections the scan pipeline draws from: ignore
//! rules, item resolvers, metadata agents, sidecar parsers, embedded
//! extractors, and per-kind file analyzers and image providers. Parts are
//! registered by name during startup; after discovery the registry is
//! frozen and never mutated again.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{ItemKind, LibraryKind, MediaPart, MetadataItem};

use super::embedded::EmbeddedExtractor;
use super::patch::MetadataPatch;
use super::probe::IgnoreRule;
use super::resolvers::ItemResolver;
use super::sidecar::SidecarParser;

/// Agent ordering category. Agents sort by category first, then priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentCategory {
    Sidecar = 10,
    Embedded = 20,
    Local = 30,
    Remote = 50,
    Fallback = 90,
}

/// A metadata agent enriches an already-resolved item, typically over the
/// network. Remote agents run in the `remote_metadata` stage.
#[async_trait]
pub trait MetadataAgent: Send + Sync {
    fn id(&self) -> &'static str;
    fn category(&self) -> AgentCategory;
    /// Ascending within a category.
    fn priority(&self) -> i32;
    fn supports(&self, kind: LibraryKind) -> bool;
    async fn enrich(&self, item: &MetadataItem, language: &str)
        -> Result<Option<MetadataPatch>>;
}

/// Per-kind deep file analyzer (stream extraction, hashing).
#[async_trait]
pub trait FileAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, kind: ItemKind) -> bool;
    async fn analyze(&self, part: &mut MediaPart) -> Result<()>;
}

/// A remote image offered by an image provider.
#[derive(Debug, Clone)]
pub struct ProvidedImage {
    pub url: String,
    /// `poster`, `backdrop` or `thumb`.
    pub slot: &'static str,
}

/// Per-kind artwork source.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, kind: ItemKind) -> bool;
    async fn images(&self, item: &MetadataItem) -> Result<Vec<ProvidedImage>>;
}

/// The frozen registry. Construction goes through [RegistryBuilder]; all
/// collections are sorted once at freeze time.
pub struct PartsRegistry {
    ignore_rules: Vec<Arc<dyn IgnoreRule>>,
    resolvers: Vec<Arc<dyn ItemResolver>>,
    agents: Vec<Arc<dyn MetadataAgent>>,
    sidecar_parsers: Vec<Arc<dyn SidecarParser>>,
    embedded_extractors: Vec<Arc<dyn EmbeddedExtractor>>,
    analyzers: Vec<Arc<dyn FileAnalyzer>>,
    image_providers: Vec<Arc<dyn ImageProvider>>,
}

impl PartsRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn ignore_rules(&self) -> &[Arc<dyn IgnoreRule>] {
        &self.ignore_rules
    }

    /// Resolvers in ascending priority order.
    pub fn resolvers(&self) -> &[Arc<dyn ItemResolver>] {
        &self.resolvers
    }

    /// Agents ordered by category then priority. An explicit per-section
    /// agent-id ordering overrides this.
    pub fn agents(&self) -> &[Arc<dyn MetadataAgent>] {
        &self.agents
    }

    /// Agents for a library section, honoring its explicit order override.
    pub fn agents_for_section(&self, order_override: &[String]) -> Vec<Arc<dyn MetadataAgent>> {
        if order_override.is_empty() {
            return self.agents.to_vec();
        }
        let by_id: HashMap<&str, Arc<dyn MetadataAgent>> =
            self.agents.iter().map(|a| (a.id(), a.clone())).collect();
        let mut out: Vec<Arc<dyn MetadataAgent>> = order_override
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).cloned())
            .collect();
        // Agents absent from the override keep their registry order after it.
        for agent in &self.agents {
            if !order_override.iter().any(|id| id == agent.id()) {
                out.push(agent.clone());
            }
        }
        out
    }

    pub fn sidecar_parsers(&self) -> &[Arc<dyn SidecarParser>] {
        &self.sidecar_parsers
    }

    pub fn embedded_extractors(&self) -> &[Arc<dyn EmbeddedExtractor>] {
        &self.embedded_extractors
    }

    pub fn analyzers_for(&self, kind: ItemKind) -> Vec<Arc<dyn FileAnalyzer>> {
        self.analyzers.iter().filter(|a| a.supports(kind)).cloned().collect()
    }

    pub fn image_providers_for(&self, kind: ItemKind) -> Vec<Arc<dyn ImageProvider>> {
        self.image_providers.iter().filter(|p| p.supports(kind)).cloned().collect()
    }
}

/// Mutable registration surface, consumed by `freeze`.
#[derive(Default)]
pub struct RegistryBuilder {
    ignore_rules: Vec<Arc<dyn IgnoreRule>>,
    resolvers: Vec<Arc<dyn ItemResolver>>,
    agents: Vec<Arc<dyn MetadataAgent>>,
    sidecar_parsers: Vec<Arc<dyn SidecarParser>>,
    embedded_extractors: Vec<Arc<dyn EmbeddedExtractor>>,
    analyzers: Vec<Arc<dyn FileAnalyzer>>,
    image_providers: Vec<Arc<dyn ImageProvider>>,
}

impl RegistryBuilder {
    pub fn add_ignore_rule(&mut self, rule: Arc<dyn IgnoreRule>) -> &mut Self {
        self.ignore_rules.push(rule);
        self
    }

    pub fn add_resolver(&mut self, resolver: Arc<dyn ItemResolver>) -> &mut Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn add_agent(&mut self, agent: Arc<dyn MetadataAgent>) -> &mut Self {
        self.agents.push(agent);
        self
    }

    pub fn add_sidecar_parser(&mut self, parser: Arc<dyn SidecarParser>) -> &mut Self {
        self.sidecar_parsers.push(parser);
        self
    }

    pub fn add_embedded_extractor(&mut self, extractor: Arc<dyn EmbeddedExtractor>) -> &mut Self {
        self.embedded_extractors.push(extractor);
        self
    }

    pub fn add_analyzer(&mut self, analyzer: Arc<dyn FileAnalyzer>) -> &mut Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn add_image_provider(&mut self, provider: Arc<dyn ImageProvider>) -> &mut Self {
        self.image_providers.push(provider);
        self
    }

    /// Sort the collections and produce the immutable registry.
    pub fn freeze(mut self) -> Arc<PartsRegistry> {
        self.resolvers.sort_by_key(|r| r.priority());
        self.agents
            .sort_by_key(|a| (a.category() as i32, a.priority()));
        Arc::new(PartsRegistry {
            ignore_rules: self.ignore_rules,
            resolvers: self.resolvers,
            agents: self.agents,
            sidecar_parsers: self.sidecar_parsers,
            embedded_extractors: self.embedded_extractors,
            analyzers: self.analyzers,
            image_providers: self.image_providers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAgent {
        id: &'static str,
        category: AgentCategory,
        priority: i32,
    }

    #[async_trait]
    impl MetadataAgent for StubAgent {
        fn id(&self) -> &'static str {
            self.id
        }
        fn category(&self) -> AgentCategory {
            self.category
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn supports(&self, _kind: LibraryKind) -> bool {
            true
        }
        async fn enrich(
            &self,
            _item: &MetadataItem,
            _language: &str,
        ) -> Result<Option<MetadataPatch>> {
            Ok(None)
        }
    }

    #[test]
    fn test_agents_sorted_by_category_then_priority() {
        let mut builder = PartsRegistry::builder();
        builder
            .add_agent(Arc::new(StubAgent { id: "remote", category: AgentCategory::Remote, priority: 1 }))
            .add_agent(Arc::new(StubAgent { id: "nfo", category: AgentCategory::Sidecar, priority: 5 }))
            .add_agent(Arc::new(StubAgent { id: "fallback", category: AgentCategory::Fallback, priority: 0 }))
            .add_agent(Arc::new(StubAgent { id: "tags", category: AgentCategory::Sidecar, priority: 1 }));
        let registry = builder.freeze();

        let ids: Vec<&str> = registry.agents().iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["tags", "nfo", "remote", "fallback"]);
    }

    #[test]
    fn test_section_order_override() {
        let mut builder = PartsRegistry::builder();
        builder
            .add_agent(Arc::new(StubAgent { id: "a", category: AgentCategory::Remote, priority: 1 }))
            .add_agent(Arc::new(StubAgent { id: "b", category: AgentCategory::Remote, priority: 2 }))
            .add_agent(Arc::new(StubAgent { id: "c", category: AgentCategory::Remote, priority: 3 }));
        let registry = builder.freeze();

        let ordered = registry.agents_for_section(&["c".to_string(), "a".to_string()]);
        let ids: Vec<&str> = ordered.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
