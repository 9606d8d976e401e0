//! Static model catalog for the BlockRun marketplace.
//!
//! The catalog is built once at startup and never mutated afterward — every
//! routing decision reads from an immutable, shared table. Pricing and
//! capability data is advisory: an explicit model id absent from the catalog
//! is still forwarded upstream, it simply has no cost estimate attached.

use std::collections::HashSet;

use serde::Serialize;

/// Pricing/quality tier. Ordered premium > standard > eco > free for
/// "highest quality" lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Eco,
    Standard,
    Premium,
}

/// A single capability a model may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    General,
    Reasoning,
    Code,
    Vision,
    LongContext,
}

/// One entry in the model catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    /// `vendor/name`, already normalized.
    pub id: String,
    pub display_name: String,
    pub tier: Tier,
    pub price_per_million_usd: f64,
    pub capabilities: HashSet<Capability>,
    pub requires_payment: bool,
    /// Marks the catalog's designated last-resort model. Exactly one entry
    /// must carry this flag — enforced by [`Catalog::new`].
    pub emergency_free: bool,
}

impl ModelDescriptor {
    fn has_all(&self, caps: &HashSet<Capability>) -> bool {
        caps.iter().all(|c| self.capabilities.contains(c))
    }
}

/// Immutable, in-process model registry.
pub struct Catalog {
    models: Vec<ModelDescriptor>,
}

impl Catalog {
    /// Build the default BlockRun-style catalog.
    ///
    /// Panics if the hardcoded table does not carry exactly one
    /// `emergency_free` entry — this is a startup invariant, not a runtime
    /// condition callers need to handle.
    pub fn new() -> Self {
        use Capability::*;
        use Tier::*;

        let models = vec![
            ModelDescriptor {
                id: "nvidia/gpt-oss-120b".into(),
                display_name: "NVIDIA GPT-OSS 120B (free)".into(),
                tier: Free,
                price_per_million_usd: 0.0,
                capabilities: HashSet::from([General, Code, Reasoning]),
                requires_payment: false,
                emergency_free: true,
            },
            ModelDescriptor {
                id: "meta/llama-3.1-8b-instruct".into(),
                display_name: "Llama 3.1 8B Instruct".into(),
                tier: Free,
                price_per_million_usd: 0.0,
                capabilities: HashSet::from([General]),
                requires_payment: false,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "deepseek/deepseek-chat".into(),
                display_name: "DeepSeek Chat".into(),
                tier: Eco,
                price_per_million_usd: 0.27,
                capabilities: HashSet::from([General, Code]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "qwen/qwen-2.5-72b-instruct".into(),
                display_name: "Qwen 2.5 72B Instruct".into(),
                tier: Eco,
                price_per_million_usd: 0.35,
                capabilities: HashSet::from([General, Code, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "mistral/mistral-small".into(),
                display_name: "Mistral Small".into(),
                tier: Eco,
                price_per_million_usd: 0.45,
                capabilities: HashSet::from([General, Code]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "xai/grok-code-fast-1".into(),
                display_name: "Grok Code Fast 1".into(),
                tier: Standard,
                price_per_million_usd: 1.20,
                capabilities: HashSet::from([General, Code, Reasoning]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "openai/gpt-4.1-mini".into(),
                display_name: "GPT-4.1 Mini".into(),
                tier: Standard,
                price_per_million_usd: 1.60,
                capabilities: HashSet::from([General, Code, Vision]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "anthropic/claude-3.5-haiku".into(),
                display_name: "Claude 3.5 Haiku".into(),
                tier: Standard,
                price_per_million_usd: 2.00,
                capabilities: HashSet::from([General, Code, Reasoning, Vision]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "google/gemini-2.0-flash".into(),
                display_name: "Gemini 2.0 Flash".into(),
                tier: Standard,
                price_per_million_usd: 2.20,
                capabilities: HashSet::from([General, Code, Vision, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "deepseek/deepseek-reasoner".into(),
                display_name: "DeepSeek Reasoner".into(),
                tier: Premium,
                price_per_million_usd: 4.50,
                capabilities: HashSet::from([General, Code, Reasoning, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "openai/gpt-4.1".into(),
                display_name: "GPT-4.1".into(),
                tier: Premium,
                price_per_million_usd: 8.00,
                capabilities: HashSet::from([General, Code, Reasoning, Vision, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "anthropic/claude-3.5-sonnet".into(),
                display_name: "Claude 3.5 Sonnet".into(),
                tier: Premium,
                price_per_million_usd: 9.00,
                capabilities: HashSet::from([General, Code, Reasoning, Vision, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
            ModelDescriptor {
                id: "openai/o3".into(),
                display_name: "OpenAI o3".into(),
                tier: Premium,
                price_per_million_usd: 15.00,
                capabilities: HashSet::from([General, Code, Reasoning, LongContext]),
                requires_payment: true,
                emergency_free: false,
            },
        ];

        let emergency_count = models.iter().filter(|m| m.emergency_free).count();
        assert_eq!(
            emergency_count, 1,
            "catalog must carry exactly one emergency_free model, found {emergency_count}"
        );

        Self { models }
    }

    pub fn by_id(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Models in `tier` satisfying every capability in `caps`, ascending by
    /// price then by id for a stable tie-break.
    pub fn cheapest_in_tier<'a>(
        &'a self,
        tier: Tier,
        caps: &'a HashSet<Capability>,
    ) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        let mut matching: Vec<&ModelDescriptor> = self
            .models
            .iter()
            .filter(move |m| m.tier == tier && m.has_all(caps))
            .collect();
        matching.sort_by(|a, b| {
            a.price_per_million_usd
                .partial_cmp(&b.price_per_million_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matching.into_iter()
    }

    /// Highest tier satisfying `caps`; within that tier, priciest first
    /// (there is no independent quality score in the data model, so price is
    /// used as the quality proxy).
    pub fn highest_quality(&self, caps: &HashSet<Capability>) -> Option<&ModelDescriptor> {
        for tier in [Tier::Premium, Tier::Standard, Tier::Eco, Tier::Free] {
            let mut matching: Vec<&ModelDescriptor> = self
                .models
                .iter()
                .filter(|m| m.tier == tier && m.has_all(caps))
                .collect();
            if matching.is_empty() {
                continue;
            }
            matching.sort_by(|a, b| {
                b.price_per_million_usd
                    .partial_cmp(&a.price_per_million_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            return matching.into_iter().next();
        }
        None
    }

    pub fn free_models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(|m| m.price_per_million_usd == 0.0)
    }

    /// The catalog's designated last-resort model.
    pub fn emergency_free(&self) -> &ModelDescriptor {
        self.models
            .iter()
            .find(|m| m.emergency_free)
            .expect("validated at construction: exactly one emergency_free model")
    }

    pub fn all(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Routing aliases `/v1/models` and `resolve_alias` both recognize, in
    /// addition to an explicit catalog id.
    pub fn aliases(&self) -> &[&'static str] {
        &["auto", "eco", "premium", "free"]
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
