//! Module registry.
//!
//! Process-wide catalog of live modules, built once at startup and read-only
//! afterward. Lookup is constant-time; enumeration is sorted by module id.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::cmi::CmiIndex;
use crate::embeddings::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::memory::{ClassifyHints, ModuleDescriptor};
use crate::module::MemoryModule;
use crate::relationships::RelationshipStore;
use crate::storage::{Database, SqliteVectorStore, VectorStore};

pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<MemoryModule>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    /// Build the registry from fully constructed modules. Duplicate ids are
    /// a configuration error.
    pub fn new(modules: Vec<Arc<MemoryModule>>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for module in modules {
            let id = module.id().to_string();
            if map.insert(id.clone(), module).is_some() {
                return Err(MemoryError::InvalidArgument(format!(
                    "duplicate module id: {id}"
                )));
            }
        }
        Ok(Self { modules: map })
    }

    pub fn get(&self, module_id: &str) -> Option<Arc<MemoryModule>> {
        self.modules.get(module_id).cloned()
    }

    /// Stable enumeration, sorted by module id.
    pub fn list(&self) -> Vec<Arc<MemoryModule>> {
        self.modules.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.modules
            .values()
            .map(|m| m.descriptor().clone())
            .collect()
    }

    /// `(module_id, store)` pairs for the index rebuild sweep.
    pub fn store_adapters(&self) -> Vec<(String, Arc<dyn VectorStore>)> {
        self.modules
            .values()
            .map(|m| (m.id().to_string(), m.store_adapter().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Construct the production registry: one SQLite-backed store per
/// descriptor, wired to the shared index and relationship store.
pub fn build_registry(
    db: Arc<Database>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cmi: Arc<CmiIndex>,
    relationships: Arc<RelationshipStore>,
    descriptors: Vec<ModuleDescriptor>,
) -> Result<ModuleRegistry> {
    let mut modules = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(
            db.clone(),
            &descriptor.table_name,
            descriptor.embedding_dimension,
        )?);
        modules.push(Arc::new(MemoryModule::new(
            descriptor,
            store,
            embeddings.clone(),
            cmi.clone(),
            relationships.clone(),
        )));
    }
    ModuleRegistry::new(modules)
}

/// The six standard topical modules.
pub fn default_descriptors(embedding_dimension: usize) -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor {
            id: "technical".to_string(),
            name: "Technical".to_string(),
            description: "Code, debugging sessions, architecture, and tooling notes".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "technical_memories".to_string(),
            metadata_schema: json!({
                "language": "string",
                "framework": "string",
                "tags": "string[]"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["code", "technical", "debugging", "snippet"]),
                categories: strings(&["technical", "programming", "engineering"]),
                tags: strings(&["code", "bug", "api", "rust", "deploy"]),
                content_patterns: strings(&[
                    r"(?i)\b(code|api|server|database|compiler|debug|deploy|cors|framework|library)\b",
                ]),
            },
            analyze_facets: strings(&["language", "framework"]),
        },
        ModuleDescriptor {
            id: "personal".to_string(),
            name: "Personal".to_string(),
            description: "Life events, people, and everything that fits nowhere else".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "personal_memories".to_string(),
            metadata_schema: json!({
                "mood": "string",
                "people": "string[]"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["personal", "journal", "diary"]),
                categories: strings(&["personal", "life"]),
                tags: strings(&["personal", "family", "health"]),
                content_patterns: strings(&[
                    r"(?i)\b(family|sister|brother|friend|hiking|birthday|vacation|weekend)\b",
                ]),
            },
            analyze_facets: strings(&["mood"]),
        },
        ModuleDescriptor {
            id: "work".to_string(),
            name: "Work".to_string(),
            description: "Projects, meetings, decisions, and deadlines".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "work_memories".to_string(),
            metadata_schema: json!({
                "projectName": "string",
                "status": "string",
                "stakeholders": "string[]"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["project", "meeting", "task", "decision"]),
                categories: strings(&["work", "business"]),
                tags: strings(&["work", "meeting", "project", "deadline"]),
                content_patterns: strings(&[
                    r"(?i)\b(meeting|deadline|client|standup|kickoff|stakeholder|quarterly)\b",
                ]),
            },
            analyze_facets: strings(&["projectName", "status"]),
        },
        ModuleDescriptor {
            id: "learning".to_string(),
            name: "Learning".to_string(),
            description: "Courses, papers, and study notes".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "learning_memories".to_string(),
            metadata_schema: json!({
                "subject": "string",
                "status": "string"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["course", "study", "lesson"]),
                categories: strings(&["learning", "education"]),
                tags: strings(&["learning", "course", "study"]),
                content_patterns: strings(&[
                    r"(?i)\b(course|tutorial|lesson|studied|learned|chapter|lecture)\b",
                ]),
            },
            analyze_facets: strings(&["subject", "status"]),
        },
        ModuleDescriptor {
            id: "communication".to_string(),
            name: "Communication".to_string(),
            description: "Emails, calls, and conversations worth keeping".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "communication_memories".to_string(),
            metadata_schema: json!({
                "channel": "string",
                "participants": "string[]"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["email", "message", "call"]),
                categories: strings(&["communication"]),
                tags: strings(&["email", "call", "message"]),
                content_patterns: strings(&[
                    r"(?i)\b(email|emailed|called|messaged|replied|conversation|voicemail)\b",
                ]),
            },
            analyze_facets: strings(&["channel"]),
        },
        ModuleDescriptor {
            id: "creative".to_string(),
            name: "Creative".to_string(),
            description: "Ideas, drafts, and works in progress".to_string(),
            module_type: "standard".to_string(),
            embedding_dimension,
            table_name: "creative_memories".to_string(),
            metadata_schema: json!({
                "medium": "string",
                "stage": "string"
            }),
            classify_hints: ClassifyHints {
                types: strings(&["idea", "story", "design"]),
                categories: strings(&["creative", "art"]),
                tags: strings(&["idea", "design", "writing"]),
                content_patterns: strings(&[
                    r"(?i)\b(idea|story|design|sketch|draft|poem|melody)\b",
                ]),
            },
            analyze_facets: strings(&["medium", "stage"]),
        },
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::hashed::HashedEmbeddings;

    fn test_registry() -> (tempfile::TempDir, ModuleRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(Some(dir.path().join("t.db")), 1).unwrap());
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashedEmbeddings::new(32, 8));
        let cmi = Arc::new(CmiIndex::new(db.clone(), 8));
        let relationships = Arc::new(RelationshipStore::new(db.clone()));
        let registry = build_registry(
            db,
            embeddings,
            cmi,
            relationships,
            default_descriptors(32),
        )
        .unwrap();
        (dir, registry)
    }

    #[test]
    fn six_default_modules_sorted_by_id() {
        let (_dir, registry) = test_registry();
        assert_eq!(
            registry.ids(),
            vec!["communication", "creative", "learning", "personal", "technical", "work"]
        );
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn lookup_by_id() {
        let (_dir, registry) = test_registry();
        assert!(registry.get("work").is_some());
        assert!(registry.get("church").is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let (_dir, registry) = test_registry();
        let module = registry.get("work").unwrap();
        let err = ModuleRegistry::new(vec![module.clone(), module]).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn descriptors_declare_unique_tables() {
        let descriptors = default_descriptors(32);
        let mut tables: Vec<_> = descriptors.iter().map(|d| d.table_name.clone()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), descriptors.len());
    }
}
