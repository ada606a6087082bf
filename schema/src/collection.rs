use crate::{projection, ApiSchema, Formatter, Store};
use ahash::AHashMap as HashMap;
use moka::sync::Cache;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use vantage_core::{AccessSetLookup, UserInfo};

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CACHE_CAPACITY: u64 = 1000;

/// Attaches store/formatter hooks to schemas, selected by schema id, by
/// `<group>/<kind>`, or by the empty key as the default for all schemas.
#[derive(Clone, Default)]
pub struct Template {
    pub id: String,
    pub store: Option<Arc<dyn Store>>,
    pub formatter: Option<Arc<dyn Formatter>>,
}

/// The schema registry plus the per-user projection cache.
///
/// Projections are memoized under the access-set fingerprint; a second cache
/// maps each user name to the fingerprint it last used so that a permission
/// change evicts the user's previous projection instead of letting it linger
/// until TTL expiry.
pub struct Collection {
    schemas: RwLock<BTreeMap<String, Arc<ApiSchema>>>,
    templates: RwLock<HashMap<String, Vec<Template>>>,

    cache: Cache<String, Arc<Vec<Arc<ApiSchema>>>>,
    user_cache: Cache<String, String>,

    access: Arc<dyn AccessSetLookup>,
}

impl Collection {
    pub fn new(access: Arc<dyn AccessSetLookup>) -> Self {
        Self {
            schemas: RwLock::new(BTreeMap::new()),
            templates: RwLock::new(HashMap::default()),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            user_cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            access,
        }
    }

    /// Replaces the global schema list, dropping all cached projections.
    pub fn replace_schemas(&self, schemas: Vec<ApiSchema>) {
        let mut replacement = BTreeMap::new();
        {
            let templates = self.templates.read();
            for mut schema in schemas {
                apply_templates(&templates, &mut schema);
                replacement.insert(schema.id.clone(), Arc::new(schema));
            }
        }
        *self.schemas.write() = replacement;
        self.purge();
    }

    pub fn add_template(&self, template: Template) {
        self.templates
            .write()
            .entry(template.id.clone())
            .or_default()
            .push(template);
    }

    pub fn schema_by_id(&self, id: &str) -> Option<Arc<ApiSchema>> {
        self.schemas.read().get(id).cloned()
    }

    /// The user-scoped schema collection, memoized by access fingerprint.
    pub fn schemas_for(&self, user: &UserInfo) -> Arc<Vec<Arc<ApiSchema>>> {
        let access = self.access.access_for(user);
        let id = access.id();
        self.remove_old_records(&id, user);

        if let Some(hit) = self.cache.get(&id) {
            self.user_cache.insert(user.name.clone(), id);
            return hit;
        }
        tracing::debug!(user = %user.name, fingerprint = %id, "projection cache miss");

        let projected = {
            let schemas = self.schemas.read();
            let list: Vec<Arc<ApiSchema>> = schemas.values().cloned().collect();
            Arc::new(projection::project(&access, &list))
        };
        self.cache.insert(id.clone(), projected.clone());
        self.user_cache.insert(user.name.clone(), id);
        projected
    }

    /// Drops every cached projection. Invoked on RBAC invalidation and on
    /// schema replacement.
    pub fn purge(&self) {
        self.cache.invalidate_all();
        self.user_cache.invalidate_all();
    }

    // Only one record is kept per user: if the user's current fingerprint no
    // longer matches the cached one, both slots are purged so a stale
    // projection cannot be served again.
    fn remove_old_records(&self, id: &str, user: &UserInfo) {
        if let Some(current) = self.user_cache.get(&user.name) {
            if current != id {
                self.cache.invalidate(&current);
                self.user_cache.invalidate(&user.name);
            }
        }
    }
}

fn apply_templates(templates: &HashMap<String, Vec<Template>>, schema: &mut ApiSchema) {
    let keys = [
        schema.id.clone(),
        format!("{}/{}", schema.group, schema.kind),
        String::new(),
    ];
    for key in keys {
        for template in templates.get(&key).into_iter().flatten() {
            if schema.formatter.is_none() {
                schema.formatter = template.formatter.clone();
            }
            if schema.store.is_none() {
                schema.store = template.store.clone();
            }
        }
    }
}
