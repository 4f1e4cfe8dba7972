//! Per-site table prefixes.
//!
//! Every logical table belongs to exactly one [`TableScope`]. Site tables are
//! prefixed per tenant (`qub_5_post` for site 5), while global and multisite
//! global tables always carry the base prefix (`qub_user`, `qub_site`). The
//! main site (id 0 or 1) uses the base prefix for its site tables as well.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{QubusError, Result};

lazy_static! {
    static ref VALID_PREFIX: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableScope {
    Site,
    Global,
    MsGlobal,
}

/// Which tables [`TenantContext::tables`] should list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    All,
    Only(TableScope),
}

impl From<TableScope> for ScopeFilter {
    fn from(scope: TableScope) -> Self {
        ScopeFilter::Only(scope)
    }
}

// ------------- TableRegistry -------------
#[derive(Debug, Clone)]
pub struct TableRegistry {
    scopes: BTreeMap<String, TableScope>,
}

impl TableRegistry {
    pub fn empty() -> Self {
        Self { scopes: BTreeMap::new() }
    }
    /// Register `key` under `scope`. A key re-registered moves to the new scope.
    pub fn register(&mut self, key: &str, scope: TableScope) {
        self.scopes.insert(key.to_string(), scope);
    }
    pub fn scope_of(&self, key: &str) -> Option<TableScope> {
        self.scopes.get(key).copied()
    }
    pub fn keys(&self, filter: ScopeFilter) -> impl Iterator<Item = (&str, TableScope)> {
        self.scopes
            .iter()
            .filter(move |(_, scope)| match filter {
                ScopeFilter::All => true,
                ScopeFilter::Only(wanted) => **scope == wanted,
            })
            .map(|(key, scope)| (key.as_str(), *scope))
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for key in ["post", "posttype", "postmeta", "option", "plugin", "usermeta"] {
            registry.register(key, TableScope::Site);
        }
        for key in ["user", "role", "permission", "user_role", "user_perms"] {
            registry.register(key, TableScope::Global);
        }
        for key in ["site", "sitemeta"] {
            registry.register(key, TableScope::MsGlobal);
        }
        registry
    }
}

// ------------- TenantContext -------------
#[derive(Debug, Clone)]
pub struct TenantContext {
    registry: TableRegistry,
    base_prefix: String,
    prefix: String,
    site_id: Option<u64>,
    names: BTreeMap<String, String>,
}

fn site_prefix(base_prefix: &str, site_id: u64) -> String {
    if site_id <= 1 {
        base_prefix.to_string()
    } else {
        format!("{base_prefix}{site_id}_")
    }
}

impl TenantContext {
    pub fn new(base_prefix: &str, registry: TableRegistry) -> Result<Self> {
        let mut context = Self {
            registry,
            base_prefix: String::new(),
            prefix: String::new(),
            site_id: None,
            names: BTreeMap::new(),
        };
        context.set_prefix(base_prefix, true)?;
        Ok(context)
    }
    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }
    /// Prefix of the active site's tables.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
    pub fn site_id(&self) -> Option<u64> {
        self.site_id
    }
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Replace the base prefix and return the previous one.
    pub fn set_prefix(&mut self, prefix: &str, update_table_names: bool) -> Result<String> {
        if !VALID_PREFIX.is_match(prefix) {
            return Err(QubusError::InvalidPrefix(prefix.to_string()));
        }
        let old = std::mem::replace(&mut self.base_prefix, prefix.to_string());
        self.prefix = site_prefix(&self.base_prefix, self.site_id.unwrap_or(0));
        if update_table_names {
            self.refresh(ScopeFilter::Only(TableScope::Global));
            self.refresh(ScopeFilter::Only(TableScope::MsGlobal));
            if self.site_id.is_some() {
                self.refresh(ScopeFilter::Only(TableScope::Site));
            }
        }
        Ok(old)
    }

    /// Switch the active site and return the previous site id (0 when unset).
    pub fn set_site_id(&mut self, site_id: u64) -> u64 {
        let old = self.site_id.replace(site_id).unwrap_or(0);
        self.prefix = site_prefix(&self.base_prefix, site_id);
        self.refresh(ScopeFilter::Only(TableScope::Site));
        old
    }

    fn refresh(&mut self, filter: ScopeFilter) {
        let resolved: Vec<(String, String)> = self
            .registry
            .keys(filter)
            .map(|(key, scope)| {
                let prefix = match scope {
                    TableScope::Site => &self.prefix,
                    TableScope::Global | TableScope::MsGlobal => &self.base_prefix,
                };
                (key.to_string(), format!("{prefix}{key}"))
            })
            .collect();
        self.names.extend(resolved);
    }

    /// Resolved name of one logical table.
    pub fn table(&self, key: &str) -> Option<&str> {
        self.names.get(key).map(String::as_str)
    }

    /// Logical key to table name for every table in `scope`. With
    /// `site_id_override` above zero, site tables are named for that site
    /// instead of the active one.
    pub fn tables(
        &self,
        scope: impl Into<ScopeFilter>,
        with_prefix: bool,
        site_id_override: u64,
    ) -> BTreeMap<String, String> {
        let site_id = if site_id_override > 0 {
            site_id_override
        } else {
            self.site_id.unwrap_or(0)
        };
        let site = site_prefix(&self.base_prefix, site_id);
        self.registry
            .keys(scope.into())
            .map(|(key, scope)| {
                let name = if !with_prefix {
                    key.to_string()
                } else {
                    match scope {
                        TableScope::Site => format!("{site}{key}"),
                        TableScope::Global | TableScope::MsGlobal => {
                            format!("{}{key}", self.base_prefix)
                        }
                    }
                };
                (key.to_string(), name)
            })
            .collect()
    }
}
