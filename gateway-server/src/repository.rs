//! Collaborator interfaces the core consumes.
//!
//! Persistence of server, namespace, and health records lives outside the
//! gateway core; these traits are the full contract. The in-memory
//! implementations back single-tenant deployments and every test.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use gateway_core::error::{GatewayError, GatewayResult};

use crate::model::{
    BackendServer, HealthCheckRecord, MappingStatus, Namespace, NamespaceServer, ServerStatus,
    ToolMapping,
};

/// Store of backend server registrations.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Fetch a server by id.
    async fn get_by_id(&self, id: &str) -> GatewayResult<Option<BackendServer>>;

    /// Fetch a server by organization and display name.
    async fn get_by_name(&self, org: &str, name: &str) -> GatewayResult<Option<BackendServer>>;

    /// All servers of an organization, optionally only non-deleted ones.
    async fn list_by_organization(
        &self,
        org: &str,
        active_only: bool,
    ) -> GatewayResult<Vec<BackendServer>>;

    /// Non-deleted servers whose status is `active`.
    async fn get_active_servers(&self, org: &str) -> GatewayResult<Vec<BackendServer>>;

    /// Insert a new registration; names are unique per organization.
    async fn create(&self, server: BackendServer) -> GatewayResult<()>;

    /// Replace an existing registration.
    async fn update(&self, server: BackendServer) -> GatewayResult<()>;

    /// Mutate only the status field.
    async fn update_status(&self, id: &str, status: ServerStatus) -> GatewayResult<()>;

    /// Soft-delete: clears `is_active`, the record remains readable.
    async fn delete(&self, id: &str) -> GatewayResult<()>;
}

/// Store of probe history.
#[async_trait]
pub trait HealthCheckRepository: Send + Sync {
    /// Append one probe record.
    async fn create(&self, record: HealthCheckRecord) -> GatewayResult<()>;

    /// The most recent record for a server, authoritative for health.
    async fn get_latest_by_server_id(
        &self,
        server_id: &str,
    ) -> GatewayResult<Option<HealthCheckRecord>>;

    /// Up to `limit` most recent records, newest first.
    async fn get_history_by_server_id(
        &self,
        server_id: &str,
        limit: usize,
    ) -> GatewayResult<Vec<HealthCheckRecord>>;
}

/// Store of namespaces and their mappings.
#[async_trait]
pub trait NamespaceRepository: Send + Sync {
    /// Fetch a namespace with its server and tool mappings.
    async fn get_with_servers(&self, org: &str, name: &str) -> GatewayResult<Option<Namespace>>;

    /// Server mappings of a namespace.
    async fn servers_of(&self, namespace_id: &str) -> GatewayResult<Vec<NamespaceServer>>;

    /// Tool mappings of a namespace.
    async fn tools_of(&self, namespace_id: &str) -> GatewayResult<Vec<ToolMapping>>;

    /// Upsert a tool's status within a namespace.
    async fn set_tool_status(
        &self,
        namespace_id: &str,
        server_id: &str,
        tool_name: &str,
        status: MappingStatus,
    ) -> GatewayResult<()>;
}

/// Hook invoked after registration so tool inventories can be discovered
/// off the request path.
#[async_trait]
pub trait ToolDiscoveryService: Send + Sync {
    /// Kick off discovery for a freshly registered server.
    async fn discover_server_tools(&self, server_id: &str, org_id: &str) -> GatewayResult<()>;
}

/// In-memory [`ServerRepository`].
#[derive(Default)]
pub struct MemoryServerRepository {
    servers: RwLock<HashMap<String, BackendServer>>,
}

impl MemoryServerRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerRepository for MemoryServerRepository {
    async fn get_by_id(&self, id: &str) -> GatewayResult<Option<BackendServer>> {
        Ok(self.servers.read().await.get(id).cloned())
    }

    async fn get_by_name(&self, org: &str, name: &str) -> GatewayResult<Option<BackendServer>> {
        Ok(self
            .servers
            .read()
            .await
            .values()
            .find(|s| s.organization_id == org && s.name == name)
            .cloned())
    }

    async fn list_by_organization(
        &self,
        org: &str,
        active_only: bool,
    ) -> GatewayResult<Vec<BackendServer>> {
        Ok(self
            .servers
            .read()
            .await
            .values()
            .filter(|s| s.organization_id == org && (!active_only || s.is_active))
            .cloned()
            .collect())
    }

    async fn get_active_servers(&self, org: &str) -> GatewayResult<Vec<BackendServer>> {
        Ok(self
            .servers
            .read()
            .await
            .values()
            .filter(|s| {
                s.organization_id == org && s.is_active && s.status == ServerStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn create(&self, server: BackendServer) -> GatewayResult<()> {
        server.validate()?;
        let mut servers = self.servers.write().await;
        let duplicate = servers
            .values()
            .any(|s| s.organization_id == server.organization_id && s.name == server.name);
        if duplicate {
            return Err(GatewayError::Conflict {
                reason: format!("server name '{}' already registered", server.name),
            });
        }
        servers.insert(server.id.clone(), server);
        Ok(())
    }

    async fn update(&self, server: BackendServer) -> GatewayResult<()> {
        server.validate()?;
        let mut servers = self.servers.write().await;
        if !servers.contains_key(&server.id) {
            return Err(GatewayError::NotFound {
                what: format!("server {}", server.id),
            });
        }
        servers.insert(server.id.clone(), server);
        Ok(())
    }

    async fn update_status(&self, id: &str, status: ServerStatus) -> GatewayResult<()> {
        let mut servers = self.servers.write().await;
        let server = servers.get_mut(id).ok_or_else(|| GatewayError::NotFound {
            what: format!("server {id}"),
        })?;
        server.status = status;
        server.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete(&self, id: &str) -> GatewayResult<()> {
        let mut servers = self.servers.write().await;
        let server = servers.get_mut(id).ok_or_else(|| GatewayError::NotFound {
            what: format!("server {id}"),
        })?;
        server.is_active = false;
        server.updated_at = chrono::Utc::now();
        Ok(())
    }
}

/// In-memory [`HealthCheckRepository`].
#[derive(Default)]
pub struct MemoryHealthCheckRepository {
    records: RwLock<HashMap<String, Vec<HealthCheckRecord>>>,
}

impl MemoryHealthCheckRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthCheckRepository for MemoryHealthCheckRepository {
    async fn create(&self, record: HealthCheckRecord) -> GatewayResult<()> {
        self.records
            .write()
            .await
            .entry(record.server_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn get_latest_by_server_id(
        &self,
        server_id: &str,
    ) -> GatewayResult<Option<HealthCheckRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(server_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn get_history_by_server_id(
        &self,
        server_id: &str,
        limit: usize,
    ) -> GatewayResult<Vec<HealthCheckRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(server_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory [`NamespaceRepository`].
#[derive(Default)]
pub struct MemoryNamespaceRepository {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryNamespaceRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a namespace wholesale.
    pub async fn put(&self, namespace: Namespace) {
        self.namespaces
            .write()
            .await
            .insert(namespace.id.clone(), namespace);
    }
}

#[async_trait]
impl NamespaceRepository for MemoryNamespaceRepository {
    async fn get_with_servers(&self, org: &str, name: &str) -> GatewayResult<Option<Namespace>> {
        Ok(self
            .namespaces
            .read()
            .await
            .values()
            .find(|ns| ns.organization_id == org && ns.name == name)
            .cloned())
    }

    async fn servers_of(&self, namespace_id: &str) -> GatewayResult<Vec<NamespaceServer>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace_id)
            .map(|ns| ns.servers.clone())
            .unwrap_or_default())
    }

    async fn tools_of(&self, namespace_id: &str) -> GatewayResult<Vec<ToolMapping>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace_id)
            .map(|ns| ns.tools.clone())
            .unwrap_or_default())
    }

    async fn set_tool_status(
        &self,
        namespace_id: &str,
        server_id: &str,
        tool_name: &str,
        status: MappingStatus,
    ) -> GatewayResult<()> {
        let mut namespaces = self.namespaces.write().await;
        let namespace =
            namespaces
                .get_mut(namespace_id)
                .ok_or_else(|| GatewayError::NotFound {
                    what: format!("namespace {namespace_id}"),
                })?;

        if let Some(mapping) = namespace
            .tools
            .iter_mut()
            .find(|t| t.server_id == server_id && t.tool_name == tool_name)
        {
            mapping.status = status;
        } else {
            namespace.tools.push(ToolMapping {
                server_id: server_id.to_string(),
                tool_name: tool_name.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// No-op [`ToolDiscoveryService`] that only logs the trigger.
#[derive(Default)]
pub struct LoggingToolDiscovery;

#[async_trait]
impl ToolDiscoveryService for LoggingToolDiscovery {
    async fn discover_server_tools(&self, server_id: &str, org_id: &str) -> GatewayResult<()> {
        debug!(server_id, org_id, "tool discovery triggered");
        Ok(())
    }
}

/// Bundle of repository handles the daemon wires together once.
#[derive(Clone)]
pub struct Repositories {
    /// Server registrations.
    pub servers: Arc<dyn ServerRepository>,
    /// Probe history.
    pub health: Arc<dyn HealthCheckRepository>,
    /// Namespaces.
    pub namespaces: Arc<dyn NamespaceRepository>,
    /// Post-registration discovery hook.
    pub tool_discovery: Arc<dyn ToolDiscoveryService>,
}

impl Repositories {
    /// All-in-memory bundle.
    pub fn in_memory() -> Self {
        Self {
            servers: Arc::new(MemoryServerRepository::new()),
            health: Arc::new(MemoryHealthCheckRepository::new()),
            namespaces: Arc::new(MemoryNamespaceRepository::new()),
            tool_discovery: Arc::new(LoggingToolDiscovery),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerProtocol;

    #[tokio::test]
    async fn duplicate_names_conflict_within_org() {
        let repo = MemoryServerRepository::new();
        let first = BackendServer::new_url("org1", "echo", ServerProtocol::Http, "http://a/mcp");
        repo.create(first).await.unwrap();

        let duplicate =
            BackendServer::new_url("org1", "echo", ServerProtocol::Http, "http://b/mcp");
        assert!(matches!(
            repo.create(duplicate).await,
            Err(GatewayError::Conflict { .. })
        ));

        // Same name in a different org is fine.
        let other_org =
            BackendServer::new_url("org2", "echo", ServerProtocol::Http, "http://c/mcp");
        repo.create(other_org).await.unwrap();
    }

    #[tokio::test]
    async fn soft_delete_keeps_the_record() {
        let repo = MemoryServerRepository::new();
        let server = BackendServer::new_url("org", "a", ServerProtocol::Http, "http://a/mcp");
        let id = server.id.clone();
        repo.create(server).await.unwrap();

        repo.delete(&id).await.unwrap();
        let fetched = repo.get_by_id(&id).await.unwrap().unwrap();
        assert!(!fetched.is_active);

        assert!(repo
            .list_by_organization("org", true)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.list_by_organization("org", false).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn active_servers_filter_on_both_flags() {
        let repo = MemoryServerRepository::new();
        let mut unhealthy =
            BackendServer::new_url("org", "sick", ServerProtocol::Http, "http://a/mcp");
        unhealthy.status = ServerStatus::Unhealthy;
        repo.create(unhealthy).await.unwrap();

        let healthy = BackendServer::new_url("org", "ok", ServerProtocol::Http, "http://b/mcp");
        repo.create(healthy).await.unwrap();

        let active = repo.get_active_servers("org").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "ok");
    }

    #[tokio::test]
    async fn health_history_is_newest_first_and_bounded() {
        let repo = MemoryHealthCheckRepository::new();
        for i in 0..5 {
            repo.create(HealthCheckRecord {
                server_id: "s1".to_string(),
                status: crate::model::HealthState::Healthy,
                response_summary: format!("probe {i}"),
                latency_ms: i,
                checked_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        }

        let latest = repo.get_latest_by_server_id("s1").await.unwrap().unwrap();
        assert_eq!(latest.response_summary, "probe 4");

        let history = repo.get_history_by_server_id("s1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].response_summary, "probe 4");
    }

    #[tokio::test]
    async fn set_tool_status_upserts() {
        let repo = MemoryNamespaceRepository::new();
        let ns = Namespace::new("org", "prod");
        let ns_id = ns.id.clone();
        repo.put(ns).await;

        repo.set_tool_status(&ns_id, "s1", "echo", MappingStatus::Inactive)
            .await
            .unwrap();
        repo.set_tool_status(&ns_id, "s1", "echo", MappingStatus::Active)
            .await
            .unwrap();

        let tools = repo.tools_of(&ns_id).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].status, MappingStatus::Active);
    }
}
