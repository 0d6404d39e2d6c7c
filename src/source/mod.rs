pub mod glpi;
pub mod jira;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::ticket::{LogicalTicket, NewTicket, SourceSystem, TicketUpdate};

pub use glpi::{GlpiClient, GlpiUser};
pub use jira::JiraClient;
pub use memory::MemorySource;

/// One side of the sync: fetch everything, then create/update/delete single
/// tickets. Implementations log their own request failures.
#[async_trait]
pub trait TicketSource: Send + Sync {
    fn system(&self) -> SourceSystem;

    async fn fetch_all(&self) -> Result<Vec<LogicalTicket>>;

    /// Create a ticket and return its remote id.
    async fn create(&self, ticket: &NewTicket) -> Result<String>;

    async fn update(&self, remote_id: &str, update: &TicketUpdate) -> Result<()>;

    /// Delete a ticket. Returns `Ok(false)` without calling the remote
    /// system when deletion is disabled for this source.
    async fn delete(&self, remote_id: &str) -> Result<bool>;
}
