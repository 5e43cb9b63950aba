use async_trait::async_trait;

use crate::db::StoreError;
use crate::models::activity::{Activity, NewActivity};
use crate::models::contact::Contact;
use crate::models::message::{Channel, Message, MessageThread, NewMessage};
use crate::models::workspace::WorkspaceId;

/// The slice of the CRM that workflow steps read and write.
#[async_trait]
pub trait CrmRepository: Send + Sync {
    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError>;

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity, StoreError>;

    /// Returns false when no opportunity with that id exists in the workspace.
    async fn move_opportunity_stage(
        &self,
        workspace_id: &WorkspaceId,
        opportunity_id: &str,
        stage_id: &str,
    ) -> Result<bool, StoreError>;

    async fn find_or_create_thread(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
        channel: Channel,
    ) -> Result<MessageThread, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;
}
